//! Capability traits invoked by the engine.
//!
//! Handlers, fallbacks, and branch conditions are externally supplied. The
//! engine never raises across the boundary: every capability returns a
//! result value, and faults from a handler surface as `Error::Handler`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::context::ExecutionContext;
use crate::error::{Error, Result};

/// A step handler: invoked with the resolved parameters and the current
/// context, returning the step's result.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &ExecutionContext) -> Result<Value>;
}

/// Outcome of a fallback invocation.
#[derive(Debug, Clone)]
pub enum FallbackDecision {
    /// Record the step as completed with this substitute result; the
    /// original error is discarded.
    Continue(Value),
    /// Record the step as failed with this reason and halt the run.
    Stop(String),
}

/// A fallback capability consulted after retries are exhausted.
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn recover(&self, error: &str, ctx: &ExecutionContext) -> FallbackDecision;
}

/// A branch condition: evaluates the context to a match value.
#[async_trait]
pub trait Condition: Send + Sync {
    async fn evaluate(&self, ctx: &ExecutionContext) -> Result<Value>;
}

/// Adapter turning a plain closure into a [`StepHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(Value, &ExecutionContext) -> Result<Value> + Send + Sync,
{
    async fn call(&self, params: Value, ctx: &ExecutionContext) -> Result<Value> {
        (self.0)(params, ctx)
    }
}

/// Adapter turning a plain closure into a [`Condition`].
pub struct FnCondition<F>(pub F);

#[async_trait]
impl<F> Condition for FnCondition<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync,
{
    async fn evaluate(&self, ctx: &ExecutionContext) -> Result<Value> {
        (self.0)(ctx)
    }
}

/// Name-indexed registry for the three capability kinds.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    fallbacks: HashMap<String, Arc<dyn Fallback>>,
    conditions: HashMap<String, Arc<dyn Condition>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, name: &str, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn register_fallback(&mut self, name: &str, fallback: Arc<dyn Fallback>) {
        self.fallbacks.insert(name.to_string(), fallback);
    }

    pub fn register_condition(&mut self, name: &str, condition: Arc<dyn Condition>) {
        self.conditions.insert(name.to_string(), condition);
    }

    /// Register a synchronous closure as a handler.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, &ExecutionContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(FnHandler(f)));
    }

    pub fn handler(&self, name: &str) -> Result<Arc<dyn StepHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::HandlerNotFound(name.to_string()))
    }

    pub fn fallback(&self, name: &str) -> Result<Arc<dyn Fallback>> {
        self.fallbacks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::HandlerNotFound(name.to_string()))
    }

    pub fn condition(&self, name: &str) -> Result<Arc<dyn Condition>> {
        self.conditions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::HandlerNotFound(name.to_string()))
    }
}
