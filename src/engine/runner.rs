//! Step tree runner.
//!
//! Sequences block the caller and halt on the first child error. Parallel
//! groups dispatch one tokio task per child with deterministically
//! pre-assigned step indices, then collect results in declared order; on a
//! sibling failure the remaining in-flight siblings are NOT cancelled — they
//! run to completion (or timeout) detached and their results are discarded.
//! That is the documented contract, not an oversight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::engine::context::{ExecutionContext, StepResult, StepStatus};
use crate::engine::handler::{FallbackDecision, HandlerRegistry};
use crate::engine::step::{Step, StepTree};
use crate::error::{Error, Result};
use crate::plog_debug;

/// One entry of the execution log, in step-index order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub step_id: String,
    pub step_index: u64,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Ordered, timestamped record of a completed or failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Start of the first step by index.
    pub started_at: DateTime<Utc>,
    /// Completion of the last step by index.
    pub completed_at: DateTime<Utc>,
    pub entries: Vec<LogEntry>,
}

/// Result of a run: tagged outcome plus the (possibly partial) context.
#[derive(Debug)]
pub struct RunOutcome {
    /// On success, the step result with the highest index.
    pub result: Result<StepResult>,
    /// The accumulated context, partial when the run halted early.
    pub context: ExecutionContext,
    /// Present only when logging was requested.
    pub log: Option<ExecutionLog>,
}

/// The step tree execution engine.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    default_backoff: Duration,
}

impl Engine {
    pub fn new(registry: Arc<HandlerRegistry>, config: &Config) -> Self {
        Self {
            registry,
            default_backoff: config.retry_backoff(),
        }
    }

    /// Run a step tree to completion or first unrecovered error.
    pub async fn run(&self, tree: &StepTree, input: Value, collect_log: bool) -> RunOutcome {
        let mut ctx = ExecutionContext::new(input);

        if let Err(err) = validate_unique_ids(tree) {
            return RunOutcome {
                result: Err(err),
                context: ctx,
                log: None,
            };
        }

        let run_result = self.run_tree(tree, &mut ctx).await;
        let log = if collect_log { Some(build_log(&ctx)) } else { None };

        let result = match run_result {
            Ok(()) => match ctx.last_result() {
                Some(last) => Ok(last.clone()),
                None => Err(Error::Handler("step tree produced no results".to_string())),
            },
            Err(err) => Err(err),
        };

        RunOutcome {
            result,
            context: ctx,
            log,
        }
    }

    fn run_tree<'a>(
        &'a self,
        tree: &'a StepTree,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match tree {
                StepTree::Leaf(step) => self.run_leaf(step, ctx).await,
                StepTree::Sequence(children) => {
                    // Declared order; first error halts, later siblings never run.
                    for child in children {
                        self.run_tree(child, ctx).await?;
                    }
                    Ok(())
                }
                StepTree::Parallel(children) => self.run_parallel(children, ctx).await,
                StepTree::Branch { condition, cases } => {
                    let cond = self.registry.condition(condition)?;
                    let value = cond.evaluate(ctx).await?;
                    plog_debug!("branch {} evaluated to {}", condition, value);
                    for (match_value, subtree) in cases {
                        if *match_value == value {
                            return self.run_tree(subtree, ctx).await;
                        }
                    }
                    Err(Error::NoMatchingBranch)
                }
            }
        })
    }

    async fn run_parallel(
        &self,
        children: &[StepTree],
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let base = ctx.step_index;
        let mut handles = Vec::with_capacity(children.len());
        let mut offset = 0u64;

        // Indices are pre-assigned before dispatch, so ordering is decided
        // by declaration position, never by completion order.
        for child in children {
            let engine = self.clone();
            let subtree = child.clone();
            let mut child_ctx = ctx.clone();
            child_ctx.step_index = base + offset;
            offset += child.leaf_count();

            handles.push(tokio::spawn(async move {
                let result = engine.run_tree(&subtree, &mut child_ctx).await;
                (result, child_ctx)
            }));
        }

        let mut merged = 0u64;
        for handle in handles {
            let (result, child_ctx) = handle
                .await
                .map_err(|e| Error::Handler(format!("parallel child panicked: {}", e)))?;

            for (id, step_result) in child_ctx.steps {
                if !ctx.steps.contains_key(&id) {
                    ctx.steps.insert(id, step_result);
                    merged += 1;
                }
            }
            ctx.step_index = base + merged;

            // First error in declared order wins. Dropping the remaining
            // handles detaches the tasks; they keep running and their
            // results are discarded.
            result?;
        }

        // Advance past the full reserved span. A branch child reserves
        // indices for its largest case, so when a smaller case ran the
        // recorded count falls short of the reservation; counting only
        // recorded steps here would hand a later step a sibling's index.
        ctx.step_index = base + offset;

        Ok(())
    }

    async fn run_leaf(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<()> {
        let dispatch_started = Utc::now();

        let mut resolved = serde_json::Map::new();
        for (name, param) in &step.params {
            match ctx.resolve(param) {
                Ok(value) => {
                    resolved.insert(name.clone(), value);
                }
                Err(err) => {
                    record_failure(ctx, &step.id, Value::Null, dispatch_started, err.to_string());
                    return Err(err);
                }
            }
        }
        let params = Value::Object(resolved);

        let handler = match self.registry.handler(&step.handler) {
            Ok(handler) => handler,
            Err(err) => {
                record_failure(ctx, &step.id, params, dispatch_started, err.to_string());
                return Err(err);
            }
        };

        let backoff = step
            .options
            .retry_backoff()
            .unwrap_or(self.default_backoff);
        let mut retries_left = step.options.retries;

        loop {
            let attempt_started = Utc::now();
            let outcome = match step.options.timeout() {
                Some(limit) => {
                    match tokio::time::timeout(limit, handler.call(params.clone(), ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(limit)),
                    }
                }
                None => handler.call(params.clone(), ctx).await,
            };

            match outcome {
                Ok(value) => {
                    record_completion(ctx, &step.id, params, value, attempt_started);
                    return Ok(());
                }
                Err(err) => {
                    if retries_left > 0 {
                        retries_left -= 1;
                        plog_debug!(
                            "step {} failed ({}), retrying in {:?} ({} retries left)",
                            step.id,
                            err,
                            backoff,
                            retries_left
                        );
                        // Fixed backoff; no cancellation once sleeping.
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if let Some(fallback_name) = &step.options.fallback {
                        let fallback = match self.registry.fallback(fallback_name) {
                            Ok(fallback) => fallback,
                            Err(lookup_err) => {
                                record_failure(
                                    ctx,
                                    &step.id,
                                    params,
                                    attempt_started,
                                    lookup_err.to_string(),
                                );
                                return Err(lookup_err);
                            }
                        };
                        match fallback.recover(&err.to_string(), ctx).await {
                            FallbackDecision::Continue(value) => {
                                plog_debug!(
                                    "step {} recovered by fallback {}",
                                    step.id,
                                    fallback_name
                                );
                                record_completion(ctx, &step.id, params, value, attempt_started);
                                return Ok(());
                            }
                            FallbackDecision::Stop(reason) => {
                                record_failure(
                                    ctx,
                                    &step.id,
                                    params,
                                    attempt_started,
                                    reason.clone(),
                                );
                                return Err(Error::FallbackStop(reason));
                            }
                        }
                    }

                    record_failure(ctx, &step.id, params, attempt_started, err.to_string());
                    return Err(err);
                }
            }
        }
    }
}

fn record_completion(
    ctx: &mut ExecutionContext,
    step_id: &str,
    input: Value,
    result: Value,
    started_at: DateTime<Utc>,
) {
    let index = ctx.step_index;
    ctx.steps.insert(
        step_id.to_string(),
        StepResult {
            input,
            result: Some(result),
            status: StepStatus::Completed,
            started_at,
            completed_at: Utc::now(),
            error: None,
            step_index: index,
        },
    );
    ctx.step_index += 1;
}

fn record_failure(
    ctx: &mut ExecutionContext,
    step_id: &str,
    input: Value,
    started_at: DateTime<Utc>,
    error: String,
) {
    let index = ctx.step_index;
    ctx.steps.insert(
        step_id.to_string(),
        StepResult {
            input,
            result: None,
            status: StepStatus::Failed,
            started_at,
            completed_at: Utc::now(),
            error: Some(error),
            step_index: index,
        },
    );
    ctx.step_index += 1;
}

fn validate_unique_ids(tree: &StepTree) -> Result<()> {
    let mut seen = HashSet::new();
    for id in tree.leaf_ids() {
        if !seen.insert(id) {
            return Err(Error::DuplicateStepId(id.to_string()));
        }
    }
    Ok(())
}

fn build_log(ctx: &ExecutionContext) -> ExecutionLog {
    let entries: Vec<LogEntry> = ctx
        .ordered_results()
        .into_iter()
        .map(|(id, result)| LogEntry {
            step_id: id.to_string(),
            step_index: result.step_index,
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            error: result.error.clone(),
        })
        .collect();

    let started_at = entries
        .first()
        .map(|e| e.started_at)
        .unwrap_or_else(Utc::now);
    let completed_at = entries
        .last()
        .map(|e| e.completed_at)
        .unwrap_or_else(Utc::now);

    ExecutionLog {
        started_at,
        completed_at,
        entries,
    }
}
