//! Execution context accumulated across a run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::step::{ParamValue, PathKey};
use crate::error::{Error, Result};

/// Terminal status of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The recorded outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The resolved parameters the handler was invoked with.
    pub input: Value,
    /// The handler's (or fallback's) output, present when completed.
    pub result: Option<Value>,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Error message, present when failed.
    pub error: Option<String>,
    /// Monotonically assigned position within the run, never reused.
    pub step_index: u64,
}

/// Accumulated input, results, and ordering state threaded through a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The caller-supplied input value.
    pub input: Value,
    /// Results keyed by step id; ids are unique within one run.
    pub steps: HashMap<String, StepResult>,
    /// The next index to assign.
    pub step_index: u64,
}

impl ExecutionContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            steps: HashMap::new(),
            step_index: 0,
        }
    }

    /// Resolve a tagged parameter against this context.
    ///
    /// Literals pass through untouched; references are resolved by indexed
    /// lookup into the input or into a previous step's result.
    pub fn resolve(&self, param: &ParamValue) -> Result<Value> {
        match param {
            ParamValue::Literal(value) => Ok(value.clone()),
            ParamValue::InputRef(path) => walk(&self.input, path)
                .ok_or_else(|| Error::BadReference(format!("input path {:?}", path))),
            ParamValue::StepRef { step_id, path } => {
                let step = self.steps.get(step_id).ok_or_else(|| {
                    Error::BadReference(format!("step {} has no recorded result", step_id))
                })?;
                let result = step.result.as_ref().ok_or_else(|| {
                    Error::BadReference(format!("step {} completed without a result", step_id))
                })?;
                walk(result, path).ok_or_else(|| {
                    Error::BadReference(format!("step {} path {:?}", step_id, path))
                })
            }
        }
    }

    /// The step result with the highest index, if any step has run.
    pub fn last_result(&self) -> Option<&StepResult> {
        self.steps.values().max_by_key(|r| r.step_index)
    }

    /// Step results ordered by index.
    pub fn ordered_results(&self) -> Vec<(&str, &StepResult)> {
        let mut entries: Vec<_> = self
            .steps
            .iter()
            .map(|(id, result)| (id.as_str(), result))
            .collect();
        entries.sort_by_key(|(_, result)| result.step_index);
        entries
    }
}

fn walk<'a>(value: &'a Value, path: &[PathKey]) -> Option<Value> {
    let mut current: &'a Value = value;
    for key in path {
        current = match key {
            PathKey::Key(k) => current.get(k)?,
            PathKey::Index(i) => current.get(i)?,
        };
    }
    Some(current.clone())
}
