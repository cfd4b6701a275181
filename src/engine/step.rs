//! Step tree data model.
//!
//! A step tree is a tagged composition of leaves, sequences, parallel
//! groups, and branches. Trees are immutable once submitted to the engine.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One segment of an access path into a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKey {
    /// Object member lookup.
    Key(String),
    /// Array element lookup.
    Index(usize),
}

impl PathKey {
    pub fn key(k: &str) -> Self {
        Self::Key(k.to_string())
    }
}

/// A step parameter value, tagged at definition time.
///
/// The step author chooses the variant explicitly: a literal JSON array is
/// always a literal, never mistaken for a reference into the execution
/// context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// A plain JSON value passed through untouched.
    Literal(Value),
    /// A path into the run's input value.
    InputRef(Vec<PathKey>),
    /// A path into a previous step's result.
    StepRef { step_id: String, path: Vec<PathKey> },
}

impl ParamValue {
    /// Reference the whole result of a previous step.
    pub fn step_result(step_id: &str) -> Self {
        Self::StepRef {
            step_id: step_id.to_string(),
            path: Vec::new(),
        }
    }

    /// Reference the whole run input.
    pub fn input() -> Self {
        Self::InputRef(Vec::new())
    }
}

/// Retry, fallback, and timeout policy for a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOptions {
    /// How many additional attempts are allowed after the first failure.
    #[serde(default)]
    pub retries: u32,
    /// Fixed backoff between attempts; the engine default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    /// Name of a registered fallback invoked once retries are exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Upper bound on a single handler invocation. This is the only
    /// cancellation primitive exposed to ordinary step execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepOptions {
    pub fn retry_backoff(&self) -> Option<Duration> {
        self.retry_backoff_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A single unit of work: a handler reference plus parameters and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within one run.
    pub id: String,
    /// Name of the registered handler capability.
    pub handler: String,
    /// Named parameters, resolved against the execution context at dispatch.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Retry / fallback / timeout policy.
    #[serde(default)]
    pub options: StepOptions,
}

impl Step {
    pub fn new(id: &str, handler: &str) -> Self {
        Self {
            id: id.to_string(),
            handler: handler.to_string(),
            params: BTreeMap::new(),
            options: StepOptions::default(),
        }
    }

    pub fn with_param(mut self, name: &str, value: ParamValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn with_literal(self, name: &str, value: Value) -> Self {
        self.with_param(name, ParamValue::Literal(value))
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.options.retries = retries;
        self.options.retry_backoff_ms = Some(backoff.as_millis() as u64);
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.options.fallback = Some(fallback.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// The composed structure of steps submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTree {
    /// A single step.
    Leaf(Step),
    /// Children executed in declared order, each blocking the next.
    Sequence(Vec<StepTree>),
    /// Children dispatched concurrently, results collected in declared order.
    Parallel(Vec<StepTree>),
    /// A condition capability selects one case by structural equality.
    Branch {
        /// Name of the registered condition capability.
        condition: String,
        /// Match value / subtree pairs, checked in declared order.
        cases: Vec<(Value, StepTree)>,
    },
}

impl StepTree {
    pub fn leaf(step: Step) -> Self {
        Self::Leaf(step)
    }

    pub fn sequence(children: Vec<StepTree>) -> Self {
        Self::Sequence(children)
    }

    pub fn parallel(children: Vec<StepTree>) -> Self {
        Self::Parallel(children)
    }

    pub fn branch(condition: &str, cases: Vec<(Value, StepTree)>) -> Self {
        Self::Branch {
            condition: condition.to_string(),
            cases,
        }
    }

    /// Number of leaf steps in this subtree.
    ///
    /// For a branch this counts the largest case, since exactly one case
    /// runs; the count is used for deterministic index pre-assignment.
    pub fn leaf_count(&self) -> u64 {
        match self {
            StepTree::Leaf(_) => 1,
            StepTree::Sequence(children) | StepTree::Parallel(children) => {
                children.iter().map(StepTree::leaf_count).sum()
            }
            StepTree::Branch { cases, .. } => cases
                .iter()
                .map(|(_, subtree)| subtree.leaf_count())
                .max()
                .unwrap_or(0),
        }
    }

    /// Collect every leaf step id in the subtree, in declaration order.
    pub fn leaf_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_leaf_ids(&mut ids);
        ids
    }

    fn collect_leaf_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            StepTree::Leaf(step) => ids.push(&step.id),
            StepTree::Sequence(children) | StepTree::Parallel(children) => {
                for child in children {
                    child.collect_leaf_ids(ids);
                }
            }
            StepTree::Branch { cases, .. } => {
                for (_, subtree) in cases {
                    subtree.collect_leaf_ids(ids);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_builder() {
        let step = Step::new("double", "math.double")
            .with_literal("amount", json!(2))
            .with_retries(3, Duration::from_millis(50))
            .with_fallback("math.recover")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(step.id, "double");
        assert_eq!(step.handler, "math.double");
        assert_eq!(step.options.retries, 3);
        assert_eq!(step.options.retry_backoff(), Some(Duration::from_millis(50)));
        assert_eq!(step.options.fallback.as_deref(), Some("math.recover"));
        assert_eq!(step.options.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_param_value_literal_list_stays_literal() {
        // A JSON array literal is a literal; references are separate variants.
        let param = ParamValue::Literal(json!(["input", "something"]));
        assert!(matches!(param, ParamValue::Literal(_)));
    }

    #[test]
    fn test_leaf_count_nested() {
        let tree = StepTree::sequence(vec![
            StepTree::leaf(Step::new("a", "h")),
            StepTree::parallel(vec![
                StepTree::leaf(Step::new("b", "h")),
                StepTree::sequence(vec![
                    StepTree::leaf(Step::new("c", "h")),
                    StepTree::leaf(Step::new("d", "h")),
                ]),
            ]),
        ]);
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn test_leaf_count_branch_takes_largest_case() {
        let tree = StepTree::branch(
            "pick",
            vec![
                (json!("one"), StepTree::leaf(Step::new("a", "h"))),
                (
                    json!("two"),
                    StepTree::sequence(vec![
                        StepTree::leaf(Step::new("b", "h")),
                        StepTree::leaf(Step::new("c", "h")),
                    ]),
                ),
            ],
        );
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_leaf_ids_declaration_order() {
        let tree = StepTree::sequence(vec![
            StepTree::leaf(Step::new("first", "h")),
            StepTree::parallel(vec![
                StepTree::leaf(Step::new("second", "h")),
                StepTree::leaf(Step::new("third", "h")),
            ]),
        ]);
        assert_eq!(tree.leaf_ids(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_step_tree_serialization() {
        let tree = StepTree::sequence(vec![StepTree::leaf(
            Step::new("a", "h").with_param("x", ParamValue::step_result("prev")),
        )]);
        let json = serde_json::to_string(&tree).unwrap();
        let parsed: StepTree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, parsed);
    }
}
