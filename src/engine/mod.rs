//! Step tree execution engine.
//!
//! A caller submits an immutable [`StepTree`] together with an input value;
//! the engine runs it against an accumulating [`ExecutionContext`] and
//! returns the last result plus an ordered execution log. Handlers,
//! fallbacks, and branch conditions are externally supplied capabilities
//! resolved by name through the [`HandlerRegistry`].

pub mod context;
pub mod handler;
pub mod runner;
pub mod step;

pub use context::{ExecutionContext, StepResult, StepStatus};
pub use handler::{Condition, Fallback, FallbackDecision, HandlerRegistry, StepHandler};
pub use runner::{Engine, ExecutionLog, LogEntry, RunOutcome};
pub use step::{ParamValue, PathKey, Step, StepOptions, StepTree};
