use std::time::Duration;

use thiserror::Error;

use crate::directory::ComponentKind;
use crate::tracker::TaskId;

/// Which wait of the delegation protocol timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPhase {
    /// Waiting for the router's delivery acknowledgement.
    Delivery,
    /// Waiting for the correlated response signal.
    Response,
}

impl std::fmt::Display for RoutingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingPhase::Delivery => write!(f, "delivery"),
            RoutingPhase::Response => write!(f, "response"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Bad reference: {0}")]
    BadReference(String),

    #[error("Fallback stopped execution: {0}")]
    FallbackStop(String),

    #[error("No matching branch for condition result")]
    NoMatchingBranch,

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Invalid state transition: {operation} from {from}")]
    InvalidStateTransition { from: String, operation: String },

    #[error("Step {0} is not declared in the objective")]
    UnknownStep(String),

    #[error("Progress {0} is out of range (0..=100)")]
    InvalidProgress(u8),

    #[error("Component not found: {kind} for objective {objective_id}")]
    ComponentNotFound {
        objective_id: String,
        kind: ComponentKind,
    },

    #[error("Component already registered: {kind} for objective {objective_id}")]
    AlreadyRegistered {
        objective_id: String,
        kind: ComponentKind,
    },

    #[error("Invalid objective id: {0}")]
    InvalidObjectiveId(String),

    #[error("Task {id} is {status}, cannot {operation}")]
    TaskStatusConflict {
        id: TaskId,
        status: String,
        operation: String,
    },

    #[error("Task {id} is not assigned to agent {agent}")]
    WrongAgent { id: TaskId, agent: String },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(uuid::Uuid),

    #[error("Routing timeout during {phase} wait for signal {signal_id}")]
    RoutingTimeout {
        signal_id: uuid::Uuid,
        phase: RoutingPhase,
    },

    #[error("Delivery of signal {signal_id} failed: {reason}")]
    DeliveryFailed {
        signal_id: uuid::Uuid,
        reason: String,
    },

    #[error("No capable worker for step: {0}")]
    NoCapableWorker(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::NoHomeDir), "No home directory");
        assert_eq!(
            format!("{}", Error::Handler("boom".to_string())),
            "Handler error: boom"
        );
        assert_eq!(
            format!(
                "{}",
                Error::InvalidStateTransition {
                    from: "pending".to_string(),
                    operation: "complete".to_string(),
                }
            ),
            "Invalid state transition: complete from pending"
        );
    }

    #[test]
    fn test_routing_phase_display() {
        assert_eq!(format!("{}", RoutingPhase::Delivery), "delivery");
        assert_eq!(format!("{}", RoutingPhase::Response), "response");
    }
}
