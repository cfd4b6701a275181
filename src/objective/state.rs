//! Objective state machine.
//!
//! An objective declares its steps up front and then moves through a fixed
//! lifecycle. Every operation is valid from exactly one source state; a
//! rejected operation leaves the objective untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    Initializing,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ObjectiveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ObjectiveStatus::Completed | ObjectiveStatus::Failed | ObjectiveStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectiveStatus::Pending => "pending",
            ObjectiveStatus::Initializing => "initializing",
            ObjectiveStatus::InProgress => "in_progress",
            ObjectiveStatus::Completed => "completed",
            ObjectiveStatus::Failed => "failed",
            ObjectiveStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A multi-step goal moving through the lifecycle
/// Pending → Initializing → InProgress → {Completed, Failed, Cancelled}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    /// Declared step names; `current_step` must be one of these.
    pub steps: Vec<String>,
    pub status: ObjectiveStatus,
    pub current_step: Option<String>,
    /// Percent complete, 0..=100.
    pub progress: u8,
    /// Errors recorded along the way; non-fatal until `fail` is called.
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Objective {
    pub fn new(id: &str, steps: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            steps,
            status: ObjectiveStatus::Pending,
            current_step: None,
            progress: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending → Initializing.
    pub fn initialize(&mut self) -> Result<()> {
        self.guard(ObjectiveStatus::Pending, "initialize")?;
        self.status = ObjectiveStatus::Initializing;
        Ok(())
    }

    /// Initializing → InProgress; stamps `started_at`.
    pub fn start(&mut self) -> Result<()> {
        self.guard(ObjectiveStatus::Initializing, "start")?;
        self.status = ObjectiveStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// InProgress → Completed; progress snaps to 100.
    pub fn complete(&mut self) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "complete")?;
        self.status = ObjectiveStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// InProgress → Failed; the reason is appended to `errors`.
    pub fn fail(&mut self, reason: &str) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "fail")?;
        self.status = ObjectiveStatus::Failed;
        self.errors.push(reason.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// InProgress → Cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "cancel")?;
        self.status = ObjectiveStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Update progress while in progress. Values above 100 are rejected
    /// without touching state.
    pub fn update_progress(&mut self, progress: u8) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "update_progress")?;
        if progress > 100 {
            return Err(Error::InvalidProgress(progress));
        }
        self.progress = progress;
        Ok(())
    }

    /// Point at one of the declared steps.
    pub fn set_current_step(&mut self, step: &str) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "set_current_step")?;
        if !self.steps.iter().any(|s| s == step) {
            return Err(Error::UnknownStep(step.to_string()));
        }
        self.current_step = Some(step.to_string());
        Ok(())
    }

    /// Record a non-fatal error.
    pub fn add_error(&mut self, reason: &str) -> Result<()> {
        self.guard(ObjectiveStatus::InProgress, "add_error")?;
        self.errors.push(reason.to_string());
        Ok(())
    }

    fn guard(&self, expected: ObjectiveStatus, operation: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                operation: operation.to_string(),
            })
        }
    }
}
