//! Objective lifecycle: state machine and owning process.

pub mod process;
pub mod state;

pub use process::{ObjectiveHandle, ObjectiveProcess};
pub use state::{Objective, ObjectiveStatus};
