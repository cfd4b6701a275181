//! Owner notifications consumed by an external aggregator.
//!
//! Every per-objective owner (task tracker, artifact store, objective
//! process) reports its state changes here. The aggregator is out of scope;
//! it only has to hold the receiving end of an mpsc channel. Sends are
//! best-effort: a closed aggregator never fails the mutation that produced
//! the event.

use tokio::sync::mpsc;

use crate::artifacts::ArtifactEvent;
use crate::objective::Objective;
use crate::plog_warn;
use crate::tracker::TaskEvent;

/// A notification from one of the per-objective owners.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A task tracker mutation.
    TaskTracker {
        objective_id: String,
        event: TaskEvent,
    },
    /// An artifact store mutation.
    ArtifactStore {
        objective_id: String,
        event: ArtifactEvent,
    },
    /// An objective lifecycle transition, carrying the full updated snapshot.
    Objective {
        objective_id: String,
        snapshot: Objective,
    },
}

/// Send an event to the aggregator without blocking the owner on it.
///
/// A full or closed channel drops the event with a warning; owners never
/// stall or fail because the aggregator fell behind.
pub fn notify(tx: &mpsc::Sender<RuntimeEvent>, event: RuntimeEvent) {
    if let Err(err) = tx.try_send(event) {
        plog_warn!("aggregator notification dropped: {}", err);
    }
}
