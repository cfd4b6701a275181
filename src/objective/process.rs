//! Objective process actor.
//!
//! One tokio task per objective owns the [`Objective`] state exclusively;
//! clients mutate it through a command mailbox. The process resolves its
//! sibling owners (task tracker, artifact store) from the directory at
//! spawn time and hands those out to clients, so workers reach the
//! per-objective services through the objective itself.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactHandle;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::events::{notify, RuntimeEvent};
use crate::objective::state::Objective;
use crate::plog_debug;
use crate::tracker::TrackerHandle;

enum ProcessCommand {
    Initialize {
        reply: oneshot::Sender<Result<()>>,
    },
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Complete {
        reply: oneshot::Sender<Result<()>>,
    },
    Fail {
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateProgress {
        progress: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    SetCurrentStep {
        step: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AddError {
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Objective>,
    },
}

/// Cloneable client handle to a running objective process.
#[derive(Clone, Debug)]
pub struct ObjectiveHandle {
    cmd_tx: mpsc::Sender<ProcessCommand>,
    cancel: CancellationToken,
    tracker: TrackerHandle,
    store: ArtifactHandle,
}

impl ObjectiveHandle {
    pub fn liveness(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The task tracker serving this objective.
    pub fn task_tracker(&self) -> &TrackerHandle {
        &self.tracker
    }

    /// The artifact store serving this objective.
    pub fn artifact_store(&self) -> &ArtifactHandle {
        &self.store
    }

    pub async fn initialize(&self) -> Result<()> {
        self.roundtrip(|reply| ProcessCommand::Initialize { reply })
            .await?
    }

    pub async fn start(&self) -> Result<()> {
        self.roundtrip(|reply| ProcessCommand::Start { reply }).await?
    }

    pub async fn complete(&self) -> Result<()> {
        self.roundtrip(|reply| ProcessCommand::Complete { reply })
            .await?
    }

    pub async fn fail(&self, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.roundtrip(|reply| ProcessCommand::Fail { reason, reply })
            .await?
    }

    pub async fn cancel(&self) -> Result<()> {
        self.roundtrip(|reply| ProcessCommand::Cancel { reply })
            .await?
    }

    pub async fn update_progress(&self, progress: u8) -> Result<()> {
        self.roundtrip(|reply| ProcessCommand::UpdateProgress { progress, reply })
            .await?
    }

    pub async fn set_current_step(&self, step: &str) -> Result<()> {
        let step = step.to_string();
        self.roundtrip(|reply| ProcessCommand::SetCurrentStep { step, reply })
            .await?
    }

    pub async fn add_error(&self, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.roundtrip(|reply| ProcessCommand::AddError { reason, reply })
            .await?
    }

    /// A point-in-time copy of the objective state.
    pub async fn snapshot(&self) -> Result<Objective> {
        self.roundtrip(|reply| ProcessCommand::Snapshot { reply })
            .await
    }

    async fn roundtrip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ProcessCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ChannelClosed("objective process".to_string()))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("objective process".to_string()))
    }
}

/// The objective process actor.
pub struct ObjectiveProcess {
    objective: Objective,
    event_tx: mpsc::Sender<RuntimeEvent>,
}

impl ObjectiveProcess {
    /// Spawn the process for one objective.
    ///
    /// The objective's task tracker and artifact store must already be
    /// registered in the directory; either missing aborts the spawn with
    /// `ComponentNotFound` and no task is started.
    pub async fn spawn(
        objective_id: &str,
        steps: Vec<String>,
        directory: &Directory,
        event_tx: mpsc::Sender<RuntimeEvent>,
        capacity: usize,
    ) -> Result<ObjectiveHandle> {
        let tracker = directory.tracker(objective_id).await?;
        let store = directory.artifact_store(objective_id).await?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let mut process = ObjectiveProcess {
            objective: Objective::new(objective_id, steps),
            event_tx,
        };

        plog_debug!("ObjectiveProcess::spawn {}", objective_id);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        plog_debug!("ObjectiveProcess {} cancelled", process.objective.id);
                        break;
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(cmd) => process.handle(cmd),
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(ObjectiveHandle {
            cmd_tx,
            cancel,
            tracker,
            store,
        })
    }

    fn handle(&mut self, cmd: ProcessCommand) {
        match cmd {
            ProcessCommand::Initialize { reply } => {
                let _ = reply.send(self.apply(|obj| obj.initialize()));
            }
            ProcessCommand::Start { reply } => {
                let _ = reply.send(self.apply(|obj| obj.start()));
            }
            ProcessCommand::Complete { reply } => {
                let _ = reply.send(self.apply(|obj| obj.complete()));
            }
            ProcessCommand::Fail { reason, reply } => {
                let _ = reply.send(self.apply(|obj| obj.fail(&reason)));
            }
            ProcessCommand::Cancel { reply } => {
                let _ = reply.send(self.apply(|obj| obj.cancel()));
            }
            ProcessCommand::UpdateProgress { progress, reply } => {
                let _ = reply.send(self.apply(|obj| obj.update_progress(progress)));
            }
            ProcessCommand::SetCurrentStep { step, reply } => {
                let _ = reply.send(self.apply(|obj| obj.set_current_step(&step)));
            }
            ProcessCommand::AddError { reason, reply } => {
                let _ = reply.send(self.apply(|obj| obj.add_error(&reason)));
            }
            ProcessCommand::Snapshot { reply } => {
                let _ = reply.send(self.objective.clone());
            }
        }
    }

    /// Run a guarded operation; a successful mutation publishes the updated
    /// snapshot, a rejected one emits nothing.
    fn apply(&mut self, op: impl FnOnce(&mut Objective) -> Result<()>) -> Result<()> {
        op(&mut self.objective)?;
        notify(
            &self.event_tx,
            RuntimeEvent::Objective {
                objective_id: self.objective.id.clone(),
                snapshot: self.objective.clone(),
            },
        );
        Ok(())
    }
}
