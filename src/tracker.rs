//! Per-objective task tracker.
//!
//! One tracker instance exists per objective and is the single owner of its
//! task state: every read and write goes through the actor's mailbox, so no
//! lock is ever shared with callers. Each mutation emits a domain event to
//! the owning aggregator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{notify, RuntimeEvent};
use crate::plog_debug;

/// Unique identifier for a task within an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of delegated work tracked against an assigned worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// The objective step this task carries out.
    pub step: String,
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Task {
    fn new(step: &str) -> Self {
        Self {
            id: TaskId::new(),
            step: step.to_string(),
            assigned_agent: None,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }
}

/// Domain events emitted to the aggregator on every mutation.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created(Task),
    Assigned(Task),
    Started(Task),
    Completed(Task),
    Failed(Task),
}

enum TrackerCommand {
    Create {
        step: String,
        reply: oneshot::Sender<TaskId>,
    },
    Assign {
        id: TaskId,
        agent: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Start {
        id: TaskId,
        agent: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Complete {
        id: TaskId,
        result: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Fail {
        id: TaskId,
        error: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Get {
        id: TaskId,
        reply: oneshot::Sender<Result<Task>>,
    },
    List {
        reply: oneshot::Sender<Vec<Task>>,
    },
    ListAgent {
        agent: String,
        reply: oneshot::Sender<Vec<Task>>,
    },
}

/// Cloneable client handle to a running tracker actor.
#[derive(Clone, Debug)]
pub struct TrackerHandle {
    cmd_tx: mpsc::Sender<TrackerCommand>,
    cancel: CancellationToken,
}

impl TrackerHandle {
    /// Token that resolves when the tracker stops; registered with the
    /// directory for liveness tracking.
    pub fn liveness(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal the tracker to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn create_task(&self, step: &str) -> Result<TaskId> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Create {
            step: step.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))
    }

    pub async fn assign_task(&self, id: TaskId, agent: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Assign {
            id,
            agent: agent.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))?
    }

    pub async fn start_task(&self, id: TaskId, agent: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Start {
            id,
            agent: agent.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))?
    }

    pub async fn complete_task(&self, id: TaskId, result: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Complete { id, result, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))?
    }

    pub async fn fail_task(&self, id: TaskId, error: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Fail {
            id,
            error: error.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))?
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Get { id, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))?
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::List { reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))
    }

    pub async fn list_agent_tasks(&self, agent: &str) -> Result<Vec<Task>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::ListAgent {
            agent: agent.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))
    }

    async fn send(&self, cmd: TrackerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ChannelClosed("task tracker".to_string()))
    }
}

/// The tracker actor: exclusive owner of the task map and agent index.
pub struct TaskTracker {
    objective_id: String,
    tasks: HashMap<TaskId, Task>,
    /// Secondary index from agent name to owned task ids.
    agent_index: HashMap<String, Vec<TaskId>>,
    event_tx: mpsc::Sender<RuntimeEvent>,
}

impl TaskTracker {
    /// Spawn a tracker actor for one objective.
    pub fn spawn(
        objective_id: &str,
        event_tx: mpsc::Sender<RuntimeEvent>,
        capacity: usize,
    ) -> TrackerHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let mut tracker = TaskTracker {
            objective_id: objective_id.to_string(),
            tasks: HashMap::new(),
            agent_index: HashMap::new(),
            event_tx,
        };

        plog_debug!("TaskTracker::spawn objective={}", objective_id);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        plog_debug!("TaskTracker {} cancelled", tracker.objective_id);
                        break;
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(cmd) => tracker.handle(cmd),
                            None => break,
                        }
                    }
                }
            }
        });

        TrackerHandle { cmd_tx, cancel }
    }

    fn handle(&mut self, cmd: TrackerCommand) {
        match cmd {
            TrackerCommand::Create { step, reply } => {
                let task = Task::new(&step);
                let id = task.id;
                self.emit(TaskEvent::Created(task.clone()));
                self.tasks.insert(id, task);
                let _ = reply.send(id);
            }
            TrackerCommand::Assign { id, agent, reply } => {
                let _ = reply.send(self.assign(id, &agent));
            }
            TrackerCommand::Start { id, agent, reply } => {
                let _ = reply.send(self.start(id, &agent));
            }
            TrackerCommand::Complete { id, result, reply } => {
                let _ = reply.send(self.finish(id, Ok(result)));
            }
            TrackerCommand::Fail { id, error, reply } => {
                let _ = reply.send(self.finish(id, Err(error)));
            }
            TrackerCommand::Get { id, reply } => {
                let _ = reply.send(
                    self.tasks
                        .get(&id)
                        .cloned()
                        .ok_or(Error::TaskNotFound(id)),
                );
            }
            TrackerCommand::List { reply } => {
                let _ = reply.send(self.tasks.values().cloned().collect());
            }
            TrackerCommand::ListAgent { agent, reply } => {
                let tasks = self
                    .agent_index
                    .get(&agent)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| self.tasks.get(id).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(tasks);
            }
        }
    }

    fn assign(&mut self, id: TaskId, agent: &str) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(Error::TaskStatusConflict {
                id,
                status: task.status.to_string(),
                operation: "assign".to_string(),
            });
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent.to_string());
        self.agent_index
            .entry(agent.to_string())
            .or_default()
            .push(id);
        let snapshot = task.clone();
        self.emit(TaskEvent::Assigned(snapshot));
        Ok(())
    }

    fn start(&mut self, id: TaskId, agent: &str) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Assigned {
            return Err(Error::TaskStatusConflict {
                id,
                status: task.status.to_string(),
                operation: "start".to_string(),
            });
        }
        if task.assigned_agent.as_deref() != Some(agent) {
            return Err(Error::WrongAgent {
                id,
                agent: agent.to_string(),
            });
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        let snapshot = task.clone();
        self.emit(TaskEvent::Started(snapshot));
        Ok(())
    }

    fn finish(&mut self, id: TaskId, outcome: std::result::Result<Value, String>) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        let operation = if outcome.is_ok() { "complete" } else { "fail" };
        if task.status != TaskStatus::InProgress {
            return Err(Error::TaskStatusConflict {
                id,
                status: task.status.to_string(),
                operation: operation.to_string(),
            });
        }
        task.completed_at = Some(Utc::now());
        let event = match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                TaskEvent::Completed(task.clone())
            }
            Err(error) => {
                task.status = TaskStatus::Failed;
                task.error = Some(error);
                TaskEvent::Failed(task.clone())
            }
        };
        self.emit(event);
        Ok(())
    }

    fn emit(&self, event: TaskEvent) {
        notify(
            &self.event_tx,
            RuntimeEvent::TaskTracker {
                objective_id: self.objective_id.clone(),
                event,
            },
        );
    }
}
