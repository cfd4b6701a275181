//! Per-objective artifact store.
//!
//! Artifacts are named, typed pieces of output produced during execution.
//! Content is immutable after creation; metadata merges and tags union on
//! update. The store is an actor owning its state exclusively, with a
//! secondary index from step id to produced artifacts.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{notify, RuntimeEvent};
use crate::plog_debug;

pub type ArtifactId = Uuid;

/// A named, typed piece of output content, taggable and filterable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    /// Immutable after creation.
    pub content: Value,
    pub content_type: String,
    pub metadata: BTreeMap<String, Value>,
    pub created_by: Option<String>,
    /// The step that produced this artifact, when known.
    pub step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Optional attributes supplied at store time.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub metadata: BTreeMap<String, Value>,
    pub tags: Vec<String>,
    pub step_id: Option<String>,
    pub created_by: Option<String>,
}

/// Conjunctive filter: every present predicate must hold; a missing
/// predicate is ignored. Tag matching requires ALL listed tags.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub tags: Option<Vec<String>>,
    pub content_type: Option<String>,
    pub created_by: Option<String>,
}

impl ArtifactFilter {
    fn matches(&self, artifact: &Artifact) -> bool {
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|t| artifact.tags.contains(t)) {
                return false;
            }
        }
        if let Some(content_type) = &self.content_type {
            if artifact.content_type != *content_type {
                return false;
            }
        }
        if let Some(created_by) = &self.created_by {
            if artifact.created_by.as_deref() != Some(created_by.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Domain events emitted to the aggregator on every mutation.
#[derive(Debug, Clone)]
pub enum ArtifactEvent {
    Stored(Artifact),
    MetadataUpdated(Artifact),
    TagsAdded(Artifact),
}

enum StoreCommand {
    Store {
        name: String,
        content: Value,
        content_type: String,
        opts: StoreOptions,
        reply: oneshot::Sender<ArtifactId>,
    },
    Get {
        id: ArtifactId,
        reply: oneshot::Sender<Result<Artifact>>,
    },
    ListByStep {
        step_id: String,
        reply: oneshot::Sender<Vec<Artifact>>,
    },
    List {
        filter: ArtifactFilter,
        reply: oneshot::Sender<Vec<Artifact>>,
    },
    UpdateMetadata {
        id: ArtifactId,
        metadata: BTreeMap<String, Value>,
        reply: oneshot::Sender<Result<()>>,
    },
    AddTags {
        id: ArtifactId,
        tags: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable client handle to a running artifact store actor.
#[derive(Clone, Debug)]
pub struct ArtifactHandle {
    cmd_tx: mpsc::Sender<StoreCommand>,
    cancel: CancellationToken,
}

impl ArtifactHandle {
    pub fn liveness(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn store(
        &self,
        name: &str,
        content: Value,
        content_type: &str,
        opts: StoreOptions,
    ) -> Result<ArtifactId> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Store {
            name: name.to_string(),
            content,
            content_type: content_type.to_string(),
            opts,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))
    }

    pub async fn get(&self, id: ArtifactId) -> Result<Artifact> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Get { id, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))?
    }

    pub async fn list_by_step(&self, step_id: &str) -> Result<Vec<Artifact>> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::ListByStep {
            step_id: step_id.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))
    }

    pub async fn list(&self, filter: ArtifactFilter) -> Result<Vec<Artifact>> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::List { filter, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))
    }

    pub async fn update_metadata(
        &self,
        id: ArtifactId,
        metadata: BTreeMap<String, Value>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::UpdateMetadata { id, metadata, reply })
            .await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))?
    }

    pub async fn add_tags(&self, id: ArtifactId, tags: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::AddTags { id, tags, reply }).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))?
    }

    async fn send(&self, cmd: StoreCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ChannelClosed("artifact store".to_string()))
    }
}

/// The artifact store actor.
pub struct ArtifactStore {
    objective_id: String,
    artifacts: HashMap<ArtifactId, Artifact>,
    /// Secondary index: step id to artifacts produced by that step.
    step_index: HashMap<String, Vec<ArtifactId>>,
    event_tx: mpsc::Sender<RuntimeEvent>,
}

impl ArtifactStore {
    /// Spawn an artifact store actor for one objective.
    pub fn spawn(
        objective_id: &str,
        event_tx: mpsc::Sender<RuntimeEvent>,
        capacity: usize,
    ) -> ArtifactHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let mut store = ArtifactStore {
            objective_id: objective_id.to_string(),
            artifacts: HashMap::new(),
            step_index: HashMap::new(),
            event_tx,
        };

        plog_debug!("ArtifactStore::spawn objective={}", objective_id);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        plog_debug!("ArtifactStore {} cancelled", store.objective_id);
                        break;
                    }
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(cmd) => store.handle(cmd),
                            None => break,
                        }
                    }
                }
            }
        });

        ArtifactHandle { cmd_tx, cancel }
    }

    fn handle(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Store {
                name,
                content,
                content_type,
                opts,
                reply,
            } => {
                let artifact = Artifact {
                    id: Uuid::new_v4(),
                    name,
                    content,
                    content_type,
                    metadata: opts.metadata,
                    created_by: opts.created_by,
                    step_id: opts.step_id,
                    created_at: Utc::now(),
                    tags: dedup_preserving_order(opts.tags),
                };
                let id = artifact.id;
                if let Some(step_id) = &artifact.step_id {
                    self.step_index
                        .entry(step_id.clone())
                        .or_default()
                        .push(id);
                }
                self.emit(ArtifactEvent::Stored(artifact.clone()));
                self.artifacts.insert(id, artifact);
                let _ = reply.send(id);
            }
            StoreCommand::Get { id, reply } => {
                let _ = reply.send(
                    self.artifacts
                        .get(&id)
                        .cloned()
                        .ok_or(Error::ArtifactNotFound(id)),
                );
            }
            StoreCommand::ListByStep { step_id, reply } => {
                let artifacts = self
                    .step_index
                    .get(&step_id)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| self.artifacts.get(id).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(artifacts);
            }
            StoreCommand::List { filter, reply } => {
                let mut artifacts: Vec<Artifact> = self
                    .artifacts
                    .values()
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect();
                artifacts.sort_by_key(|a| a.created_at);
                let _ = reply.send(artifacts);
            }
            StoreCommand::UpdateMetadata { id, metadata, reply } => {
                let _ = reply.send(self.update_metadata(id, metadata));
            }
            StoreCommand::AddTags { id, tags, reply } => {
                let _ = reply.send(self.add_tags(id, tags));
            }
        }
    }

    fn update_metadata(
        &mut self,
        id: ArtifactId,
        metadata: BTreeMap<String, Value>,
    ) -> Result<()> {
        let artifact = self
            .artifacts
            .get_mut(&id)
            .ok_or(Error::ArtifactNotFound(id))?;
        // Merge, never replace: existing keys not named survive.
        for (key, value) in metadata {
            artifact.metadata.insert(key, value);
        }
        let snapshot = artifact.clone();
        self.emit(ArtifactEvent::MetadataUpdated(snapshot));
        Ok(())
    }

    fn add_tags(&mut self, id: ArtifactId, tags: Vec<String>) -> Result<()> {
        let artifact = self
            .artifacts
            .get_mut(&id)
            .ok_or(Error::ArtifactNotFound(id))?;
        for tag in tags {
            if !artifact.tags.contains(&tag) {
                artifact.tags.push(tag);
            }
        }
        let snapshot = artifact.clone();
        self.emit(ArtifactEvent::TagsAdded(snapshot));
        Ok(())
    }

    fn emit(&self, event: ArtifactEvent) {
        notify(
            &self.event_tx,
            RuntimeEvent::ArtifactStore {
                objective_id: self.objective_id.clone(),
                event,
            },
        );
    }
}

fn dedup_preserving_order(tags: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
