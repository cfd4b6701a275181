//! Component directory.
//!
//! An explicit registry mapping `(objective_id, kind)` to a live handle.
//! Every registered handle carries a cancellation token; lookups prune
//! entries whose token is already cancelled, so a dead owner is never
//! handed out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactHandle;
use crate::error::{Error, Result};
use crate::objective::ObjectiveHandle;
use crate::plog_debug;
use crate::tracker::TrackerHandle;

/// Which per-objective owner a registration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    TaskTracker,
    ArtifactStore,
    Objective,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentKind::TaskTracker => "task_tracker",
            ComponentKind::ArtifactStore => "artifact_store",
            ComponentKind::Objective => "objective",
        };
        write!(f, "{}", s)
    }
}

/// A registered handle, one variant per owner kind.
#[derive(Clone, Debug)]
pub enum ComponentHandle {
    TaskTracker(TrackerHandle),
    ArtifactStore(ArtifactHandle),
    Objective(ObjectiveHandle),
}

impl ComponentHandle {
    fn kind(&self) -> ComponentKind {
        match self {
            ComponentHandle::TaskTracker(_) => ComponentKind::TaskTracker,
            ComponentHandle::ArtifactStore(_) => ComponentKind::ArtifactStore,
            ComponentHandle::Objective(_) => ComponentKind::Objective,
        }
    }

    fn liveness(&self) -> CancellationToken {
        match self {
            ComponentHandle::TaskTracker(h) => h.liveness(),
            ComponentHandle::ArtifactStore(h) => h.liveness(),
            ComponentHandle::Objective(h) => h.liveness(),
        }
    }
}

/// Shared registry of per-objective owners. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct Directory {
    entries: Arc<RwLock<HashMap<(String, ComponentKind), ComponentHandle>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its objective. A live duplicate is rejected;
    /// a cancelled leftover under the same key is replaced.
    pub async fn register(&self, objective_id: &str, handle: ComponentHandle) -> Result<()> {
        let kind = handle.kind();
        let key = (objective_id.to_string(), kind);
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&key) {
            if !existing.liveness().is_cancelled() {
                return Err(Error::AlreadyRegistered {
                    objective_id: objective_id.to_string(),
                    kind,
                });
            }
        }
        plog_debug!("Directory::register {} {}", objective_id, kind);
        entries.insert(key, handle);
        Ok(())
    }

    /// Look up a live handle, pruning the entry if its owner has shut down.
    pub async fn lookup(&self, objective_id: &str, kind: ComponentKind) -> Result<ComponentHandle> {
        let key = (objective_id.to_string(), kind);
        let mut entries = self.entries.write().await;
        match entries.get(&key) {
            Some(handle) if !handle.liveness().is_cancelled() => Ok(handle.clone()),
            Some(_) => {
                plog_debug!("Directory pruning dead {} for {}", kind, objective_id);
                entries.remove(&key);
                Err(self.not_found(objective_id, kind))
            }
            None => Err(self.not_found(objective_id, kind)),
        }
    }

    /// Typed lookup for the task tracker.
    pub async fn tracker(&self, objective_id: &str) -> Result<TrackerHandle> {
        match self.lookup(objective_id, ComponentKind::TaskTracker).await? {
            ComponentHandle::TaskTracker(h) => Ok(h),
            _ => Err(self.not_found(objective_id, ComponentKind::TaskTracker)),
        }
    }

    /// Typed lookup for the artifact store.
    pub async fn artifact_store(&self, objective_id: &str) -> Result<ArtifactHandle> {
        match self
            .lookup(objective_id, ComponentKind::ArtifactStore)
            .await?
        {
            ComponentHandle::ArtifactStore(h) => Ok(h),
            _ => Err(self.not_found(objective_id, ComponentKind::ArtifactStore)),
        }
    }

    /// Typed lookup for the objective process.
    pub async fn objective(&self, objective_id: &str) -> Result<ObjectiveHandle> {
        match self.lookup(objective_id, ComponentKind::Objective).await? {
            ComponentHandle::Objective(h) => Ok(h),
            _ => Err(self.not_found(objective_id, ComponentKind::Objective)),
        }
    }

    pub async fn deregister(&self, objective_id: &str, kind: ComponentKind) {
        let key = (objective_id.to_string(), kind);
        self.entries.write().await.remove(&key);
    }

    /// Distinct objective ids with at least one registration.
    pub async fn list_objectives(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = entries.keys().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn not_found(&self, objective_id: &str, kind: ComponentKind) -> Error {
        Error::ComponentNotFound {
            objective_id: objective_id.to_string(),
            kind,
        }
    }
}
