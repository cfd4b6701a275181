//! Execution engine supervisor.
//!
//! Owner of owners: provisions the per-objective service set (task tracker,
//! artifact store, objective process) in a fixed order, registers each in
//! the directory, and tears the set down as a unit. Shutdown is coordinated
//! through cancellation tokens rather than process links; the grace sleep
//! lets in-flight mailbox work drain before the entries disappear.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::artifacts::{ArtifactHandle, ArtifactStore};
use crate::config::Config;
use crate::directory::{ComponentHandle, ComponentKind, Directory};
use crate::error::{Error, Result};
use crate::events::RuntimeEvent;
use crate::objective::{ObjectiveHandle, ObjectiveProcess};
use crate::tracker::{TaskTracker, TrackerHandle};
use crate::{plog, plog_debug};

struct Provisioned {
    tracker: TrackerHandle,
    store: ArtifactHandle,
    objective: ObjectiveHandle,
}

/// Supervises the full set of running objectives.
pub struct Supervisor {
    config: Config,
    directory: Directory,
    event_tx: mpsc::Sender<RuntimeEvent>,
    objectives: Arc<RwLock<HashMap<String, Provisioned>>>,
}

impl Supervisor {
    pub fn new(config: Config, event_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            config,
            directory: Directory::new(),
            event_tx,
            objectives: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The directory this supervisor registers its owners in.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Provision the service set for a new objective.
    ///
    /// Order is fixed: tracker, then store, then the objective process
    /// (which looks the first two up in the directory). Any failure tears
    /// down whatever was already created, so a failed provision leaves no
    /// trace.
    pub async fn provision(
        &self,
        objective_id: &str,
        steps: Vec<String>,
    ) -> Result<ObjectiveHandle> {
        validate_objective_id(objective_id)?;
        plog!("Provisioning objective {}", objective_id);

        let capacity = self.config.channel_capacity;

        let tracker = TaskTracker::spawn(objective_id, self.event_tx.clone(), capacity);
        if let Err(err) = self
            .directory
            .register(objective_id, ComponentHandle::TaskTracker(tracker.clone()))
            .await
        {
            tracker.shutdown();
            return Err(err);
        }

        let store = ArtifactStore::spawn(objective_id, self.event_tx.clone(), capacity);
        if let Err(err) = self
            .directory
            .register(objective_id, ComponentHandle::ArtifactStore(store.clone()))
            .await
        {
            self.rollback(objective_id, &tracker, Some(&store), None)
                .await;
            return Err(err);
        }

        let objective = match ObjectiveProcess::spawn(
            objective_id,
            steps,
            &self.directory,
            self.event_tx.clone(),
            capacity,
        )
        .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.rollback(objective_id, &tracker, Some(&store), None)
                    .await;
                return Err(err);
            }
        };
        if let Err(err) = self
            .directory
            .register(objective_id, ComponentHandle::Objective(objective.clone()))
            .await
        {
            self.rollback(objective_id, &tracker, Some(&store), Some(&objective))
                .await;
            return Err(err);
        }

        self.objectives.write().await.insert(
            objective_id.to_string(),
            Provisioned {
                tracker,
                store,
                objective: objective.clone(),
            },
        );
        Ok(objective)
    }

    /// Handle to a running objective.
    pub async fn get(&self, objective_id: &str) -> Result<ObjectiveHandle> {
        self.objectives
            .read()
            .await
            .get(objective_id)
            .map(|p| p.objective.clone())
            .ok_or_else(|| Error::ComponentNotFound {
                objective_id: objective_id.to_string(),
                kind: ComponentKind::Objective,
            })
    }

    /// Ids of all running objectives, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.objectives.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down an objective's service set.
    ///
    /// Cancels the tracker and store, waits out the configured grace period
    /// so queued mailbox work can drain, then removes the directory entries
    /// and cancels the objective process itself.
    pub async fn teardown(&self, objective_id: &str) -> Result<()> {
        let provisioned = self.objectives.write().await.remove(objective_id).ok_or_else(
            || Error::ComponentNotFound {
                objective_id: objective_id.to_string(),
                kind: ComponentKind::Objective,
            },
        )?;
        plog!("Tearing down objective {}", objective_id);

        provisioned.tracker.shutdown();
        provisioned.store.shutdown();
        tokio::time::sleep(self.config.teardown_grace()).await;

        self.directory
            .deregister(objective_id, ComponentKind::TaskTracker)
            .await;
        self.directory
            .deregister(objective_id, ComponentKind::ArtifactStore)
            .await;
        self.directory
            .deregister(objective_id, ComponentKind::Objective)
            .await;

        provisioned.objective.shutdown();
        Ok(())
    }

    async fn rollback(
        &self,
        objective_id: &str,
        tracker: &TrackerHandle,
        store: Option<&ArtifactHandle>,
        objective: Option<&ObjectiveHandle>,
    ) {
        plog_debug!("Rolling back partial provision of {}", objective_id);
        tracker.shutdown();
        self.directory
            .deregister(objective_id, ComponentKind::TaskTracker)
            .await;
        if let Some(store) = store {
            store.shutdown();
            self.directory
                .deregister(objective_id, ComponentKind::ArtifactStore)
                .await;
        }
        if let Some(objective) = objective {
            objective.shutdown();
            self.directory
                .deregister(objective_id, ComponentKind::Objective)
                .await;
        }
    }
}

fn validate_objective_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidObjectiveId(id.to_string()));
    }
    Ok(())
}
