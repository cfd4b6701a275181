//! Step delegation over the signal router.
//!
//! A delegator hands a step to the first worker whose capability matches
//! the step description, confirms delivery through a transient
//! subscription, then waits for the worker's response on its own mailbox.
//! Responses are correlated by addressing convention: a signal whose
//! sender is the chosen worker and whose recipient is the caller is the
//! response; anything else arriving in the meantime is discarded. A local
//! timeout does not cancel the remote side; the worker may still finish
//! and its late response is simply never read.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result, RoutingPhase};
use crate::plog_debug;
use crate::signal::router::{RouterImpl, SignalReceiver};
use crate::signal::{DeliveryNotice, Signal};

pub const DELEGATION_SCHEMA: &str = "step_delegation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Coordinator,
    Member,
}

/// A worker known to the delegator, with the capability it advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub role: WorkerRole,
    pub capability: String,
}

impl Worker {
    pub fn new(name: &str, role: WorkerRole, capability: &str) -> Self {
        Self {
            name: name.to_string(),
            role,
            capability: capability.to_string(),
        }
    }

    fn matches(&self, step_description: &str) -> bool {
        step_description.contains(&self.capability)
    }
}

/// Delegates steps to capable workers and awaits their responses.
pub struct Delegator {
    caller: String,
    workers: Vec<Worker>,
    router: Arc<dyn RouterImpl>,
    inbox: SignalReceiver,
    delivery_timeout: Duration,
    response_timeout: Duration,
}

impl Delegator {
    /// `inbox` is the caller's own mailbox, registered with the router
    /// under `caller`'s name; responses arrive there.
    pub fn new(
        caller: &str,
        workers: Vec<Worker>,
        router: Arc<dyn RouterImpl>,
        inbox: SignalReceiver,
        config: &Config,
    ) -> Self {
        Self {
            caller: caller.to_string(),
            workers,
            router,
            inbox,
            delivery_timeout: config.delivery_timeout(),
            response_timeout: config.response_timeout(),
        }
    }

    /// Pick the worker for a step: a matching coordinator wins over any
    /// member; within each role declaration order decides.
    pub fn select_worker(&self, step_description: &str) -> Result<&Worker> {
        self.workers
            .iter()
            .filter(|w| w.role == WorkerRole::Coordinator)
            .chain(self.workers.iter().filter(|w| w.role == WorkerRole::Member))
            .find(|w| w.matches(step_description))
            .ok_or_else(|| Error::NoCapableWorker(step_description.to_string()))
    }

    /// Delegate one step and return the worker's response payload.
    pub async fn delegate(&mut self, step_description: &str, payload: Value) -> Result<Value> {
        let worker_name = self.select_worker(step_description)?.name.clone();
        plog_debug!(
            "Delegating step to {} (caller {})",
            worker_name,
            self.caller
        );

        let signal = Signal::new(DELEGATION_SCHEMA, payload, &self.caller, &worker_name)
            .with_metadata("step", step_description);
        let signal_id = signal.id;

        let delivery_rx = self.router.subscribe(signal_id).await?;
        if let Err(err) = self.router.route(signal).await {
            self.router.unsubscribe(signal_id).await?;
            return Err(err);
        }

        match tokio::time::timeout(self.delivery_timeout, delivery_rx).await {
            Ok(Ok(DeliveryNotice::Delivered(_))) => {}
            // A failure notice resolved the subscription; keep its reason.
            Ok(Ok(DeliveryNotice::Failed(_, reason))) => {
                return Err(Error::DeliveryFailed { signal_id, reason });
            }
            Ok(Err(_)) | Err(_) => {
                self.router.unsubscribe(signal_id).await?;
                return Err(Error::RoutingTimeout {
                    signal_id,
                    phase: RoutingPhase::Delivery,
                });
            }
        }

        self.await_response(signal_id, &worker_name).await
    }

    async fn await_response(&mut self, signal_id: crate::signal::SignalId, worker: &str) -> Result<Value> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::RoutingTimeout {
                    signal_id,
                    phase: RoutingPhase::Response,
                });
            }
            match tokio::time::timeout(remaining, self.inbox.recv()).await {
                Ok(Some(signal)) => {
                    if signal.sender == worker && signal.recipient == self.caller {
                        return Ok(signal.payload);
                    }
                    plog_debug!(
                        "Discarding non-response signal {} from {}",
                        signal.id,
                        signal.sender
                    );
                }
                Ok(None) => {
                    return Err(Error::ChannelClosed("caller mailbox".to_string()));
                }
                Err(_) => {
                    return Err(Error::RoutingTimeout {
                        signal_id,
                        phase: RoutingPhase::Response,
                    });
                }
            }
        }
    }
}
