//! Typed message passing between workers.

pub mod delegation;
pub mod router;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use delegation::{Delegator, Worker, WorkerRole};
pub use router::{DeliveryReceiver, LocalRouter, RouterImpl, SignalReceiver};

pub type SignalId = Uuid;

/// A typed message addressed from one named worker to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    /// Names the payload shape the recipient should expect.
    pub schema_id: String,
    pub payload: Value,
    pub sender: String,
    pub recipient: String,
    pub metadata: BTreeMap<String, String>,
}

impl Signal {
    pub fn new(schema_id: &str, payload: Value, sender: &str, recipient: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_id: schema_id.to_string(),
            payload,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outcome of one routing attempt, reported to the signal's subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryNotice {
    Delivered(SignalId),
    Failed(SignalId, String),
}
