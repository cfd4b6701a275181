//! Signal routing.
//!
//! The router interface is pluggable; the default [`LocalRouter`] delivers
//! in-process over per-worker mpsc mailboxes. Delivery confirmation uses
//! transient subscriptions: a caller subscribes to a signal id before
//! routing and receives exactly one notice, after which the subscription
//! is gone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::plog_debug;
use crate::signal::{DeliveryNotice, Signal, SignalId};

pub type SignalReceiver = mpsc::Receiver<Signal>;
pub type DeliveryReceiver = oneshot::Receiver<DeliveryNotice>;

/// A routing backend. Implementations may deliver in-process, over the
/// network, or through a broker; callers only see this interface.
#[async_trait]
pub trait RouterImpl: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Deliver a signal to its recipient and resolve any subscription on
    /// the signal's id with exactly one notice.
    async fn route(&self, signal: Signal) -> Result<()>;

    /// Subscribe to the delivery outcome of one signal id. The
    /// subscription resolves at most once and is removed on resolution.
    async fn subscribe(&self, id: SignalId) -> Result<DeliveryReceiver>;

    async fn unsubscribe(&self, id: SignalId) -> Result<()>;
}

/// In-process router over named mpsc mailboxes.
#[derive(Clone)]
pub struct LocalRouter {
    mailboxes: Arc<RwLock<HashMap<String, mpsc::Sender<Signal>>>>,
    subscriptions: Arc<Mutex<HashMap<SignalId, oneshot::Sender<DeliveryNotice>>>>,
    capacity: usize,
}

impl LocalRouter {
    pub fn new(config: &Config) -> Self {
        Self {
            mailboxes: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            capacity: config.channel_capacity,
        }
    }

    /// Register a worker mailbox under a name, returning the receiving end.
    /// Re-registering a name replaces the old mailbox.
    pub async fn register_worker(&self, name: &str) -> SignalReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.mailboxes.write().await.insert(name.to_string(), tx);
        plog_debug!("LocalRouter registered worker {}", name);
        rx
    }

    pub async fn deregister_worker(&self, name: &str) {
        self.mailboxes.write().await.remove(name);
    }

    async fn resolve(&self, id: SignalId, notice: DeliveryNotice) {
        if let Some(tx) = self.subscriptions.lock().await.remove(&id) {
            // Subscriber may have given up; a dropped receiver is fine.
            let _ = tx.send(notice);
        }
    }
}

#[async_trait]
impl RouterImpl for LocalRouter {
    async fn start(&self) -> Result<()> {
        // Nothing to warm up in-process; remote backends connect here.
        Ok(())
    }

    async fn route(&self, signal: Signal) -> Result<()> {
        let id = signal.id;
        let mailbox = self.mailboxes.read().await.get(&signal.recipient).cloned();

        let Some(mailbox) = mailbox else {
            let recipient = signal.recipient.clone();
            self.resolve(id, DeliveryNotice::Failed(id, format!("unknown worker {}", recipient)))
                .await;
            return Err(Error::WorkerNotFound(recipient));
        };

        if mailbox.send(signal).await.is_err() {
            self.resolve(id, DeliveryNotice::Failed(id, "mailbox closed".to_string()))
                .await;
            return Err(Error::ChannelClosed("worker mailbox".to_string()));
        }

        self.resolve(id, DeliveryNotice::Delivered(id)).await;
        Ok(())
    }

    async fn subscribe(&self, id: SignalId) -> Result<DeliveryReceiver> {
        let (tx, rx) = oneshot::channel();
        self.subscriptions.lock().await.insert(id, tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, id: SignalId) -> Result<()> {
        self.subscriptions.lock().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn router() -> LocalRouter {
        LocalRouter::new(&Config::default())
    }

    #[tokio::test]
    async fn test_route_delivers_to_mailbox() {
        let router = router();
        let mut inbox = router.register_worker("bob").await;

        let signal = Signal::new("ping", json!({"n": 1}), "alice", "bob");
        router.route(signal.clone()).await.unwrap();

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.id, signal.id);
        assert_eq!(received.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_subscription_resolves_exactly_once() {
        let router = router();
        let _inbox = router.register_worker("bob").await;

        let signal = Signal::new("ping", json!({}), "alice", "bob");
        let rx = router.subscribe(signal.id).await.unwrap();
        router.route(signal.clone()).await.unwrap();

        assert_eq!(rx.await.unwrap(), DeliveryNotice::Delivered(signal.id));
        // Resolved subscriptions are gone.
        assert!(router.subscriptions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails_subscription_and_errors() {
        let router = router();
        let signal = Signal::new("ping", json!({}), "alice", "nobody");
        let rx = router.subscribe(signal.id).await.unwrap();

        let err = router.route(signal.clone()).await.unwrap_err();
        assert!(matches!(err, Error::WorkerNotFound(name) if name == "nobody"));

        match rx.await.unwrap() {
            DeliveryNotice::Failed(id, reason) => {
                assert_eq!(id, signal.id);
                assert!(reason.contains("nobody"));
            }
            other => panic!("expected failure notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_without_subscription() {
        let router = router();
        let mut inbox = router.register_worker("bob").await;

        router
            .route(Signal::new("ping", json!({}), "alice", "bob"))
            .await
            .unwrap();
        assert!(inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription() {
        let router = router();
        let id = Uuid::new_v4();
        let _rx = router.subscribe(id).await.unwrap();
        router.unsubscribe(id).await.unwrap();
        assert!(router.subscriptions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reregister_replaces_mailbox() {
        let router = router();
        let mut old_inbox = router.register_worker("bob").await;
        let mut new_inbox = router.register_worker("bob").await;

        router
            .route(Signal::new("ping", json!({}), "alice", "bob"))
            .await
            .unwrap();

        assert!(new_inbox.recv().await.is_some());
        // Old mailbox's sender was dropped on replacement.
        assert!(old_inbox.recv().await.is_none());
    }
}
