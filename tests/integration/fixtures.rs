//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A handler registry pre-loaded with small arithmetic handlers
//! - A supervisor wired to an event channel
//! - Draining runtime events without blocking

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use plexus::config::Config;
use plexus::engine::{Engine, HandlerRegistry};
use plexus::events::RuntimeEvent;
use plexus::supervisor::Supervisor;

/// Registry with the arithmetic handlers the end-to-end tests use.
///
/// - `double`: returns `n * 2`
/// - `add_one`: returns `n + 1`
/// - `fail`: always errors
pub fn arithmetic_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("double", |params: Value, _| {
        let n = params["n"].as_i64().unwrap_or(0);
        Ok(json!(n * 2))
    });
    registry.register_fn("add_one", |params: Value, _| {
        let n = params["n"].as_i64().unwrap_or(0);
        Ok(json!(n + 1))
    });
    registry.register_fn("fail", |_, _| {
        Err(plexus::Error::Handler("intentional failure".to_string()))
    });
    registry
}

/// Engine over the arithmetic registry with a negligible retry backoff.
pub fn arithmetic_engine() -> Engine {
    let config = Config {
        retry_backoff_ms: 1,
        ..Config::default()
    };
    Engine::new(Arc::new(arithmetic_registry()), &config)
}

/// A supervisor with a short teardown grace, plus the event receiver.
pub fn test_supervisor() -> (Supervisor, mpsc::Receiver<RuntimeEvent>) {
    let config = Config {
        teardown_grace_ms: 10,
        ..Config::default()
    };
    let (event_tx, event_rx) = mpsc::channel(100);
    (Supervisor::new(config, event_tx), event_rx)
}

/// Pull every event currently queued, without waiting for more.
pub fn drain_events(rx: &mut mpsc::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
