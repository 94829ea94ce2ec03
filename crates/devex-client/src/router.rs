//! Inbound event dispatch.
//!
//! Two delivery paths exist for every decoded envelope:
//!
//! 1. A correlated waiter registered for `(event, id)` consumes the payload
//!    exclusively. This backs the request/response API.
//! 2. Event-name handlers receive the payload in registration order. This
//!    backs the persistent state mirrors (file tree, terminal).
//!
//! A frame that matches a waiter is not fanned out to handlers; the two paths
//! are mutually exclusive per frame.

use std::sync::Arc;

use dashmap::DashMap;
use devex_protocol::Envelope;
use log::debug;
use serde_json::Value;
use tokio::sync::oneshot;

pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
pub struct EventRouter {
    handlers: DashMap<String, Vec<Handler>>,
    waiters: DashMap<(String, u64), oneshot::Sender<Value>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler for an event name. Handlers stack; each
    /// registration adds one more callback.
    pub fn on(&self, event: impl Into<String>, handler: Handler) {
        self.handlers.entry(event.into()).or_default().push(handler);
    }

    /// Remove all handlers for an event name. Idempotent.
    pub fn off(&self, event: &str) {
        self.handlers.remove(event);
    }

    /// Register a one-shot waiter for a correlated response. The returned
    /// receiver resolves with the payload of the first `event` frame whose
    /// `data.id` equals `id`.
    pub fn wait_for(&self, event: impl Into<String>, id: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert((event.into(), id), tx);
        rx
    }

    /// Drop a waiter that will no longer be awaited (e.g. after a timeout).
    pub fn forget(&self, event: &str, id: u64) {
        self.waiters.remove(&(event.to_string(), id));
    }

    /// Route one decoded envelope.
    pub fn dispatch(&self, envelope: &Envelope) {
        if let Some(id) = envelope.request_id() {
            if let Some((_, tx)) = self.waiters.remove(&(envelope.event.clone(), id)) {
                // Receiver may have timed out and dropped; nothing to do.
                let _ = tx.send(envelope.data.clone());
                return;
            }
        }

        // Clone the callbacks out of the map entry so a handler that registers
        // or removes handlers cannot deadlock.
        let callbacks: Vec<Handler> = match self.handlers.get(&envelope.event) {
            Some(list) => list.value().clone(),
            None => {
                debug!("no handler for event '{}', dropping frame", envelope.event);
                return;
            }
        };
        for callback in callbacks {
            callback(envelope.data.clone());
        }
    }

    /// Drop all handlers and waiters. Pending waiters resolve with a closed
    /// channel error.
    pub fn clear(&self) {
        self.handlers.clear();
        self.waiters.clear();
    }
}
