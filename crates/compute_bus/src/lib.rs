//! Event Bus adapter (§4.A).
//!
//! `publish`/`subscribe` give fire-and-forget, at-least-once, no-cross-subject-
//! ordering pub/sub; `request`/`register_replier` give synchronous
//! request/reply bounded by a timeout. The default (and only shipped)
//! implementation, [`InProcessBus`], keeps everything in-process on
//! `tokio::sync` primitives; see the crate-level docs in Cargo.toml for the
//! ZMQ transport seam.

mod events_ext;
mod pattern;

pub use events_ext::{publish_event, subscribe_events, EventSubscription};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// A published message: subject plus a self-describing JSON document (§6).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub subject: String,
    pub payload: Value,
}

/// A pending request waiting for a reply, handed to whichever task is
/// consuming a [`ReplyReceiver`] registered for the request's subject.
pub struct PendingRequest {
    pub payload: Value,
    reply: oneshot::Sender<Value>,
}

impl PendingRequest {
    pub fn respond(self, payload: Value) {
        // The requester may have already timed out and dropped its receiver;
        // that's not an error for the replier.
        let _ = self.reply.send(payload);
    }
}

/// The receiving half registered by `register_replier`. Long-lived — a
/// single task typically owns one of these for the lifetime of the process
/// (e.g. a reference agent owns the receiver for its own assign subject).
pub struct ReplyReceiver {
    inner: mpsc::UnboundedReceiver<PendingRequest>,
}

impl ReplyReceiver {
    pub async fn recv(&mut self) -> Option<PendingRequest> {
        self.inner.recv().await
    }
}

/// The receiving half returned by `subscribe`.
pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if pattern::matches(&self.pattern, &envelope.subject) => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        skipped,
                        "subscriber fell behind, skipping buffered messages"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("no replier registered for subject {0}")]
    NoReplier(String),
    #[error("request to {subject} timed out after {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u64 },
    #[error("transport unreachable: {0}")]
    Transport(String),
}

/// The Event Bus adapter contract (§4.A).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget publish. Never fails the caller; callers must treat
    /// publish as best-effort (§4.A) — failures, if any, are only logged.
    async fn publish(&self, subject: &str, payload: Value);

    /// Subscribe to a subject pattern (`*` matches one dot-segment).
    fn subscribe(&self, pattern: &str) -> Subscription;

    /// Synchronous request/reply. Returns the first reply or `BusError::Timeout`.
    async fn request(&self, subject: &str, payload: Value, timeout: Duration) -> Result<Value, BusError>;

    /// Register as the replier for `subject`. Only one replier may be
    /// registered per subject at a time; registering again replaces it.
    fn register_replier(&self, subject: &str) -> ReplyReceiver;
}

/// Default in-process implementation: a single broadcast channel carries
/// every published envelope, and subscribers filter by pattern client-side.
/// This gives every subscriber its own in-arrival-order view of the stream
/// (per-subject ordering, §5) without the bus maintaining per-subject
/// broadcast channels.
pub struct InProcessBus {
    tx: broadcast::Sender<Envelope>,
    repliers: RwLock<HashMap<String, mpsc::UnboundedSender<PendingRequest>>>,
}

impl InProcessBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self {
            tx,
            repliers: RwLock::new(HashMap::new()),
        })
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        // Used only where an owned (non-Arc) value is convenient, e.g. tests
        // that never need subscribers to outlive the constructor's scope.
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            tx,
            repliers: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, subject: &str, payload: Value) {
        // broadcast::Sender::send only fails when there are no receivers,
        // which is not a transport failure — it's simply nobody listening.
        let _ = self.tx.send(Envelope {
            subject: subject.to_string(),
            payload,
        });
    }

    fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    async fn request(&self, subject: &str, payload: Value, timeout: Duration) -> Result<Value, BusError> {
        let sender = {
            let repliers = self.repliers.read();
            repliers.get(subject).cloned()
        };
        let Some(sender) = sender else {
            return Err(BusError::NoReplier(subject.to_string()));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(PendingRequest {
                payload,
                reply: reply_tx,
            })
            .map_err(|_| BusError::Transport(format!("replier for {subject} is gone")))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BusError::Transport(format!(
                "replier for {subject} dropped without responding"
            ))),
            Err(_) => Err(BusError::Timeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn register_replier(&self, subject: &str) -> ReplyReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.repliers.write().insert(subject.to_string(), tx);
        ReplyReceiver { inner: rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_subscribe_round_trips_payload() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("job.created");

        bus.publish("job.created", json!({"id": "abc"})).await;

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.subject, "job.created");
        assert_eq!(envelope.payload, json!({"id": "abc"}));
    }

    #[tokio::test]
    async fn wildcard_subscription_matches_any_segment() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("job.*.terminal");

        bus.publish("job.j1.terminal", json!("done")).await;
        bus.publish("job.created", json!("ignored")).await;

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.subject, "job.j1.terminal");
    }

    #[tokio::test]
    async fn request_without_replier_fails_fast() {
        let bus = InProcessBus::new();
        let result = bus
            .request("agent.x.assign", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(BusError::NoReplier(_))));
    }

    #[tokio::test]
    async fn request_times_out_when_replier_never_responds() {
        let bus = InProcessBus::new();
        let mut receiver = bus.register_replier("agent.x.assign");
        tokio::spawn(async move {
            // Receive but never respond — simulates an unresponsive agent.
            let _pending = receiver.recv().await;
        });

        let result = bus
            .request("agent.x.assign", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(BusError::Timeout { .. })));
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let bus = InProcessBus::new();
        let mut receiver = bus.register_replier("agent.x.assign");

        tokio::spawn(async move {
            let pending = receiver.recv().await.unwrap();
            pending.respond(json!({"accepted": true}));
        });

        let reply = bus
            .request("agent.x.assign", json!({"job": "j1"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, json!({"accepted": true}));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_rather_than_errors() {
        let bus = InProcessBus::with_capacity(2);
        let mut sub = bus.subscribe("job.created");

        for i in 0..10 {
            bus.publish("job.created", json!(i)).await;
        }
        // The slow subscriber missed messages but recv keeps working rather
        // than returning an error to the caller.
        assert!(sub.recv().await.is_some());
    }
}
