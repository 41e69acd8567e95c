//! Typed convenience layer over [`EventBus`] for `compute_protocol` events.
//!
//! Nothing in the trait requires this — `publish`/`subscribe` are JSON in,
//! JSON out — but every producer in this workspace emits a `DomainEvent`,
//! never a bare subject/payload pair, so the typed helpers live here rather
//! than being hand-rolled at each call site.

use compute_protocol::DomainEvent;

use crate::{EventBus, Subscription};

/// Serializes `event` and publishes it on its own subject.
pub async fn publish_event(bus: &dyn EventBus, event: &DomainEvent) {
    let subject = event.subject().to_string();
    match serde_json::to_value(event) {
        Ok(payload) => bus.publish(&subject, payload).await,
        Err(err) => {
            tracing::error!(%subject, error = %err, "failed to serialize domain event, dropping publish");
        }
    }
}

/// A [`Subscription`] that deserializes each envelope as a [`DomainEvent`],
/// logging and skipping anything that doesn't parse instead of terminating
/// the stream.
pub struct EventSubscription {
    inner: Subscription,
}

impl EventSubscription {
    pub fn new(inner: Subscription) -> Self {
        Self { inner }
    }

    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            let envelope = self.inner.recv().await?;
            match serde_json::from_value::<DomainEvent>(envelope.payload.clone()) {
                Ok(event) => return Some(event),
                Err(err) => {
                    tracing::warn!(
                        subject = %envelope.subject,
                        error = %err,
                        "dropping envelope that does not decode as a domain event"
                    );
                    continue;
                }
            }
        }
    }
}

/// Convenience wrapper: subscribe and decode as [`DomainEvent`] in one call.
pub fn subscribe_events(bus: &dyn EventBus, pattern: &str) -> EventSubscription {
    EventSubscription::new(bus.subscribe(pattern))
}
