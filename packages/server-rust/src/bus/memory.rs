//! In-process broker. Every publish is fanned out to the subscriptions whose
//! filter matches the topic.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use docbridge_core::topic_matches;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::{
    check_payload_size, validate_filter, BusError, RequestMessage, DEFAULT_MAX_PAYLOAD_BYTES,
    SUBSCRIPTION_BUFFER,
};
use crate::traits::BusTransport;

struct Subscription {
    pattern: String,
    tx: mpsc::Sender<RequestMessage>,
}

pub struct MemoryBus {
    subscriptions: RwLock<Vec<Subscription>>,
    max_payload: usize,
    closed: AtomicBool,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            max_payload,
            closed: AtomicBool::new(false),
        }
    }

    /// Delivers `msg` to every matching subscription and returns how many
    /// received it. Full subscriber queues drop the message (QoS 0).
    ///
    /// # Errors
    ///
    /// Fails when the bus is disconnected or the payload is oversized.
    pub fn send(&self, msg: RequestMessage) -> Result<usize, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        check_payload_size(&msg.payload, self.max_payload)?;

        let mut delivered = 0;
        let mut stale = false;
        for sub in self.subscriptions.read().iter() {
            if !topic_matches(&sub.pattern, &msg.topic) {
                continue;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        topic = %msg.topic,
                        pattern = %sub.pattern,
                        "subscriber queue full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => stale = true,
            }
        }
        if stale {
            self.subscriptions.write().retain(|sub| !sub.tx.is_closed());
        }
        debug!(topic = %msg.topic, delivered, "message routed");
        Ok(delivered)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().iter().filter(|s| !s.tx.is_closed()).count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<RequestMessage>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        validate_filter(pattern)?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscriptions.write().push(Subscription {
            pattern: pattern.to_string(),
            tx,
        });
        debug!(pattern, "subscribed");
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.send(RequestMessage::new(topic, payload)).map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::Release);
        self.subscriptions.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_filter() {
        let bus = MemoryBus::new();
        let mut app = bus.subscribe("app/#").await.unwrap();
        let mut other = bus.subscribe("other/+").await.unwrap();

        bus.publish("app/ack", Bytes::from_static(b"1")).await.unwrap();

        let got = app.recv().await.unwrap();
        assert_eq!(got.topic, "app/ack");
        assert_eq!(got.payload, Bytes::from_static(b"1"));
        assert!(got.response_topics.is_none());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_keeps_reply_topics() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("mongodb/#").await.unwrap();
        let msg = RequestMessage::new("mongodb/db/find", "{}").with_response_topics(["app/r"]);
        assert_eq!(bus.send(msg.clone()).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let bus = MemoryBus::new();
        drop(bus.subscribe("a/#").await.unwrap());
        assert_eq!(bus.send(RequestMessage::new("a/b", "")).unwrap(), 0);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn oversized_payloads_are_rejected() {
        let bus = MemoryBus::with_max_payload(2);
        let err = bus.publish("a", Bytes::from_static(b"abc")).await.unwrap_err();
        assert!(matches!(err, BusError::PayloadTooLarge { size: 3, max: 2 }));
    }

    #[tokio::test]
    async fn disconnect_ends_subscriptions() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("a/#").await.unwrap();
        bus.disconnect().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(matches!(bus.publish("a/b", Bytes::new()).await, Err(BusError::Closed)));
    }
}
