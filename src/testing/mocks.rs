//! In-memory message bus for testing
//!
//! Routes published envelopes back to the subscriber when the topic matches the
//! subscription filter, so the client can be exercised without an MQTT broker.

use crate::client::{event_handler, EventHandler};
use crate::protocol::{topic_matches, validate_publish_topic, Event, MessageEnvelope};
use crate::transport::{BusError, MessageBus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

pub type PublishedEnvelope = (String, MessageEnvelope);
pub type DeliveredEvent = (String, Event);

/// Handler that forwards every `(topic, event)` it receives to the returned channel
pub fn recording_handler() -> (EventHandler, mpsc::UnboundedReceiver<DeliveredEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = event_handler(move |topic, event| {
        let _ = tx.send((topic.to_string(), event));
    });
    (handler, rx)
}

enum Delivery {
    Envelope(MessageEnvelope),
    Error(BusError),
}

struct Subscription {
    filter: String,
    queue: mpsc::UnboundedSender<Delivery>,
}

/// Mock message bus for testing
#[derive(Default)]
pub struct InMemoryBus {
    published: Arc<Mutex<Vec<PublishedEnvelope>>>,
    published_notify: Notify,
    subscription: Mutex<Option<Subscription>>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure() -> Self {
        let bus = Self::default();
        bus.fail_connect.store(true, Ordering::SeqCst);
        bus
    }

    pub fn with_subscribe_failure() -> Self {
        let bus = Self::default();
        bus.fail_subscribe.store(true, Ordering::SeqCst);
        bus
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn subscribed_filter(&self) -> Option<String> {
        self.subscription
            .lock()
            .await
            .as_ref()
            .map(|s| s.filter.clone())
    }

    pub async fn get_published(&self) -> Vec<PublishedEnvelope> {
        self.published.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
    }

    /// Wait until at least `count` envelopes were published, or `timeout` elapses.
    /// Returns everything published so far.
    pub async fn wait_for_published(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<PublishedEnvelope> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.published_notify.notified();
                if self.published.lock().await.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.get_published().await
    }

    /// Deliver an envelope to the subscriber as if it arrived on `topic`.
    /// Returns false when nothing is subscribed.
    pub async fn inject(&self, topic: &str, mut envelope: MessageEnvelope) -> bool {
        envelope.received_topic = topic.to_string();
        self.deliver(Delivery::Envelope(envelope)).await
    }

    /// Deliver an asynchronous bus error to the subscriber
    pub async fn inject_error(&self, error: BusError) -> bool {
        self.deliver(Delivery::Error(error)).await
    }

    async fn deliver(&self, delivery: Delivery) -> bool {
        match self.subscription.lock().await.as_ref() {
            Some(subscription) => subscription.queue.send(delivery).is_ok(),
            None => false,
        }
    }

    /// Single forwarding worker per subscription keeps adapter order
    fn spawn_forwarder(
        mut queue: mpsc::UnboundedReceiver<Delivery>,
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) {
        tokio::spawn(async move {
            while let Some(delivery) = queue.recv().await {
                let delivered = match delivery {
                    Delivery::Envelope(envelope) => messages.send(envelope).await.is_ok(),
                    Delivery::Error(error) => errors.send(error).await.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BusError::SubscriptionFailed(
                "Mock subscription failure".into(),
            ));
        }
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        let (queue, queue_rx) = mpsc::unbounded_channel();
        Self::spawn_forwarder(queue_rx, messages, errors);
        *self.subscription.lock().await = Some(Subscription {
            filter: topic.to_string(),
            queue,
        });
        Ok(())
    }

    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::PublishFailed("Mock publish failure".into()));
        }
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        validate_publish_topic(topic).map_err(|e| BusError::PublishFailed(Box::new(e)))?;

        self.published
            .lock()
            .await
            .push((topic.to_string(), envelope.clone()));
        self.published_notify.notify_waiters();

        if let Some(subscription) = self.subscription.lock().await.as_ref() {
            if topic_matches(&subscription.filter, topic) {
                let mut routed = envelope;
                routed.received_topic = topic.to_string();
                let _ = subscription.queue.send(Delivery::Envelope(routed));
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the queue ends the forwarding worker
        self.subscription.lock().await.take();
        Ok(())
    }
}
