//! Client lifecycle and message dispatch
//!
//! [`EdgexClient`] owns the message bus, the inbound channels and the stop
//! broadcast. `start` connects, subscribes and spawns the dispatch loop (plus
//! the publish loop when enabled); `stop` broadcasts, disconnects and waits for
//! the loops to finish.

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::observability::init_from_level_name;
use crate::protocol::{Event, MessageEnvelope, TEST_EVENT_TOPIC};
use crate::signals::spawn_signal_watcher;
use crate::transport::{new_message_bus, BusError, MessageBus};
use crate::dispatch_span;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

/// User callback receiving `(received_topic, event)`
pub type EventHandler = Arc<dyn Fn(&str, Event) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn event_handler<F>(handler: F) -> EventHandler
where
    F: Fn(&str, Event) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Handler printing every event and its readings to stdout
pub fn printing_handler() -> EventHandler {
    event_handler(|topic, event| println!("{}", describe_event(topic, &event)))
}

/// One line for the event followed by one line per reading
pub fn describe_event(topic: &str, event: &Event) -> String {
    let mut lines = vec![format!("Received event - topic: {topic}, event id: {}", event.id)];
    for reading in &event.readings {
        lines.push(format!(
            "  Reading: Device={}, Resource={}, ValueType={}, Value={}",
            reading.device_name,
            reading.resource_name,
            reading.value_type,
            reading.value()
        ));
    }
    lines.join("\n")
}

/// Client lifecycle: `Created -> Started -> Stopped`, no restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Started,
    Stopped,
}

/// Rendezvous-style inbound channels, allocated at construction
struct Inbound {
    messages_tx: mpsc::Sender<MessageEnvelope>,
    messages_rx: mpsc::Receiver<MessageEnvelope>,
    errors_tx: mpsc::Sender<BusError>,
    errors_rx: mpsc::Receiver<BusError>,
}

impl Inbound {
    fn new() -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Self {
            messages_tx,
            messages_rx,
            errors_tx,
            errors_rx,
        }
    }
}

struct Lifecycle {
    state: ClientState,
    inbound: Option<Inbound>,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    config: Arc<Config>,
    bus: Arc<dyn MessageBus>,
    handler: Option<EventHandler>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<ClientState>,
    stop_tx: watch::Sender<bool>,
    stopped_tx: watch::Sender<bool>,
    signal_handling: AtomicBool,
}

/// Handle to a running client. Clones share the same client.
#[derive(Clone)]
pub struct EdgexClient {
    inner: Arc<Inner>,
}

impl EdgexClient {
    /// Load configuration, initialise logging and build the configured bus
    pub fn new(config_path: Option<&Path>, handler: Option<EventHandler>) -> ClientResult<Self> {
        let config = Config::load(config_path, None)?;
        init_from_level_name(&config.log_level);
        Self::from_config(config, handler)
    }

    /// Build the configured bus for an already loaded configuration
    pub fn from_config(config: Config, handler: Option<EventHandler>) -> ClientResult<Self> {
        let bus = new_message_bus(&config.bus_config())?;
        info!(
            broker = %format!("{}://{}:{}", config.broker.protocol, config.broker.host, config.broker.port),
            bus_type = %config.kind,
            client_id = %config.client_id,
            "Client created"
        );
        Ok(Self::with_bus(config, bus, handler))
    }

    /// Build a client around an already constructed bus
    pub fn with_bus(
        config: Config,
        bus: Arc<dyn MessageBus>,
        handler: Option<EventHandler>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ClientState::Created);
        let (stop_tx, _) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                bus,
                handler,
                lifecycle: Mutex::new(Lifecycle {
                    state: ClientState::Created,
                    inbound: Some(Inbound::new()),
                    workers: Vec::new(),
                }),
                state_tx,
                stop_tx,
                stopped_tx,
                signal_handling: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config.clone()
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state_tx.borrow()
    }

    /// Enable or disable the SIGINT/SIGTERM watcher spawned by `start`
    pub fn set_signal_handling(&self, enabled: bool) {
        self.inner.signal_handling.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.inner.stop_tx.subscribe()
    }

    /// Connect, subscribe and spawn the client loops
    pub async fn start(&self) -> ClientResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match lifecycle.state {
            ClientState::Created => {}
            ClientState::Started => return Err(ClientError::AlreadyStarted),
            ClientState::Stopped => return Err(ClientError::Stopped),
        }

        let (messages_tx, errors_tx) = match lifecycle.inbound.as_ref() {
            Some(inbound) => (inbound.messages_tx.clone(), inbound.errors_tx.clone()),
            None => return Err(ClientError::AlreadyStarted),
        };

        let config = &self.inner.config;
        self.inner.bus.connect().await?;
        info!(
            host = %config.broker.host,
            port = config.broker.port,
            "Connected to message bus"
        );

        if let Err(e) = self
            .inner
            .bus
            .subscribe(&config.topic, messages_tx, errors_tx)
            .await
        {
            if let Err(disconnect_error) = self.inner.bus.disconnect().await {
                warn!("Disconnect after failed subscribe failed: {}", disconnect_error);
            }
            return Err(e.into());
        }
        info!(topic = %config.topic, "Subscribed");

        let Some(inbound) = lifecycle.inbound.take() else {
            return Err(ClientError::AlreadyStarted);
        };
        // Only the adapter keeps senders from here on
        let Inbound {
            messages_rx,
            errors_rx,
            ..
        } = inbound;

        lifecycle.workers.push(tokio::spawn(
            run_dispatch_loop(
                messages_rx,
                errors_rx,
                self.inner.handler.clone(),
                self.stop_receiver(),
            )
            .instrument(dispatch_span!(worker = "dispatch")),
        ));

        if config.publish {
            let interval = Duration::from_secs(config.publish_interval);
            lifecycle.workers.push(tokio::spawn(
                run_publish_loop(self.inner.bus.clone(), interval, self.stop_receiver())
                    .instrument(dispatch_span!(worker = "publish")),
            ));
            info!(
                interval_secs = config.publish_interval,
                topic = TEST_EVENT_TOPIC,
                "Periodic publishing enabled"
            );
        }

        lifecycle.state = ClientState::Started;
        self.inner.state_tx.send_replace(ClientState::Started);
        drop(lifecycle);

        if self.inner.signal_handling.load(Ordering::SeqCst) {
            // Not tracked with the workers: the watcher may itself call stop
            spawn_signal_watcher(self.clone());
        }

        Ok(())
    }

    /// Broadcast stop, disconnect the bus and wait for the loops.
    ///
    /// Only the first call has an effect.
    pub async fn stop(&self) {
        let workers = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            match lifecycle.state {
                ClientState::Stopped => {
                    debug!("Client already stopped");
                    return;
                }
                ClientState::Created => {
                    lifecycle.state = ClientState::Stopped;
                    lifecycle.inbound = None;
                    self.inner.stop_tx.send_replace(true);
                    self.inner.state_tx.send_replace(ClientState::Stopped);
                    self.inner.stopped_tx.send_replace(true);
                    info!("Client stopped before start");
                    return;
                }
                ClientState::Started => {}
            }
            lifecycle.state = ClientState::Stopped;
            std::mem::take(&mut lifecycle.workers)
        };

        self.inner.stop_tx.send_replace(true);

        if let Err(e) = self.inner.bus.disconnect().await {
            error!("Failed to disconnect message bus: {}", e);
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Client worker ended abnormally: {}", e);
            }
        }

        self.inner.state_tx.send_replace(ClientState::Stopped);
        self.inner.stopped_tx.send_replace(true);
        info!("Client stopped");
    }

    /// Resolve once `stop` has completed
    pub async fn wait_for_stop(&self) {
        let mut stopped = self.inner.stopped_tx.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    /// Serialize `event` and publish it to `topic`
    pub async fn publish_event(&self, event: &Event, topic: &str) -> ClientResult<()> {
        publish_to_bus(self.inner.bus.as_ref(), event, topic).await?;
        info!(topic = %topic, event_id = %event.id, "Published event");
        Ok(())
    }

    /// Publish a freshly built synthetic event to `topic`
    pub async fn publish_test_event(&self, topic: &str) -> ClientResult<()> {
        publish_test_event_on(self.inner.bus.as_ref(), topic).await
    }
}

async fn publish_to_bus(bus: &dyn MessageBus, event: &Event, topic: &str) -> ClientResult<()> {
    let payload = serde_json::to_vec(event).map_err(ClientError::Serialize)?;
    let envelope = MessageEnvelope::json(payload);
    debug!(topic = %topic, correlation_id = %envelope.correlation_id, "Publishing envelope");
    bus.publish(envelope, topic).await?;
    Ok(())
}

async fn publish_test_event_on(bus: &dyn MessageBus, topic: &str) -> ClientResult<()> {
    let event = Event::test_event();
    publish_to_bus(bus, &event, topic).await?;
    info!(topic = %topic, event_id = %event.id, "Published test event");
    Ok(())
}

/// Content type gate and payload decode for one inbound envelope
pub fn decode_inbound(envelope: &MessageEnvelope) -> ClientResult<Event> {
    if !envelope.is_json() {
        return Err(ClientError::ContentType {
            got: envelope.content_type.clone(),
        });
    }
    serde_json::from_slice(&envelope.payload).map_err(ClientError::Decode)
}

fn dispatch_envelope(handler: Option<&EventHandler>, envelope: MessageEnvelope) {
    info!(
        topic = %envelope.received_topic,
        correlation_id = %envelope.correlation_id,
        "Received message"
    );

    let event = match decode_inbound(&envelope) {
        Ok(event) => event,
        Err(e) => {
            error!(topic = %envelope.received_topic, "{}", e);
            return;
        }
    };

    let Some(handler) = handler else {
        return;
    };
    let topic = envelope.received_topic;
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&topic, event))) {
        error!(
            topic = %topic,
            "Event handler panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Resolves once the stop flag is set or the client is gone
pub(crate) async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

async fn run_dispatch_loop(
    mut messages: mpsc::Receiver<MessageEnvelope>,
    mut errors: mpsc::Receiver<BusError>,
    handler: Option<EventHandler>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut messages_open = true;
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;

            _ = stop_requested(&mut stop_rx) => break,

            error = errors.recv(), if errors_open => match error {
                Some(e) => error!("Message bus error: {}", e),
                None => {
                    debug!("Error channel closed");
                    errors_open = false;
                }
            },

            envelope = messages.recv(), if messages_open => match envelope {
                Some(envelope) => dispatch_envelope(handler.as_ref(), envelope),
                None => {
                    debug!("Envelope channel closed");
                    messages_open = false;
                }
            },
        }
    }
    debug!("Dispatch loop stopped");
}

async fn run_publish_loop(
    bus: Arc<dyn MessageBus>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // A publish that overruns the period drops missed ticks instead of bursting
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // First tick completes immediately, skip it

    loop {
        tokio::select! {
            biased;

            _ = stop_requested(&mut stop_rx) => break,

            _ = interval.tick() => {
                if let Err(e) = publish_test_event_on(bus.as_ref(), TEST_EVENT_TOPIC).await {
                    error!("Failed to publish test event: {}", e);
                }
            }
        }
    }
    debug!("Publish loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CONTENT_TYPE_JSON;
    use crate::testing::{recording_handler, InMemoryBus};

    fn test_client(bus: Arc<InMemoryBus>, handler: Option<EventHandler>) -> EdgexClient {
        let client = EdgexClient::with_bus(Config::default(), bus, handler);
        client.set_signal_handling(false);
        client
    }

    /// Bus whose first publish overruns several publish periods
    #[derive(Default)]
    struct SlowFirstPublishBus {
        publish_starts: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait::async_trait]
    impl MessageBus for SlowFirstPublishBus {
        async fn connect(&self) -> Result<(), BusError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _messages: mpsc::Sender<MessageEnvelope>,
            _errors: mpsc::Sender<BusError>,
        ) -> Result<(), BusError> {
            Ok(())
        }

        async fn publish(&self, _envelope: MessageEnvelope, _topic: &str) -> Result<(), BusError> {
            let first = {
                let mut starts = self.publish_starts.lock().await;
                starts.push(tokio::time::Instant::now());
                starts.len() == 1
            };
            if first {
                tokio::time::sleep(Duration::from_millis(180)).await;
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn envelope_for(event: &Event) -> MessageEnvelope {
        MessageEnvelope::json(serde_json::to_vec(event).unwrap())
    }

    #[test]
    fn test_decode_inbound_accepts_json_event() {
        let mut event = Event::new("dev", "prof", "src");
        event.add_simple_reading("temp", "Int32", "42");

        let decoded = decode_inbound(&envelope_for(&event)).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_inbound_rejects_content_type() {
        let envelope = MessageEnvelope::new(b"{}".to_vec(), "text/plain");
        let result = decode_inbound(&envelope);
        assert!(matches!(
            result,
            Err(ClientError::ContentType { got }) if got == "text/plain"
        ));
    }

    #[test]
    fn test_decode_inbound_rejects_malformed_payload() {
        let envelope = MessageEnvelope::new(br#"{"id":"#.to_vec(), CONTENT_TYPE_JSON);
        assert!(matches!(
            decode_inbound(&envelope),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn test_dispatch_traps_handler_panic() {
        let handler = event_handler(|_, _| panic!("handler failure"));
        let envelope = envelope_for(&Event::new("dev", "prof", "src"));
        dispatch_envelope(Some(&handler), envelope);
    }

    #[test]
    fn test_describe_event() {
        let mut event = Event::new("dev", "prof", "src");
        event.id = "E-1".to_string();
        event.add_simple_reading("temp", "Int32", "42");

        let text = describe_event("edgex/events/ns/dev", &event);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("edgex/events/ns/dev"));
        assert!(lines[0].contains("E-1"));
        assert_eq!(
            lines[1],
            "  Reading: Device=dev, Resource=temp, ValueType=Int32, Value=42"
        );
    }

    #[test]
    fn test_from_config_rejects_unknown_bus_type() {
        let config = Config {
            kind: "zeromq".to_string(),
            ..Config::default()
        };
        let result = EdgexClient::from_config(config, None);
        assert!(matches!(
            result,
            Err(ClientError::Bus(BusError::UnsupportedType(_)))
        ));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_start_connects_and_subscribes() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);
        assert_eq!(client.state(), ClientState::Created);

        client.start().await.unwrap();
        assert_eq!(client.state(), ClientState::Started);
        assert_eq!(bus.connect_calls(), 1);
        assert_eq!(bus.subscribed_filter().await.as_deref(), Some("edgex/events/#"));

        client.stop().await;
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);

        client.start().await.unwrap();
        assert!(matches!(
            client.start().await,
            Err(ClientError::AlreadyStarted)
        ));
        assert_eq!(bus.connect_calls(), 1);

        client.stop().await;
        assert!(matches!(client.start().await, Err(ClientError::Stopped)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_bus_error() {
        let bus = Arc::new(InMemoryBus::with_connect_failure());
        let client = test_client(bus.clone(), None);

        let result = client.start().await;
        assert!(matches!(result, Err(ClientError::Bus(_))));
        assert_eq!(client.state(), ClientState::Created);
        assert_eq!(bus.subscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_disconnects() {
        let bus = Arc::new(InMemoryBus::with_subscribe_failure());
        let client = test_client(bus.clone(), None);

        let result = client.start().await;
        assert!(matches!(result, Err(ClientError::Bus(_))));
        assert_eq!(bus.disconnect_calls(), 1);
        assert_eq!(client.state(), ClientState::Created);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);

        client.start().await.unwrap();
        client.stop().await;
        client.stop().await;

        assert_eq!(bus.disconnect_calls(), 1);
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_disconnects_nothing() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);

        client.stop().await;
        assert_eq!(client.state(), ClientState::Stopped);
        assert_eq!(bus.disconnect_calls(), 0);
        client.wait_for_stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_stop_calls() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);
        client.start().await.unwrap();

        let a = client.clone();
        let b = client.clone();
        tokio::join!(a.stop(), b.stop());

        assert_eq!(bus.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_dispatch() {
        let bus = Arc::new(InMemoryBus::new());
        let (recorder, mut delivered) = recording_handler();
        let handler = event_handler(move |topic, event| {
            if event.id == "boom" {
                panic!("handler failure");
            }
            recorder(topic, event);
        });
        let client = test_client(bus.clone(), Some(handler));
        client.start().await.unwrap();

        let mut first = Event::new("dev", "prof", "src");
        first.id = "boom".to_string();
        let mut second = Event::new("dev", "prof", "src");
        second.id = "ok".to_string();

        assert!(bus.inject("edgex/events/a", envelope_for(&first)).await);
        assert!(bus.inject("edgex/events/b", envelope_for(&second)).await);

        let (topic, event) = tokio::time::timeout(Duration::from_secs(2), delivered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic, "edgex/events/b");
        assert_eq!(event.id, "ok");

        client.stop().await;
    }

    #[tokio::test]
    async fn test_publish_event_wraps_json_envelope() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);
        client.start().await.unwrap();

        let mut event = Event::new("dev", "prof", "src");
        event.add_simple_reading("temp", "Float64", "21.5");
        client.publish_event(&event, "app/out").await.unwrap();

        let published = bus.get_published().await;
        assert_eq!(published.len(), 1);
        let (topic, envelope) = &published[0];
        assert_eq!(topic, "app/out");
        assert_eq!(envelope.content_type, CONTENT_TYPE_JSON);
        assert_eq!(decode_inbound(envelope).unwrap(), event);

        client.stop().await;
    }

    #[tokio::test]
    async fn test_publish_error_surfaces_to_caller() {
        let bus = Arc::new(InMemoryBus::new());
        let client = test_client(bus.clone(), None);
        client.start().await.unwrap();

        bus.set_publish_failure(true);
        let result = client.publish_test_event(TEST_EVENT_TOPIC).await;
        assert!(matches!(result, Err(ClientError::Bus(_))));

        client.stop().await;
    }

    #[tokio::test]
    async fn test_publish_loop_drops_missed_ticks() {
        let bus = Arc::new(SlowFirstPublishBus::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(run_publish_loop(
            bus.clone(),
            Duration::from_millis(50),
            stop_rx,
        ));

        let collected = tokio::time::timeout(Duration::from_secs(2), async {
            while bus.publish_starts.lock().await.len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        stop_tx.send_replace(true);
        worker.await.unwrap();
        assert!(collected.is_ok(), "publish loop should keep publishing");

        // One overdue tick fires right after the slow publish, later ticks wait a full period
        let starts = bus.publish_starts.lock().await;
        let gap = starts[2] - starts[1];
        assert!(gap >= Duration::from_millis(40), "missed ticks fired in a burst: {gap:?}");
    }

    #[tokio::test]
    async fn test_bus_errors_are_logged_and_dispatch_continues() {
        let bus = Arc::new(InMemoryBus::new());
        let (handler, mut delivered) = recording_handler();
        let client = test_client(bus.clone(), Some(handler));
        client.start().await.unwrap();

        assert!(bus.inject_error(BusError::Received("garbage".to_string())).await);
        let event = Event::new("dev", "prof", "src");
        assert!(bus.inject("edgex/events/x", envelope_for(&event)).await);

        let (_, received) = tokio::time::timeout(Duration::from_secs(2), delivered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, event);

        client.stop().await;
    }
}
