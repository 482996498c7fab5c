//! Impure I/O operations for the MQTT adapter
//!
//! This module owns the rumqttc client and event loop task. Routing and codec
//! decisions are delegated to the pure [`MessageHandler`].

use super::connection::{configure_mqtt_options, ConnectionState, CONNECT_TIMEOUT, DISCONNECT_GRACE};
use super::message_handler::{EventRoute, MessageHandler};
use crate::bus_span;
use crate::protocol::MessageEnvelope;
use crate::transport::{BusConfig, BusError, MessageBus};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Requests queued between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// The single subscription registered through [`MessageBus::subscribe`]
#[derive(Clone)]
struct Subscription {
    filter: String,
    messages: mpsc::Sender<MessageEnvelope>,
    errors: mpsc::Sender<BusError>,
}

/// MQTT adapter backed by rumqttc
pub struct MqttBus {
    mqtt_options: MqttOptions,
    client: Mutex<AsyncClient>,
    event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
    subscription: Arc<Mutex<Option<Subscription>>>,
    connect_timeout: Duration,
}

impl MqttBus {
    pub fn new(config: &BusConfig) -> Result<Self, BusError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options.clone(), REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            mqtt_options,
            client: Mutex::new(client),
            event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_tx,
            state_rx,
            shutdown_tx,
            closing: Arc::new(AtomicBool::new(false)),
            subscription: Arc::new(Mutex::new(None)),
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Override how long `connect` waits for the broker's ConnAck
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().can_publish()
    }

    async fn client(&self) -> AsyncClient {
        self.client.lock().await.clone()
    }

    /// Event loop for the next connection attempt. A loop consumed by an earlier
    /// attempt is replaced together with its client handle.
    async fn take_event_loop(&self) -> EventLoop {
        if let Some(event_loop) = self.event_loop.lock().await.take() {
            return event_loop;
        }
        debug!("Rebuilding MQTT client for a new connection attempt");
        let (client, event_loop) = AsyncClient::new(self.mqtt_options.clone(), REQUEST_CAPACITY);
        *self.client.lock().await = client;
        event_loop
    }

    /// Wait for a signalled event loop task to finish, aborting it after the grace period
    async fn join_event_loop(mut handle: JoinHandle<()>) {
        if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
            warn!("MQTT event loop didn't stop in time, aborting");
            handle.abort();
        }
    }

    fn check_connection_state(&self) -> Result<(), BusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(BusError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(BusError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(BusError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Send `item` unless shutdown is requested first.
    /// Returns false when the loop should stop.
    async fn forward<T>(
        sender: &mpsc::Sender<T>,
        item: T,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            sent = sender.send(item) => sent.is_ok(),
            _ = shutdown_requested(shutdown_rx) => false,
        }
    }

    async fn report_error(
        subscription: &Arc<Mutex<Option<Subscription>>>,
        error: BusError,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let errors = subscription.lock().await.as_ref().map(|s| s.errors.clone());
        match errors {
            Some(errors) => Self::forward(&errors, error, shutdown_rx).await,
            None => {
                warn!("MQTT error before subscription: {}", error);
                true
            }
        }
    }

    /// Drive the rumqttc event loop until shutdown, broker disconnect or error
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        closing: Arc<AtomicBool>,
        subscription: Arc<Mutex<Option<Subscription>>>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => {
                    debug!("Shutdown signal received, stopping MQTT event loop");
                    break;
                }

                polled = event_loop.poll() => {
                    let event = match polled {
                        Ok(event) => event,
                        Err(e) => {
                            let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                            if closing.load(Ordering::SeqCst) {
                                debug!("MQTT connection closed: {}", e);
                            } else {
                                error!("MQTT event loop error: {}", e);
                                Self::report_error(
                                    &subscription,
                                    BusError::ConnectionFailed(Box::new(e)),
                                    &mut shutdown_rx,
                                )
                                .await;
                            }
                            break;
                        }
                    };

                    match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            let _ = state_tx.send(ConnectionState::Connected);
                        }
                        EventRoute::MessageReceived { topic, payload } => {
                            debug!("Received MQTT message on topic: {}", topic);
                            let current = subscription.lock().await.clone();
                            let Some(current) = current else {
                                debug!("No subscription registered, dropping message on {}", topic);
                                continue;
                            };
                            let delivered = match MessageHandler::decode_envelope(&topic, &payload) {
                                Ok(envelope) => {
                                    Self::forward(&current.messages, envelope, &mut shutdown_rx).await
                                }
                                Err(e) => Self::forward(&current.errors, e, &mut shutdown_rx).await,
                            };
                            if !delivered {
                                break;
                            }
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, accepted } => {
                            if accepted {
                                debug!("Subscription confirmed: packet {}", packet_id);
                            } else {
                                let error = BusError::SubscriptionFailed(
                                    format!("Broker rejected subscription (packet {packet_id})").into(),
                                );
                                if !Self::report_error(&subscription, error, &mut shutdown_rx).await {
                                    break;
                                }
                            }
                        }
                        EventRoute::Disconnected => {
                            let reason = "Disconnected by broker".to_string();
                            let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
                            if !closing.load(Ordering::SeqCst) {
                                Self::report_error(
                                    &subscription,
                                    BusError::ConnectionFailedStr(reason),
                                    &mut shutdown_rx,
                                )
                                .await;
                            }
                            break;
                        }
                        EventRoute::DisconnectSent => {
                            let _ = state_tx.send(ConnectionState::Disconnected(
                                "Client disconnected".to_string(),
                            ));
                            break;
                        }
                        EventRoute::InfrastructureEvent(event_str) => {
                            debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                        }
                        EventRoute::OutgoingEvent => {}
                    }
                }
            }
        }
        info!("MQTT event loop stopped");
    }
}

/// Resolves once shutdown is requested or the shutdown sender is gone
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&self) -> Result<(), BusError> {
        let mut handle_slot = self.event_loop_handle.lock().await;
        if handle_slot.is_some() {
            return Err(BusError::ConnectionFailedStr(
                "Event loop already started".to_string(),
            ));
        }

        let event_loop = self.take_event_loop().await;
        self.state_tx.send_replace(ConnectionState::Connecting);
        self.shutdown_tx.send_replace(false);
        self.closing.store(false, Ordering::SeqCst);

        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                self.state_tx.clone(),
                self.shutdown_tx.subscribe(),
                self.closing.clone(),
                self.subscription.clone(),
            )
            .instrument(bus_span!(kind = "mqtt")),
        );

        match Self::wait_for_connection_confirmation(self.state_rx.clone(), self.connect_timeout)
            .await
        {
            Ok(()) => {
                *handle_slot = Some(handle);
                info!("Connected to MQTT broker");
                Ok(())
            }
            Err(e) => {
                // The failed attempt leaves nothing running, so connect can be retried
                self.shutdown_tx.send_replace(true);
                Self::join_event_loop(handle).await;
                Err(e)
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        messages: mpsc::Sender<MessageEnvelope>,
        errors: mpsc::Sender<BusError>,
    ) -> Result<(), BusError> {
        self.check_connection_state()?;

        *self.subscription.lock().await = Some(Subscription {
            filter: topic.to_string(),
            messages,
            errors,
        });

        self.client()
            .await
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| {
                BusError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into())
            })?;

        info!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<(), BusError> {
        self.check_connection_state()?;

        let payload = MessageHandler::encode_envelope(&envelope)?;
        self.client()
            .await
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::PublishFailed(Box::new(e)))?;

        debug!(
            "Published envelope {} to {}",
            envelope.correlation_id, topic
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let Some(handle) = self.event_loop_handle.lock().await.take() else {
            debug!("Disconnect requested before connect, nothing to do");
            return Ok(());
        };

        self.closing.store(true, Ordering::SeqCst);

        let mut result = Ok(());
        if self.is_connected() {
            result = self
                .client()
                .await
                .disconnect()
                .await
                .map_err(|e| BusError::DisconnectFailed(Box::new(e)));
        }

        let mut handle = handle;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
            warn!("MQTT event loop didn't stop gracefully, signalling shutdown");
            self.shutdown_tx.send_replace(true);
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        if let Some(subscription) = self.subscription.lock().await.take() {
            debug!("Dropped subscription to {}", subscription.filter);
        }

        info!("MQTT client disconnected");
        result
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Ok(mut guard) = self.event_loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
