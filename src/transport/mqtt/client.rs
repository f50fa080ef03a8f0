//! Impure I/O operations for the MQTT client
//!
//! This module owns the network session: it drives the rumqttc event loop on a
//! background task, dispatches deliveries to the registered handler, and turns
//! the pure routing decisions from [`MessageHandler`] into state changes.
//!
//! There is no reconnection. A session that is lost after CONNACK reports the
//! cause once through [`ConnectionLostHandler`] and then stays disconnected.

use super::connection::{
    configure_mqtt_options, qos_number, BrokerEndpoint, ConnectionState, MqttError,
    CONNECT_TIMEOUT, SUBSCRIBE_TIMEOUT,
};
use super::message_handler::{
    ConnectionLostHandler, Delivery, DeliveryHandler, EventRoute, MessageHandler,
};
use crate::config::ConnectionSpec;
use crate::protocol::{topic_matches, validate_topic_filter};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use rustls::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SubAckSender = oneshot::Sender<Result<QoS, String>>;

/// The active subscription and where its messages go
struct Subscription {
    filter: String,
    handler: Arc<dyn DeliveryHandler>,
}

/// State shared between the client handle and the event loop task.
///
/// A delivery holds the `subscription` read lock for the whole handler call,
/// and `closing` is only set under the write lock.
struct SessionShared {
    closing: AtomicBool,
    subscription: RwLock<Option<Subscription>>,
    pending_suback: Mutex<Option<SubAckSender>>,
    observer: Arc<dyn ConnectionLostHandler>,
}

impl SessionShared {
    fn new(observer: Arc<dyn ConnectionLostHandler>) -> Self {
        Self {
            closing: AtomicBool::new(false),
            subscription: RwLock::new(None),
            pending_suback: Mutex::new(None),
            observer,
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop dispatch. Returns once no handler call is still running.
    async fn close_dispatch(&self) {
        let _subscription = self.subscription.write().await;
        self.closing.store(true, Ordering::SeqCst);
    }
}

/// A connected MQTT session
pub struct MqttClient {
    client_id: String,
    broker_url: String,
    client: AsyncClient,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<SessionShared>,
}

impl MqttClient {
    /// Open a session and wait for the broker to accept it.
    ///
    /// `tls` carries the prepared rustls configuration and must be present when
    /// `spec` requires transport security. `observer` is told when the
    /// established session is lost. Exactly one attempt is made.
    pub async fn connect(
        spec: &ConnectionSpec,
        tls: Option<Arc<ClientConfig>>,
        observer: Arc<dyn ConnectionLostHandler>,
    ) -> Result<Self, MqttError> {
        Self::connect_within(spec, tls, observer, CONNECT_TIMEOUT).await
    }

    /// Like [`MqttClient::connect`] with an explicit CONNACK deadline
    pub async fn connect_within(
        spec: &ConnectionSpec,
        tls: Option<Arc<ClientConfig>>,
        observer: Arc<dyn ConnectionLostHandler>,
        timeout: Duration,
    ) -> Result<Self, MqttError> {
        let endpoint = BrokerEndpoint::parse(&spec.broker_url)?;
        let mqtt_options = configure_mqtt_options(spec, &endpoint, tls)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(SessionShared::new(observer));

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx.clone(),
            shared.clone(),
            spec.client_id.clone(),
        ));

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx.clone(), timeout).await {
            handle.abort();
            return Err(e);
        }

        debug!(target: "mqtt_transport", "Session established with {}", spec.broker_url);
        Ok(Self {
            client_id: spec.client_id.clone(),
            broker_url: spec.broker_url.clone(),
            client,
            event_loop_handle: Some(handle),
            state_tx,
            state_rx,
            shared,
        })
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let current = state_rx.borrow_and_update().clone();
                match current {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::Connecting | ConnectionState::Disconnecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Drive the event loop until the session ends
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        shared: Arc<SessionShared>,
        client_id: String,
    ) {
        debug!(target: "mqtt_transport", "Starting MQTT event loop for client: {}", client_id);

        loop {
            let keep_running = match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    Self::process_event_route(route, &state_tx, &shared).await
                }
                Err(e) => {
                    Self::handle_event_loop_error(&e, &state_tx, &shared).await;
                    false
                }
            };
            if !keep_running {
                break;
            }
        }

        debug!(target: "mqtt_transport", "MQTT event loop stopped for client: {}", client_id);
    }

    /// Record that the session ended; the observer hears about it only for an
    /// established session that we did not close ourselves.
    async fn mark_lost(
        cause: String,
        state_tx: &watch::Sender<ConnectionState>,
        shared: &SessionShared,
    ) {
        let was_connected = matches!(*state_tx.borrow(), ConnectionState::Connected);

        // Dropping the sender fails any subscribe still waiting for SUBACK
        shared.pending_suback.lock().await.take();

        if was_connected && !shared.is_closing() {
            shared.observer.on_connection_lost(&cause);
        }
        let _ = state_tx.send(ConnectionState::Disconnected(cause));
    }

    /// Handle event loop error - extracted for testability
    async fn handle_event_loop_error(
        error: &ConnectionError,
        state_tx: &watch::Sender<ConnectionState>,
        shared: &SessionShared,
    ) {
        if shared.is_closing() {
            debug!(target: "mqtt_transport", "Event loop ended during shutdown: {}", error);
        } else {
            debug!(target: "mqtt_transport", "MQTT event loop error: {}", error);
        }
        Self::mark_lost(error.to_string(), state_tx, shared).await;
    }

    /// Process routed MQTT event - extracted for testability
    /// Returns true to continue loop, false to break
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        shared: &SessionShared,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let _ = state_tx.send(ConnectionState::Connected);
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                Self::mark_lost(format!("Connection refused: {reason}"), state_tx, shared).await;
                false
            }
            EventRoute::MessageReceived(delivery) => {
                Self::dispatch_delivery(&delivery, shared).await;
                true
            }
            EventRoute::SubscriptionAcknowledged { packet_id, outcome } => {
                debug!(target: "mqtt_transport", "SUBACK for packet {}: {:?}", packet_id, outcome);
                match shared.pending_suback.lock().await.take() {
                    Some(waiter) => {
                        let _ = waiter.send(outcome);
                    }
                    None => warn!("Unexpected SUBACK for packet {}", packet_id),
                }
                true
            }
            EventRoute::Disconnected => {
                Self::mark_lost("Broker closed the connection".to_string(), state_tx, shared)
                    .await;
                false
            }
            EventRoute::DisconnectSent => {
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "Client disconnected".to_string(),
                ));
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Hand a delivery to the subscription handler, in arrival order
    async fn dispatch_delivery(delivery: &Delivery, shared: &SessionShared) {
        let subscription = shared.subscription.read().await;
        if shared.is_closing() {
            debug!(target: "mqtt_transport", "Dropping message on {} during shutdown", delivery.topic);
            return;
        }

        match subscription.as_ref() {
            Some(sub) if topic_matches(&sub.filter, &delivery.topic) => {
                sub.handler.on_message(delivery);
            }
            Some(sub) => {
                debug!(
                    target: "mqtt_transport",
                    "Ignoring message on {} outside filter {}", delivery.topic, sub.filter
                );
            }
            None => {
                debug!(target: "mqtt_transport", "No subscription for message on {}", delivery.topic);
            }
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.connection_state();
        if current_state != ConnectionState::Connected {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Subscribe to a single filter and wait for the broker's SUBACK.
    ///
    /// The handler is registered before the request is sent so that retained
    /// messages following the SUBACK are not missed. On any failure it is
    /// removed again.
    pub async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<QoS, MqttError> {
        self.check_connection_state()?;
        validate_topic_filter(filter)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        *self.shared.subscription.write().await = Some(Subscription {
            filter: filter.to_string(),
            handler,
        });
        *self.shared.pending_suback.lock().await = Some(ack_tx);

        let result = self.request_subscription(filter, qos, ack_rx).await;
        match &result {
            Ok(granted) => {
                if qos_number(*granted) < qos_number(qos) {
                    warn!(
                        "Broker downgraded subscription on '{}' from QoS={} to QoS={}",
                        filter,
                        qos_number(qos),
                        qos_number(*granted)
                    );
                }
            }
            Err(e) => {
                error!("Subscription to '{}' failed: {}", filter, e);
                self.shared.pending_suback.lock().await.take();
                self.shared.subscription.write().await.take();
            }
        }
        result
    }

    async fn request_subscription(
        &self,
        filter: &str,
        qos: QoS,
        ack_rx: oneshot::Receiver<Result<QoS, String>>,
    ) -> Result<QoS, MqttError> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(e.to_string()))?;

        match tokio::time::timeout(SUBSCRIBE_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(granted))) => Ok(granted),
            Ok(Ok(Err(reason))) => Err(MqttError::SubscriptionFailed(reason)),
            Ok(Err(_)) => Err(MqttError::SubscriptionFailed(
                "connection lost before SUBACK".to_string(),
            )),
            Err(_) => Err(MqttError::SubscriptionFailed(
                "SUBACK timeout - no acknowledgement received".to_string(),
            )),
        }
    }

    /// Orderly disconnect.
    ///
    /// Stops delivery dispatch, sends DISCONNECT and waits up to `grace` for
    /// the event loop to flush and exit. A slow flush is logged and the task is
    /// cancelled; it is not an error. Calling this twice is a no-op.
    pub async fn disconnect(&mut self, grace: Duration) -> Result<(), MqttError> {
        self.shared.close_dispatch().await;

        let Some(mut handle) = self.event_loop_handle.take() else {
            return Ok(());
        };

        if self.is_connected() {
            let _ = self.state_tx.send(ConnectionState::Disconnecting);
            if let Err(e) = self.client.disconnect().await {
                debug!(target: "mqtt_transport", "DISCONNECT not sent: {}", e);
            }
        }

        let outcome = match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {
                debug!(target: "mqtt_transport", "Event loop task shut down gracefully");
                Ok(())
            }
            Ok(Err(e)) if e.is_panic() => Err(MqttError::DisconnectFailed(format!(
                "event loop task panicked: {e}"
            ))),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!(
                    "Event loop did not finish within {}ms, cancelling",
                    grace.as_millis()
                );
                handle.abort();
                let _ = handle.await;
                Ok(())
            }
        };

        if !matches!(self.connection_state(), ConnectionState::Disconnected(_)) {
            let _ = self.state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }
        self.shared.subscription.write().await.take();

        info!(client_id = %self.client_id, "MQTT client disconnected from {}", self.broker_url);
        outcome
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Whether the broker session is up
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<QoS, Self::Error> {
        MqttClient::subscribe(self, filter, qos, handler).await
    }

    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error> {
        MqttClient::disconnect(self, grace).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        // No async in Drop; callers should use disconnect() for a clean close
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
