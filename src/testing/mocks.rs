//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for a connected broker session. Tests drive
//! inbound traffic with [`MockTransport::deliver`] and inspect what the code
//! under test asked the session to do.

use crate::protocol::{topic_matches, validate_topic_filter};
use crate::transport::mqtt::{ConnectionState, Delivery, DeliveryHandler, MqttError};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Called while the mock is handling `disconnect`, before it closes
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

struct MockState {
    connection: ConnectionState,
    handler: Option<(String, Arc<dyn DeliveryHandler>)>,
    subscriptions: Vec<(String, QoS)>,
    disconnects: Vec<Duration>,
}

/// Mock transport for testing. Clones share the same session.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    subscribe_failure: Option<String>,
    granted_qos: Option<QoS>,
    disconnect_failure: Option<String>,
    on_disconnect: Option<DisconnectHook>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A session that has already received CONNACK
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connection: ConnectionState::Connected,
                handler: None,
                subscriptions: Vec::new(),
                disconnects: Vec::new(),
            })),
            subscribe_failure: None,
            granted_qos: None,
            disconnect_failure: None,
            on_disconnect: None,
        }
    }

    /// The broker answers every SUBSCRIBE with a failure return code
    pub fn with_subscribe_failure(reason: &str) -> Self {
        Self {
            subscribe_failure: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// The broker grants `qos` regardless of what was requested
    pub fn granting(mut self, qos: QoS) -> Self {
        self.granted_qos = Some(qos);
        self
    }

    /// `disconnect` reports an error (after closing, like a timed-out flush)
    pub fn failing_disconnect(mut self, reason: &str) -> Self {
        self.disconnect_failure = Some(reason.to_string());
        self
    }

    pub fn on_disconnect(mut self, hook: DisconnectHook) -> Self {
        self.on_disconnect = Some(hook);
        self
    }

    /// Simulate an inbound PUBLISH. Returns whether a handler was invoked.
    pub fn deliver(&self, topic: &str, qos: QoS, payload: &[u8]) -> bool {
        let handler = {
            let Ok(state) = self.state.lock() else {
                return false;
            };
            if state.connection != ConnectionState::Connected {
                return false;
            }
            match &state.handler {
                Some((filter, handler)) if topic_matches(filter, topic) => {
                    handler.clone()
                }
                _ => return false,
            }
        };

        handler.on_message(&Delivery {
            topic: topic.to_string(),
            qos,
            payload: Bytes::copy_from_slice(payload),
            retain: false,
        });
        true
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state
            .lock()
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Grace periods passed to each `disconnect` call
    pub fn disconnects(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.disconnects.clone())
            .unwrap_or_default()
    }

    pub fn has_handler(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.handler.is_some())
            .unwrap_or(false)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> Result<R, MqttError> {
        self.state
            .lock()
            .map(|mut s| f(&mut *s))
            .map_err(|_| MqttError::ConnectionFailed("mock state poisoned".to_string()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<QoS, Self::Error> {
        validate_topic_filter(filter)?;

        let connection = self.connection_state();
        if connection != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state: connection });
        }

        self.with_state(|s| s.subscriptions.push((filter.to_string(), qos)))?;

        if let Some(reason) = &self.subscribe_failure {
            return Err(MqttError::SubscriptionFailed(reason.clone()));
        }

        self.with_state(|s| s.handler = Some((filter.to_string(), handler)))?;
        Ok(self.granted_qos.unwrap_or(qos))
    }

    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error> {
        if let Some(hook) = &self.on_disconnect {
            hook();
        }

        self.with_state(|s| {
            s.disconnects.push(grace);
            s.handler = None;
            s.connection = ConnectionState::Disconnected("Client disconnected".to_string());
        })?;

        match &self.disconnect_failure {
            Some(reason) => Err(MqttError::DisconnectFailed(reason.clone())),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| s.connection.clone())
            .unwrap_or_else(|_| ConnectionState::Disconnected("mock state poisoned".to_string()))
    }
}
