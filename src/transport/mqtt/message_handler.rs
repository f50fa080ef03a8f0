//! Pure message routing and handler seams for MQTT events
//!
//! The event loop turns every rumqttc [`Event`] into an [`EventRoute`] here,
//! then acts on the route. Application code observes the session through the
//! two single-method traits [`DeliveryHandler`] and [`ConnectionLostHandler`].

use super::connection::qos_number;
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::fmt;

/// An inbound application message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retain: bool,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Topic={} QoS={} Payload={}",
            self.topic,
            qos_number(self.qos),
            String::from_utf8_lossy(&self.payload)
        )
    }
}

/// Called once per inbound message matching the subscription.
///
/// Runs on the event loop task, so implementations must return quickly and
/// must not panic.
pub trait DeliveryHandler: Send + Sync {
    fn on_message(&self, delivery: &Delivery);
}

/// Called at most once when an established session is lost unexpectedly.
///
/// Runs on the event loop task; must not block or panic.
pub trait ConnectionLostHandler: Send + Sync {
    fn on_connection_lost(&self, cause: &str);
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with a success code
    ConnectionAcknowledged,
    /// CONNACK with a refusal code
    ConnectionRefused(String),
    /// PUBLISH from the broker
    MessageReceived(Delivery),
    /// SUBACK with the outcome for the single requested filter
    SubscriptionAcknowledged {
        packet_id: u16,
        outcome: Result<QoS, String>,
    },
    /// Broker closed the session
    Disconnected,
    /// Our DISCONNECT has been written to the network
    DisconnectSent,
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived(Delivery {
                    topic: publish.topic.clone(),
                    qos: publish.qos,
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    outcome: Self::validate_subscription_success(&suback.return_codes),
                },
                Packet::Disconnect { .. } => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect { .. }) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function).
    ///
    /// Returns the QoS granted for the first filter.
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<QoS, String> {
        match return_codes.first() {
            Some(SubscribeReasonCode::Success(granted)) => Ok(*granted),
            Some(SubscribeReasonCode::Failure) => {
                Err("broker rejected the subscription (SUBACK failure 0x80)".to_string())
            }
            None => Err("SUBACK carried no return codes".to_string()),
        }
    }
}
