//! Pure connection state management for the MQTT client
//!
//! This module contains pure functions for deciding whether a connection
//! needs TLS, parsing the broker endpoint, and building [`MqttOptions`].

use super::tls::TlsError;
use crate::config::ConnectionSpec;
use crate::protocol::TopicError;
use rumqttc::{MqttOptions, QoS, TlsConfiguration, Transport as RumqttcTransport};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Keep-alive interval negotiated with the broker
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Upper bound on waiting for CONNACK
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for SUBACK
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - waiting for CONNACK
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Orderly disconnect requested by this client
    Disconnecting,
    /// Disconnected with reason
    Disconnected(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid QoS level {0}: must be 0, 1 or 2")]
    InvalidQos(u8),
    #[error("Broker {0} requires TLS but no security configuration was supplied")]
    TlsRequired(String),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(#[from] TopicError),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Whether a broker scheme denotes a TLS transport
pub fn is_secure_scheme(scheme: &str) -> bool {
    matches!(
        scheme.to_ascii_lowercase().as_str(),
        "ssl" | "tls" | "mqtts"
    )
}

/// Decide whether transport security must be attached.
///
/// TLS is used for a secure scheme, or whenever any CA, certificate or key
/// material was supplied, even on a plain scheme.
pub fn requires_tls(scheme: &str, has_ca: bool, has_cert: bool, has_key: bool) -> bool {
    is_secure_scheme(scheme) || has_ca || has_cert || has_key
}

/// Convert a raw QoS number into the protocol level
pub fn qos_level(qos: u8) -> Result<QoS, MqttError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

/// Numeric form of a QoS level, for display
pub fn qos_number(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Scheme, host and port parsed from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Lowercased URL scheme
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// Parse `scheme://host[:port]`; ports default to 1883 (plain) or 8883 (secure)
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let url =
            Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let scheme = url.scheme().to_ascii_lowercase();
        if !matches!(scheme.as_str(), "tcp" | "mqtt") && !is_secure_scheme(&scheme) {
            return Err(MqttError::InvalidBrokerUrl(broker_url.to_string()));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url
            .port()
            .unwrap_or(if is_secure_scheme(&scheme) { 8883 } else { 1883 });

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    pub fn is_secure(&self) -> bool {
        is_secure_scheme(&self.scheme)
    }

    /// Whether a connection to this endpoint with `spec`'s material needs TLS
    pub fn requires_tls(&self, spec: &ConnectionSpec) -> bool {
        requires_tls(
            &self.scheme,
            spec.ca_file.is_some(),
            spec.cert_file.is_some(),
            spec.key_file.is_some(),
        )
    }
}

/// Username and password to present, if any.
///
/// MQTT 3.1.1 forbids a password without a username, so a lone password is
/// dropped with a warning.
pub fn login_credentials(spec: &ConnectionSpec) -> Option<(String, String)> {
    let username = spec.username.as_deref().filter(|u| !u.is_empty());
    let password = spec.password.as_deref().filter(|p| !p.is_empty());

    match (username, password) {
        (Some(user), password) => Some((user.to_string(), password.unwrap_or_default().to_string())),
        (None, Some(_)) => {
            warn!("Password given without a username; connecting without credentials");
            None
        }
        (None, None) => None,
    }
}

/// Pure function to build MQTT options from a resolved spec.
///
/// `tls` must be present exactly when the endpoint requires it.
pub fn configure_mqtt_options(
    spec: &ConnectionSpec,
    endpoint: &BrokerEndpoint,
    tls: Option<Arc<ClientConfig>>,
) -> Result<MqttOptions, MqttError> {
    if spec.client_id.is_empty() {
        return Err(MqttError::ConnectionFailed("client ID is empty".to_string()));
    }

    let mut mqtt_options =
        MqttOptions::new(spec.client_id.clone(), endpoint.host.clone(), endpoint.port);
    mqtt_options.set_keep_alive(KEEP_ALIVE);
    mqtt_options.set_clean_session(true);

    if let Some((username, password)) = login_credentials(spec) {
        mqtt_options.set_credentials(username, password);
    }

    match (endpoint.requires_tls(spec), tls) {
        (true, Some(client_config)) => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_config(
                TlsConfiguration::Rustls(client_config),
            ));
        }
        (true, None) => return Err(MqttError::TlsRequired(spec.broker_url.clone())),
        (false, _) => {}
    }

    Ok(mqtt_options)
}
