//! Top-level error types for the subscriber
//!
//! Each layer has its own `thiserror` enum ([`ConfigError`], [`TlsError`],
//! [`MqttError`]). [`SubscriberError`] wraps them with the stage at which they
//! happened and maps every failure to a process exit code.

use crate::config::ConfigError;
use crate::transport::mqtt::{MqttError, TlsError};
use thiserror::Error;

/// Failure categories reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unreadable configuration
    Config,
    /// Trust material missing, unreadable or malformed
    Ca,
    /// Client certificate/key incomplete or malformed
    Identity,
    /// Handshake, authentication or network failure while connecting
    Connect,
    /// Broker rejected the subscription or the connection dropped during it
    Subscribe,
    /// Signal handlers could not be installed
    Signal,
}

impl ErrorKind {
    /// Short label used in log output
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Ca => "CAError",
            ErrorKind::Identity => "IdentityError",
            ErrorKind::Connect => "ConnectError",
            ErrorKind::Subscribe => "SubscribeError",
            ErrorKind::Signal => "SignalError",
        }
    }
}

/// Main error type for subscriber runs
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("MQTT connection failed: {0}")]
    Connect(#[source] MqttError),

    #[error("Failed to subscribe to topic '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl SubscriberError {
    /// Create subscribe error
    pub fn subscribe<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            source,
        }
    }

    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubscriberError::Config(_) => ErrorKind::Config,
            SubscriberError::Tls(e) if e.is_ca_error() => ErrorKind::Ca,
            SubscriberError::Tls(_) => ErrorKind::Identity,
            // Security material checked late by the transport keeps its category
            SubscriberError::Connect(MqttError::Tls(e)) if e.is_ca_error() => ErrorKind::Ca,
            SubscriberError::Connect(MqttError::Tls(_)) => ErrorKind::Identity,
            SubscriberError::Connect(_) => ErrorKind::Connect,
            SubscriberError::Subscribe { .. } => ErrorKind::Subscribe,
            SubscriberError::Signal(_) => ErrorKind::Signal,
        }
    }

    /// Process exit code; 0 is reserved for clean shutdown
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Ca | ErrorKind::Identity => 3,
            ErrorKind::Connect => 4,
            ErrorKind::Subscribe => 5,
            ErrorKind::Signal => 6,
        }
    }

    /// Message safe to print: credentials embedded in URLs or key=value pairs are masked
    pub fn operator_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Mask secrets that may appear in error text (broker URL userinfo, password=...)
fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Ok(userinfo) = regex::Regex::new(r"://[^/@\s]+@") {
        sanitized = userinfo.replace_all(&sanitized, "://***@").to_string();
    }

    if let Ok(secrets) = regex::Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+") {
        sanitized = secrets.replace_all(&sanitized, "${1}=***").to_string();
    }

    sanitized
}

/// Result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;
