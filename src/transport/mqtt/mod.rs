//! MQTT client implementation for the subscriber
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`tls`] - TLS material loading into a rustls client configuration
//! - [`connection`] - Pure option building and the TLS attachment decision
//! - [`message_handler`] - Pure event routing and the handler traits
//! - [`client`] - Impure I/O: connect, subscribe, disconnect
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttcli::config::ConnectionSpec;
//! use mqttcli::transport::mqtt::{ConnectionLostHandler, Delivery, DeliveryHandler, MqttClient};
//! use mqttcli::transport::Transport;
//! use rumqttc::QoS;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! impl DeliveryHandler for Printer {
//!     fn on_message(&self, delivery: &Delivery) {
//!         println!("{delivery}");
//!     }
//! }
//!
//! impl ConnectionLostHandler for Printer {
//!     fn on_connection_lost(&self, cause: &str) {
//!         eprintln!("lost: {cause}");
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let spec = ConnectionSpec::new("tcp://localhost:1883", "example-client", "x/y");
//! let printer = Arc::new(Printer);
//!
//! let mut client = MqttClient::connect(&spec, None, printer.clone()).await?;
//! client.subscribe("x/y", QoS::AtLeastOnce, printer).await?;
//! client.disconnect(Duration::from_millis(250)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, login_credentials, qos_level, qos_number, requires_tls,
    BrokerEndpoint, ConnectionState, MqttError,
};
pub use message_handler::{
    ConnectionLostHandler, Delivery, DeliveryHandler, EventRoute, MessageHandler,
};
pub use tls::{ClientIdentity, TlsError, TransportSecurityConfig, TrustStore, TLS12_AND_UP};
