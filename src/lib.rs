//! mqttcli - MQTT subscriber with TLS and mutual-TLS support
//!
//! Connects to one broker, subscribes to one topic filter, and reports every
//! message until it receives SIGINT or SIGTERM.
//!
//! # Overview
//!
//! - [`config`] - JSON file + CLI override merge into a [`ConnectionSpec`]
//! - [`transport`] - TLS material loading, connection lifecycle, subscription
//! - [`subscriber`] - operator reporting, shutdown coordination, run sequence
//! - [`observability`] - structured logging
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqttcli::config::{CliOverrides, ConnectionSpec};
//! use mqttcli::subscriber;
//!
//! # tokio_test::block_on(async {
//! let overrides = CliOverrides {
//!     broker_url: Some("tcp://localhost:1883".to_string()),
//!     client_id: Some("docs-client".to_string()),
//!     topic: Some("sensors/+/temp".to_string()),
//!     qos: Some(1),
//!     ..Default::default()
//! };
//! let spec = ConnectionSpec::resolve(None, &overrides)?;
//!
//! // Blocks until SIGINT/SIGTERM, then disconnects
//! subscriber::run(&spec).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod subscriber;
pub mod testing;
pub mod transport;

pub use config::{CliOverrides, ConfigError, ConnectionSpec, FileConfig};
pub use error::{ErrorKind, SubscriberError, SubscriberResult};
pub use subscriber::{ConsoleReporter, ShutdownCoordinator, ShutdownSignal, ShutdownState};
pub use transport::mqtt::MqttClient;
pub use transport::Transport;
