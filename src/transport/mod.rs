//! Transport layer for the broker session
//!
//! This module provides the session abstraction and its MQTT implementation.
//! The lifecycle and shutdown code only depend on [`Transport`], which keeps
//! them testable without a broker.

use crate::transport::mqtt::{ConnectionState, DeliveryHandler};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;

pub mod mqtt;

/// An established broker session.
///
/// Values implementing this trait are only handed out once the broker has
/// accepted the connection, so there is no `connect` method here.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Subscribe to `filter` and route matching messages to `handler`.
    ///
    /// Blocks until the broker acknowledges the request; returns the granted QoS.
    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<QoS, Self::Error>;

    /// Orderly disconnect. After this returns no handler will be invoked again.
    ///
    /// `grace` bounds how long in-flight acknowledgements may be flushed.
    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error>;

    /// Check if the session is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;
}
