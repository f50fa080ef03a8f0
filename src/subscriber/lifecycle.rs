//! Subscriber lifecycle: security material → connect → subscribe → shutdown
//!
//! Each step blocks the calling flow until it has finished. Any fatal error
//! after the connection is up closes the connection before it is returned.

use super::reporter::ConsoleReporter;
use super::shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownSignal};
use crate::config::ConnectionSpec;
use crate::error::SubscriberError;
use crate::transport::mqtt::{
    qos_level, qos_number, BrokerEndpoint, DeliveryHandler, MqttClient, MqttError,
    TransportSecurityConfig,
};
use crate::transport::Transport;
use rumqttc::QoS;
use rustls::ClientConfig;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Run one subscriber session until a termination signal is handled.
pub async fn run(spec: &ConnectionSpec) -> Result<ShutdownSignal, SubscriberError> {
    let tls = prepare_security(spec)?;
    let reporter = Arc::new(ConsoleReporter::from_spec(spec));

    let mut session = connect(spec, tls, reporter.clone()).await?;
    let coordinator = ShutdownCoordinator::new();

    serve(&mut session, spec, reporter, &coordinator, wait_for_signal()).await
}

/// Load TLS material when the connection needs it. No network I/O.
pub fn prepare_security(
    spec: &ConnectionSpec,
) -> Result<Option<Arc<ClientConfig>>, SubscriberError> {
    let endpoint = BrokerEndpoint::parse(&spec.broker_url).map_err(SubscriberError::Connect)?;
    match TransportSecurityConfig::for_spec(spec, &endpoint)? {
        Some(security) => Ok(Some(security.client_config()?)),
        None => Ok(None),
    }
}

/// Open the broker session; a single attempt.
pub async fn connect(
    spec: &ConnectionSpec,
    tls: Option<Arc<ClientConfig>>,
    reporter: Arc<ConsoleReporter>,
) -> Result<MqttClient, SubscriberError> {
    let span = crate::mqtt_span!(
        operation = "connect",
        broker = %spec.broker_url,
        client_id = %spec.client_id,
        tls = tls.is_some()
    );

    let session = MqttClient::connect(spec, tls, reporter)
        .instrument(span)
        .await
        .map_err(SubscriberError::Connect)?;

    info!(
        broker = %spec.broker_url,
        client_id = %spec.client_id,
        "Connected to {} as clientID='{}'", spec.broker_url, spec.client_id
    );
    Ok(session)
}

/// Subscribe on an established session, then hand it to the coordinator.
///
/// Deliveries go to `handler` through the coordinator's gate. On a subscribe
/// failure the session is disconnected before the error is returned, so no
/// half-open connection outlives the run.
pub async fn serve<T, S>(
    session: &mut T,
    spec: &ConnectionSpec,
    handler: Arc<dyn DeliveryHandler>,
    coordinator: &ShutdownCoordinator,
    signal: S,
) -> Result<ShutdownSignal, SubscriberError>
where
    T: Transport<Error = MqttError> + ?Sized,
    S: Future<Output = io::Result<ShutdownSignal>>,
{
    let span = crate::mqtt_span!(operation = "subscribe", topic = %spec.topic, qos = spec.qos);
    let subscribed = subscribe(session, spec, handler, coordinator)
        .instrument(span)
        .await;

    let granted = match subscribed {
        Ok(granted) => granted,
        Err(e) => {
            if let Err(close_err) = session.disconnect(coordinator.grace()).await {
                warn!("Failed to close connection after subscribe error: {}", close_err);
            }
            return Err(SubscriberError::subscribe(&spec.topic, e));
        }
    };

    info!(
        topic = %spec.topic,
        qos = qos_number(granted),
        "Subscribed to topic '{}' with QoS={}", spec.topic, qos_number(granted)
    );

    coordinator
        .run(session, signal)
        .instrument(crate::lifecycle_span!(phase = "shutdown", client_id = %spec.client_id))
        .await
}

async fn subscribe<T>(
    session: &mut T,
    spec: &ConnectionSpec,
    handler: Arc<dyn DeliveryHandler>,
    coordinator: &ShutdownCoordinator,
) -> Result<QoS, MqttError>
where
    T: Transport<Error = MqttError> + ?Sized,
{
    let qos = qos_level(spec.qos)?;
    session
        .subscribe(&spec.topic, qos, coordinator.gate(handler))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    #[test]
    fn test_plain_spec_needs_no_security() {
        let spec = ConnectionSpec::new("tcp://localhost:1883", "t1", "x/y");
        assert!(prepare_security(&spec).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_ca_is_ca_error_before_network() {
        let mut spec = ConnectionSpec::new("tcp://localhost:1883", "t1", "x/y");
        spec.ca_file = Some(PathBuf::from("/nonexistent/dir/ca.pem"));

        let err = prepare_security(&spec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ca);
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_certificate_without_key_is_identity_error() {
        let mut spec = ConnectionSpec::new("ssl://localhost:8883", "t1", "x/y");
        spec.cert_file = Some(PathBuf::from("/nonexistent/device.crt"));

        let err = prepare_security(&spec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Identity);
    }

    #[test]
    fn test_malformed_broker_url_fails_before_loading_material() {
        let mut spec = ConnectionSpec::new("not a url", "t1", "x/y");
        spec.ca_file = Some(PathBuf::from("/nonexistent/dir/ca.pem"));

        let err = prepare_security(&spec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_error() {
        let spec = ConnectionSpec::new("tcp://127.0.0.1:1", "t1", "x/y");
        let reporter = Arc::new(ConsoleReporter::new(false, true));

        let err = connect(&spec, None, reporter).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connect);
    }
}
