//! Shutdown coordination and subscribe handling against the mock transport
//!
//! Tests focus on observable behaviour: state transitions, which callbacks
//! fire, and whether the session is closed on every exit path.

use mqttcli::subscriber::{serve, ConsoleReporter, ShutdownCoordinator, ShutdownState};
use mqttcli::testing::MockTransport;
use mqttcli::transport::mqtt::{Delivery, DeliveryHandler};
use mqttcli::transport::Transport;
use mqttcli::{ConnectionSpec, ErrorKind, ShutdownSignal};
use rumqttc::QoS;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

fn spec(topic: &str, qos: u8) -> ConnectionSpec {
    let mut spec = ConnectionSpec::new("tcp://localhost:1883", "coordinator-test", topic);
    spec.qos = qos;
    spec
}

#[tokio::test]
async fn test_signal_drives_full_state_walk() {
    // Arrange: subscribed session, signal delivered by the test
    let mut session = MockTransport::new();
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let seen_during_disconnect = Arc::new(Mutex::new(None));
    let session_handle = session.clone();
    let late_delivery_forwarded = Arc::new(AtomicBool::new(false));
    session = session.on_disconnect({
        let coordinator = coordinator.clone();
        let seen = seen_during_disconnect.clone();
        let forwarded = late_delivery_forwarded.clone();
        Arc::new(move || {
            *seen.lock().unwrap() = Some(coordinator.state());
            // The broker still has the session open at this point
            forwarded.store(
                session_handle.deliver("sensors/a", QoS::AtLeastOnce, b"late"),
                Ordering::SeqCst,
            );
        })
    });

    let spec = spec("sensors/+", 1);
    let reporter = Arc::new(ConsoleReporter::from_spec(&spec));
    let (signal_tx, signal_rx) = oneshot::channel();
    let mut states = coordinator.subscribe_state();

    let runner = {
        let coordinator = coordinator.clone();
        let mut session = session.clone();
        tokio::spawn(async move {
            let signal = async move {
                signal_rx
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "sender dropped"))
            };
            serve(&mut session, &spec, reporter, &coordinator, signal).await
        })
    };

    // Act: let the subscription settle, deliver one message, then interrupt
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*states.borrow_and_update(), ShutdownState::Running);
    assert!(session.deliver("sensors/a", QoS::AtLeastOnce, b"21.5"));

    signal_tx.send(ShutdownSignal::Interrupt).unwrap();
    let result = runner.await.unwrap();

    // Assert
    assert_eq!(result.unwrap(), ShutdownSignal::Interrupt);
    assert_eq!(
        *seen_during_disconnect.lock().unwrap(),
        Some(ShutdownState::Disconnecting)
    );
    // The mock still routed it, but the gated handler swallowed it
    assert!(late_delivery_forwarded.load(Ordering::SeqCst));
    assert_eq!(coordinator.state(), ShutdownState::Exited);
    assert_eq!(session.disconnects(), vec![Duration::from_millis(250)]);
    assert!(!session.is_connected());
    assert!(!session.deliver("sensors/a", QoS::AtLeastOnce, b"after"));
}

#[tokio::test]
async fn test_no_callback_after_disconnecting() {
    struct Counter(Arc<Mutex<Vec<String>>>);

    impl DeliveryHandler for Counter {
        fn on_message(&self, delivery: &Delivery) {
            self.0.lock().unwrap().push(delivery.topic.clone());
        }
    }

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let received = Arc::new(Mutex::new(Vec::new()));
    let gated = coordinator.gate(Arc::new(Counter(received.clone())));

    let mut session = MockTransport::new().on_disconnect({
        let gated = gated.clone();
        Arc::new(move || {
            gated.on_message(&Delivery {
                topic: "during/disconnect".to_string(),
                qos: QoS::AtMostOnce,
                payload: bytes::Bytes::new(),
                retain: false,
            });
        })
    });
    session
        .subscribe("#", QoS::AtMostOnce, gated.clone())
        .await
        .unwrap();
    assert!(session.deliver("before", QoS::AtMostOnce, b""));

    coordinator
        .run(&mut session, async { Ok(ShutdownSignal::Terminate) })
        .await
        .unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["before".to_string()]);
}

#[tokio::test]
async fn test_rejected_subscription_closes_session() {
    let mut session = MockTransport::with_subscribe_failure("not authorized");
    let coordinator = ShutdownCoordinator::new();
    let spec = spec("forbidden/#", 1);
    let reporter = Arc::new(ConsoleReporter::from_spec(&spec));

    let err = serve(
        &mut session,
        &spec,
        reporter,
        &coordinator,
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Subscribe);
    assert_eq!(err.exit_code(), 5);
    assert!(err.to_string().contains("forbidden/#"));
    assert_eq!(session.disconnects().len(), 1, "connection must be closed");
    assert_eq!(coordinator.state(), ShutdownState::Running);
}

#[tokio::test]
async fn test_malformed_filter_is_subscribe_error() {
    let mut session = MockTransport::new();
    let coordinator = ShutdownCoordinator::new();
    let spec = spec("sport/#/tennis", 0);

    let err = serve(
        &mut session,
        &spec,
        Arc::new(ConsoleReporter::default()),
        &coordinator,
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Subscribe);
    assert!(session.subscriptions().is_empty());
    assert_eq!(session.disconnects().len(), 1);
}

#[tokio::test]
async fn test_out_of_range_qos_rejected_when_invoked_directly() {
    let mut session = MockTransport::new();
    let coordinator = ShutdownCoordinator::new();
    let spec = spec("x/y", 3);

    let err = serve(
        &mut session,
        &spec,
        Arc::new(ConsoleReporter::default()),
        &coordinator,
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Subscribe);
    assert!(err.to_string().contains("QoS"));
}

#[tokio::test]
async fn test_granted_qos_is_reported_subscription_kept() {
    let mut session = MockTransport::new().granting(QoS::AtMostOnce);
    let coordinator = ShutdownCoordinator::new();
    let spec = spec("x/y", 2);

    let result = serve(
        &mut session,
        &spec,
        Arc::new(ConsoleReporter::default()),
        &coordinator,
        async { Ok(ShutdownSignal::Terminate) },
    )
    .await;

    assert_eq!(result.unwrap(), ShutdownSignal::Terminate);
    assert_eq!(
        session.subscriptions(),
        vec![("x/y".to_string(), QoS::ExactlyOnce)]
    );
}

#[tokio::test]
async fn test_disconnect_failure_does_not_block_exit() {
    let mut session = MockTransport::new().failing_disconnect("grace period elapsed");
    let coordinator = ShutdownCoordinator::with_grace(Duration::from_millis(10));

    let result = coordinator
        .run(&mut session, async { Ok(ShutdownSignal::Interrupt) })
        .await;

    assert_eq!(result.unwrap(), ShutdownSignal::Interrupt);
    assert_eq!(coordinator.state(), ShutdownState::Exited);
    assert_eq!(session.disconnects(), vec![Duration::from_millis(10)]);
}

#[tokio::test]
async fn test_signal_listener_failure_still_closes_session() {
    let mut session = MockTransport::new();
    let coordinator = ShutdownCoordinator::new();

    let err = coordinator
        .run(&mut session, async {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no signals"))
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Signal);
    assert_eq!(session.disconnects().len(), 1);
    assert_eq!(coordinator.state(), ShutdownState::Exited);
}
