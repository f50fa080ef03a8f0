//! Signal-driven shutdown of a subscriber session
//!
//! The coordinator walks `Running → ShutdownRequested → Disconnecting → Exited`.
//! Only an interrupt or terminate signal starts the walk. Deliveries are gated
//! off before `ShutdownRequested` is published, so a handler only ever runs
//! while the coordinator is `Running`. `Exited` is only reached after the
//! session's disconnect has returned.

use crate::error::SubscriberError;
use crate::transport::mqtt::{Delivery, DeliveryHandler};
use crate::transport::Transport;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Time the transport gets to flush acknowledgements before it is closed
pub const GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Shutdown state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Normal operation; deliveries may fire at any time
    Running,
    /// A termination signal arrived
    ShutdownRequested,
    /// Orderly disconnect in progress; deliveries are gated off
    Disconnecting,
    /// Terminal
    Exited,
}

impl ShutdownState {
    /// Whether `next` is the single permitted successor of `self`
    pub fn can_transition_to(self, next: ShutdownState) -> bool {
        matches!(
            (self, next),
            (ShutdownState::Running, ShutdownState::ShutdownRequested)
                | (ShutdownState::ShutdownRequested, ShutdownState::Disconnecting)
                | (ShutdownState::Disconnecting, ShutdownState::Exited)
        )
    }
}

/// The termination signal that ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Install interrupt/terminate handlers and wait for the first signal
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok(ShutdownSignal::Interrupt),
        _ = sigterm.recv() => Ok(ShutdownSignal::Terminate),
    }
}

/// Install the Ctrl-C handler and wait for it
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

/// Delivery handler that stops forwarding once the coordinator closes it.
///
/// The read guard is held for the whole inner call, so closing the gate
/// waits for a running callback to return.
struct GatedDelivery {
    open: Arc<RwLock<bool>>,
    inner: Arc<dyn DeliveryHandler>,
}

impl DeliveryHandler for GatedDelivery {
    fn on_message(&self, delivery: &Delivery) {
        let open = self.open.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *open {
            self.inner.on_message(delivery);
        }
    }
}

/// Drives a session from `Running` to `Exited`
pub struct ShutdownCoordinator {
    state_tx: watch::Sender<ShutdownState>,
    deliveries_open: Arc<RwLock<bool>>,
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_grace(GRACE_PERIOD)
    }

    /// Coordinator with a non-default grace period
    pub fn with_grace(grace: Duration) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            state_tx,
            deliveries_open: Arc::new(RwLock::new(true)),
            grace,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    /// Observe every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wrap a handler so it goes silent before `ShutdownRequested` is entered
    pub fn gate(&self, inner: Arc<dyn DeliveryHandler>) -> Arc<dyn DeliveryHandler> {
        Arc::new(GatedDelivery {
            open: self.deliveries_open.clone(),
            inner,
        })
    }

    fn advance(&self, next: ShutdownState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            error!("Invalid shutdown transition {:?} -> {:?}", current, next);
            return;
        }
        debug!("Shutdown state {:?} -> {:?}", current, next);
        self.state_tx.send_replace(next);
    }

    /// Close the delivery gate, blocking until no gated callback is running
    fn close_deliveries(&self) {
        let mut open = self
            .deliveries_open
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *open = false;
        self.advance(ShutdownState::ShutdownRequested);
    }

    /// Wait for `signal`, then disconnect `session` within the grace period.
    ///
    /// A disconnect that fails or overruns is logged and does not stop the
    /// walk to `Exited`. If the signal listener itself fails, the session is
    /// still closed and the failure is returned.
    pub async fn run<T, S>(
        &self,
        session: &mut T,
        signal: S,
    ) -> Result<ShutdownSignal, SubscriberError>
    where
        T: Transport + ?Sized,
        S: Future<Output = io::Result<ShutdownSignal>>,
    {
        let outcome = signal.await;
        match &outcome {
            Ok(received) => info!(signal = %received, "Received {}, shutting down...", received),
            Err(e) => error!("Signal listener failed: {}", e),
        }

        self.close_deliveries();
        self.advance(ShutdownState::Disconnecting);

        if let Err(e) = session.disconnect(self.grace).await {
            warn!("Disconnect did not complete cleanly: {}", e);
        }

        self.advance(ShutdownState::Exited);
        info!("Exiting.");

        outcome.map_err(SubscriberError::Signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::testing::MockTransport;
    use rumqttc::QoS;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DeliveryHandler for Counter {
        fn on_message(&self, _delivery: &Delivery) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_only_forward_transitions_allowed() {
        use ShutdownState::*;
        let states = [Running, ShutdownRequested, Disconnecting, Exited];

        for (i, from) in states.iter().enumerate() {
            for (j, to) in states.iter().enumerate() {
                assert_eq!(
                    from.can_transition_to(*to),
                    j == i + 1,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.advance(ShutdownState::Exited);
        assert_eq!(coordinator.state(), ShutdownState::Running);
    }

    #[test]
    fn test_default_grace_period() {
        assert_eq!(ShutdownCoordinator::default().grace(), Duration::from_millis(250));
    }

    #[test]
    fn test_gate_closes_with_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let counter = Arc::new(Counter::default());
        let gated = coordinator.gate(counter.clone());
        let delivery = Delivery {
            topic: "t".to_string(),
            qos: QoS::AtMostOnce,
            payload: Bytes::new(),
            retain: false,
        };

        gated.on_message(&delivery);
        coordinator.close_deliveries();
        gated.on_message(&delivery);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), ShutdownState::ShutdownRequested);
    }

    /// Blocks inside the callback and records the coordinator state it saw
    struct StateWatcher {
        state_rx: watch::Receiver<ShutdownState>,
        started: Mutex<Option<mpsc::Sender<()>>>,
        seen: Mutex<Vec<ShutdownState>>,
        finished: AtomicBool,
    }

    impl DeliveryHandler for StateWatcher {
        fn on_message(&self, _delivery: &Delivery) {
            if let Some(started) = self.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            std::thread::sleep(Duration::from_millis(50));
            self.seen.lock().unwrap().push(*self.state_rx.borrow());
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_callback() {
        let coordinator = ShutdownCoordinator::with_grace(Duration::from_millis(10));
        let (started_tx, started_rx) = mpsc::channel();
        let watcher = Arc::new(StateWatcher {
            state_rx: coordinator.subscribe_state(),
            started: Mutex::new(Some(started_tx)),
            seen: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        });
        let gated = coordinator.gate(watcher.clone());

        let callback = std::thread::spawn(move || {
            gated.on_message(&Delivery {
                topic: "t".to_string(),
                qos: QoS::AtLeastOnce,
                payload: Bytes::from_static(b"slow"),
                retain: false,
            });
        });
        started_rx.recv().unwrap();

        let mut session = MockTransport::new();
        let signal = coordinator
            .run(&mut session, async { Ok(ShutdownSignal::Interrupt) })
            .await
            .unwrap();

        assert_eq!(signal, ShutdownSignal::Interrupt);
        assert!(
            watcher.finished.load(Ordering::SeqCst),
            "run returned while a callback was still running"
        );
        assert_eq!(*watcher.seen.lock().unwrap(), vec![ShutdownState::Running]);
        assert_eq!(coordinator.state(), ShutdownState::Exited);
        callback.join().unwrap();
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
