//! The subscriber application built on the transport layer
//!
//! - [`reporter`] - display adapter for deliveries and connection loss
//! - [`shutdown`] - signal-driven shutdown state machine
//! - [`lifecycle`] - the run sequence tying it all together

pub mod lifecycle;
pub mod reporter;
pub mod shutdown;

pub use lifecycle::{connect, prepare_security, run, serve};
pub use reporter::ConsoleReporter;
pub use shutdown::{
    wait_for_signal, ShutdownCoordinator, ShutdownSignal, ShutdownState, GRACE_PERIOD,
};
