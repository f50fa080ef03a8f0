//! Testing utilities and mock implementations
//!
//! Lets the lifecycle and shutdown logic be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
