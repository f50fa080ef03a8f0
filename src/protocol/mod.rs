//! MQTT protocol rules used by the subscriber
//!
//! Topic filter validation and wildcard matching.

pub mod topics;

pub use topics::*;
