//! Observability for the subscriber
//!
//! Structured logging setup plus the span macros used to instrument the
//! connection lifecycle.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
