//! Structured logging system using tracing crate
//!
//! Every operator-facing line (connect, subscribe, each message, connection
//! loss, fatal errors) is a tracing event, so the same output can be read in a
//! terminal or shipped as JSON.
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `compact` - Terminal-friendly format with colors but minimal spacing (default)
//! - `pretty` - Human-readable format with colors and indentation
//! - `json` - Structured JSON format for log aggregation systems
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO,
//!   or to DEBUG/TRACE when `-v`/`-vv` is passed
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to compact
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Default terminal output
//! mqttcli --broker tcp://localhost:1883 --clientid c1 --topic 'sensors/#'
//!
//! # JSON lines for a log shipper
//! LOG_FORMAT=json mqttcli --config subscriber.json
//!
//! # See rumqttc internals too
//! RUST_LOG=debug,rumqttc=debug mqttcli --config subscriber.json
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Fully resolved logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl LogSettings {
    /// Resolve settings from raw environment values and the `-v` count.
    ///
    /// An explicit `LOG_LEVEL` wins over verbosity.
    pub fn resolve(
        log_level: Option<&str>,
        log_format: Option<&str>,
        log_spans: Option<&str>,
        verbosity: u8,
    ) -> Self {
        let level = match log_level {
            Some(raw) => parse_level(raw),
            None => match verbosity {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            },
        };

        Self {
            level,
            format: log_format.map_or(LogFormat::Compact, LogFormat::parse),
            include_spans: log_spans.is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// Read `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS` from the process environment
    pub fn from_env(verbosity: u8) -> Self {
        let log_level = env::var("LOG_LEVEL").ok();
        let log_format = env::var("LOG_FORMAT").ok();
        let log_spans = env::var("LOG_SPANS").ok();
        Self::resolve(
            log_level.as_deref(),
            log_format.as_deref(),
            log_spans.as_deref(),
            verbosity,
        )
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn default_directives(&self) -> String {
        format!("{},rumqttc=warn", self.level)
    }
}

fn parse_level(raw: &str) -> Level {
    match raw.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize logging with manual configuration
pub fn init_logging(settings: LogSettings) {
    // Allow RUST_LOG to override
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(settings.default_directives()),
    };

    let span_events = if settings.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
    }
}

/// Initialize logging from environment variables and the `-v` count
pub fn init_default_logging(verbosity: u8) {
    init_logging(LogSettings::from_env(verbosity));
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Create a lifecycle event span
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

// Re-export macros for convenience
pub use {lifecycle_span, mqtt_span};
