//! Configuration for the MQTT subscriber
//!
//! A [`ConnectionSpec`] is resolved once at startup by merging an optional JSON
//! file with command-line overrides, validated, and then passed by reference
//! into every component. Nothing downstream reads process-wide state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Raw JSON configuration file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// e.g. "ssl://your-iot-endpoint.amazonaws.com:8883" or "tcp://localhost:1883"
    pub broker_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Root CA bundle (e.g. AmazonRootCA1.pem)
    pub ca_file: String,
    /// Device/client certificate
    pub cert_file: String,
    /// Device/client private key
    pub key_file: String,
    /// Skip server certificate verification
    pub insecure: bool,
    /// e.g. "iot/gnss/+/data"
    pub topic: String,
    pub qos: i64,
    /// Do not print incoming messages
    pub quiet: bool,
    /// Report connection loss and other asynchronous errors
    pub print_errors: bool,
}

impl FileConfig {
    /// Load a JSON configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Values explicitly supplied on the command line.
///
/// Strings override the file when non-empty, `qos` overrides when present and
/// non-negative, and booleans can only switch a setting on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub broker_url: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: Option<String>,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub qos: Option<i64>,
    pub insecure: bool,
    pub quiet: bool,
    pub print_errors: bool,
}

impl CliOverrides {
    /// Apply the overrides on top of a file configuration
    pub fn apply(&self, cfg: &mut FileConfig) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                *target = value.to_string();
            }
        }

        set(&mut cfg.broker_url, &self.broker_url);
        set(&mut cfg.client_id, &self.client_id);
        set(&mut cfg.username, &self.username);
        set(&mut cfg.password, &self.password);
        set(&mut cfg.topic, &self.topic);
        set(&mut cfg.ca_file, &self.ca_file);
        set(&mut cfg.cert_file, &self.cert_file);
        set(&mut cfg.key_file, &self.key_file);

        if let Some(qos) = self.qos.filter(|q| *q >= 0) {
            // Values that do not fit a QoS level are normalised during resolve
            cfg.qos = qos;
        }
        cfg.insecure |= self.insecure;
        cfg.quiet |= self.quiet;
        cfg.print_errors |= self.print_errors;
    }
}

/// Fully resolved, immutable connection and subscription settings.
#[derive(Clone, PartialEq)]
pub struct ConnectionSpec {
    pub broker_url: String,
    /// Must be unique per broker
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub insecure: bool,
    pub topic: String,
    /// 0, 1 or 2
    pub qos: u8,
    pub quiet: bool,
    pub print_errors: bool,
}

impl ConnectionSpec {
    /// Merge the optional file with CLI overrides, validate, and normalise QoS.
    pub fn resolve(file: Option<FileConfig>, overrides: &CliOverrides) -> Result<Self, ConfigError> {
        let mut cfg = file.unwrap_or_default();
        overrides.apply(&mut cfg);
        Self::try_from(cfg)
    }

    /// Minimal spec for a plain broker, mostly useful in tests
    pub fn new(broker_url: &str, client_id: &str, topic: &str) -> Self {
        Self {
            broker_url: broker_url.to_string(),
            client_id: client_id.to_string(),
            username: None,
            password: None,
            ca_file: None,
            cert_file: None,
            key_file: None,
            insecure: false,
            topic: topic.to_string(),
            qos: 0,
            quiet: false,
            print_errors: false,
        }
    }
}

impl TryFrom<FileConfig> for ConnectionSpec {
    type Error = ConfigError;

    fn try_from(cfg: FileConfig) -> Result<Self, Self::Error> {
        require(&cfg.broker_url, "broker_url", "--broker")?;
        require(&cfg.client_id, "client_id", "--clientid")?;
        require(&cfg.topic, "topic", "--topic")?;

        Ok(Self {
            broker_url: cfg.broker_url,
            client_id: cfg.client_id,
            username: non_empty(cfg.username),
            password: non_empty(cfg.password),
            ca_file: non_empty(cfg.ca_file).map(PathBuf::from),
            cert_file: non_empty(cfg.cert_file).map(PathBuf::from),
            key_file: non_empty(cfg.key_file).map(PathBuf::from),
            insecure: cfg.insecure,
            topic: cfg.topic,
            qos: normalize_qos(cfg.qos),
            quiet: cfg.quiet,
            print_errors: cfg.print_errors,
        })
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("broker_url", &self.broker_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ca_file", &self.ca_file)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("insecure", &self.insecure)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("quiet", &self.quiet)
            .field("print_errors", &self.print_errors)
            .finish()
    }
}

/// Map any QoS outside {0, 1, 2} to 0
pub fn normalize_qos(qos: i64) -> u8 {
    match u8::try_from(qos) {
        Ok(level) if level <= 2 => level,
        _ => {
            warn!("QoS {} is not 0, 1 or 2; using 0", qos);
            0
        }
    }
}

fn require(value: &str, field: &'static str, flag: &'static str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField { field, flag });
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON config: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("{field} is not set. Provide via {flag} or config file.")]
    MissingField {
        field: &'static str,
        flag: &'static str,
    },
}
