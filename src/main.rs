//! mqttcli - Main Entry Point
//!
//! Parses flags, merges them over the optional JSON config, and runs one
//! subscriber session until SIGINT or SIGTERM.

use clap::{ArgAction, Parser};
use mqttcli::config::{CliOverrides, ConnectionSpec, FileConfig};
use mqttcli::error::SubscriberError;
use mqttcli::observability::init_default_logging;
use mqttcli::subscriber;
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, info};

const USAGE_EXAMPLES: &str = "\
Examples:
  # Plain TCP broker:
  mqttcli --broker tcp://localhost:1883 --clientid demo --topic 'sensors/#' --qos 1

  # Mutual TLS (e.g. AWS IoT Core):
  mqttcli --broker ssl://example-ats.iot.eu-central-1.amazonaws.com:8883 \\
          --clientid myThing \\
          --cafile AmazonRootCA1.pem \\
          --certfile deviceCert.crt \\
          --keyfile deviceKey.key \\
          --topic 'iot/gnss/myThing/data' --qos 1

  # JSON config usage:
  mqttcli --config /path/to/config.json

Credentials may also be supplied through MQTTCLI_USERNAME and MQTTCLI_PASSWORD.";

/// MQTT subscriber with TLS and mutual-TLS support
#[derive(Parser, Debug)]
#[command(name = "mqttcli")]
#[command(about = "Subscribe to an MQTT topic and print every message received")]
#[command(version)]
#[command(after_help = USAGE_EXAMPLES)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL (tcp://host:1883, ssl://host:8883, ...)
    #[arg(long, value_name = "URL")]
    broker: Option<String>,

    /// Client ID, unique per broker
    #[arg(long, value_name = "ID")]
    clientid: Option<String>,

    /// Username for broker authentication
    #[arg(long, env = "MQTTCLI_USERNAME", hide_env_values = true)]
    username: Option<String>,

    /// Password for broker authentication
    #[arg(long, env = "MQTTCLI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Topic filter to subscribe to
    #[arg(long)]
    topic: Option<String>,

    /// CA certificate file (PEM)
    #[arg(long, value_name = "FILE")]
    cafile: Option<String>,

    /// Client certificate file (PEM)
    #[arg(long, value_name = "FILE")]
    certfile: Option<String>,

    /// Client private key file (PEM)
    #[arg(long, value_name = "FILE")]
    keyfile: Option<String>,

    /// QoS level (0, 1 or 2); negative values leave the config file value
    #[arg(long, allow_negative_numbers = true)]
    qos: Option<i64>,

    /// Skip broker certificate verification (unsafe)
    #[arg(long)]
    insecure: bool,

    /// Do not print received messages
    #[arg(long)]
    quiet: bool,

    /// Report connection loss and other errors verbosely
    #[arg(long = "verbose-errors")]
    verbose_errors: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl From<&Cli> for CliOverrides {
    fn from(cli: &Cli) -> Self {
        Self {
            broker_url: cli.broker.clone(),
            client_id: cli.clientid.clone(),
            username: cli.username.clone(),
            password: cli.password.clone(),
            topic: cli.topic.clone(),
            ca_file: cli.cafile.clone(),
            cert_file: cli.certfile.clone(),
            key_file: cli.keyfile.clone(),
            qos: cli.qos,
            insecure: cli.insecure,
            quiet: cli.quiet,
            print_errors: cli.verbose_errors,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    init_default_logging(cli.verbose);

    debug!("Starting mqttcli v{}", env!("CARGO_PKG_VERSION"));

    let spec = match load_configuration(&cli) {
        Ok(spec) => spec,
        Err(e) => exit_with(&e),
    };
    debug!(?spec, "Resolved configuration");

    match subscriber::run(&spec).await {
        Ok(signal) => debug!("Clean shutdown after {}", signal),
        Err(e) => exit_with(&e),
    }
}

/// Merge the optional config file with the command line
fn load_configuration(cli: &Cli) -> Result<ConnectionSpec, SubscriberError> {
    let file = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Some(FileConfig::load_from_file(path)?)
        }
        None => None,
    };

    Ok(ConnectionSpec::resolve(file, &CliOverrides::from(cli))?)
}

fn exit_with(e: &SubscriberError) -> ! {
    error!(kind = e.kind().as_str(), "{}", e.operator_message());
    process::exit(e.exit_code());
}
