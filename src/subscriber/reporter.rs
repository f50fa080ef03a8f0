//! Operator-facing output for deliveries and connection loss
//!
//! [`ConsoleReporter`] captures the display flags by value when it is built,
//! so the event loop never touches configuration after startup.

use crate::config::ConnectionSpec;
use crate::transport::mqtt::{qos_number, ConnectionLostHandler, Delivery, DeliveryHandler};
use tracing::{error, info};

/// Display adapter implementing both event-handler traits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsoleReporter {
    quiet: bool,
    print_errors: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool, print_errors: bool) -> Self {
        Self {
            quiet,
            print_errors,
        }
    }

    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        Self::new(spec.quiet, spec.print_errors)
    }

    /// Line for a delivery, or `None` when quiet
    pub fn message_line(&self, delivery: &Delivery) -> Option<String> {
        (!self.quiet).then(|| delivery.to_string())
    }

    /// Line for a connection loss, or `None` unless verbose errors are on
    pub fn connection_lost_line(&self, cause: &str) -> Option<String> {
        self.print_errors
            .then(|| format!("MQTT connection lost: {cause}"))
    }
}

impl DeliveryHandler for ConsoleReporter {
    fn on_message(&self, delivery: &Delivery) {
        if let Some(line) = self.message_line(delivery) {
            info!(
                topic = %delivery.topic,
                qos = qos_number(delivery.qos),
                retain = delivery.retain,
                bytes = delivery.payload.len(),
                "{}",
                line
            );
        }
    }
}

impl ConnectionLostHandler for ConsoleReporter {
    fn on_connection_lost(&self, cause: &str) {
        if let Some(line) = self.connection_lost_line(cause) {
            error!(cause = %cause, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::QoS;

    fn delivery() -> Delivery {
        Delivery {
            topic: "plant/line1/temp".to_string(),
            qos: QoS::ExactlyOnce,
            payload: Bytes::from_static(b"{\"c\":21.5}"),
            retain: true,
        }
    }

    #[test]
    fn test_message_line_format() {
        let reporter = ConsoleReporter::new(false, false);
        assert_eq!(
            reporter.message_line(&delivery()).as_deref(),
            Some("Topic=plant/line1/temp QoS=2 Payload={\"c\":21.5}")
        );
    }

    #[test]
    fn test_quiet_suppresses_messages() {
        let reporter = ConsoleReporter::new(true, true);
        assert!(reporter.message_line(&delivery()).is_none());
        // Quiet does not hide connection loss when verbose errors are on
        assert!(reporter.connection_lost_line("eof").is_some());
    }

    #[test]
    fn test_connection_loss_needs_verbose_errors() {
        let reporter = ConsoleReporter::new(false, false);
        assert!(reporter.connection_lost_line("eof").is_none());

        let reporter = ConsoleReporter::new(false, true);
        assert_eq!(
            reporter.connection_lost_line("I/O error: connection reset").as_deref(),
            Some("MQTT connection lost: I/O error: connection reset")
        );
    }

    #[test]
    fn test_binary_payload_is_rendered_lossy() {
        let reporter = ConsoleReporter::default();
        let binary = Delivery {
            topic: "raw".to_string(),
            qos: QoS::AtMostOnce,
            payload: Bytes::from_static(&[0x66, 0x6f, 0xff, 0x6f]),
            retain: false,
        };
        assert_eq!(
            reporter.message_line(&binary).as_deref(),
            Some("Topic=raw QoS=0 Payload=fo\u{fffd}o")
        );
    }

    #[test]
    fn test_from_spec_captures_flags() {
        let mut spec = ConnectionSpec::new("tcp://localhost:1883", "c", "t");
        spec.quiet = true;
        let reporter = ConsoleReporter::from_spec(&spec);
        spec.quiet = false;
        assert!(reporter.message_line(&delivery()).is_none());
    }
}
