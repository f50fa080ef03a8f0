//! Security material is loaded and classified before any network I/O.
//!
//! Certificates are generated on the fly with rcgen.

use mqttcli::config::ConnectionSpec;
use mqttcli::subscriber::{connect, prepare_security, ConsoleReporter};
use mqttcli::transport::mqtt::{BrokerEndpoint, TransportSecurityConfig};
use mqttcli::ErrorKind;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

struct Material {
    cert: NamedTempFile,
    key: NamedTempFile,
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn device_material() -> Material {
    let generated = rcgen::generate_simple_self_signed(vec!["device-01".to_string()]).unwrap();
    Material {
        cert: write_temp(&generated.cert.pem()),
        key: write_temp(&generated.key_pair.serialize_pem()),
    }
}

fn tls_spec() -> ConnectionSpec {
    ConnectionSpec::new("ssl://127.0.0.1:1", "tls-test", "x/y")
}

#[test]
fn test_unreadable_ca_fails_fast_with_ca_category() {
    let mut spec = tls_spec();
    spec.ca_file = Some(PathBuf::from("/nonexistent/mqttcli/AmazonRootCA1.pem"));

    let started = Instant::now();
    let err = prepare_security(&spec).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Ca);
    assert_eq!(err.kind().as_str(), "CAError");
    assert_ne!(err.exit_code(), 0);
    assert!(err.to_string().contains("AmazonRootCA1.pem"));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_ca_without_certificates_is_ca_error() {
    let ca = write_temp("-----BEGIN NOTHING-----\n-----END NOTHING-----\n");
    let mut spec = tls_spec();
    spec.ca_file = Some(ca.path().to_path_buf());

    let err = prepare_security(&spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ca);
}

#[test]
fn test_ca_on_tcp_url_still_builds_tls() {
    let material = device_material();
    let mut spec = ConnectionSpec::new("tcp://localhost:1883", "tls-test", "x/y");
    spec.ca_file = Some(material.cert.path().to_path_buf());

    let tls = prepare_security(&spec).unwrap();
    assert!(tls.is_some(), "security material implies TLS");
}

#[test]
fn test_mutual_tls_material_loads() {
    let ca = device_material();
    let device = device_material();
    let mut spec = tls_spec();
    spec.ca_file = Some(ca.cert.path().to_path_buf());
    spec.cert_file = Some(device.cert.path().to_path_buf());
    spec.key_file = Some(device.key.path().to_path_buf());

    let endpoint = BrokerEndpoint::parse(&spec.broker_url).unwrap();
    let security = TransportSecurityConfig::for_spec(&spec, &endpoint)
        .unwrap()
        .expect("ssl scheme needs TLS");
    assert_eq!(security.identity.expect("client identity").cert_chain().len(), 1);
    assert!(prepare_security(&spec).unwrap().is_some());
}

#[test]
fn test_key_without_certificate_is_identity_error() {
    let device = device_material();
    let mut spec = tls_spec();
    spec.key_file = Some(device.key.path().to_path_buf());

    let err = prepare_security(&spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Identity);
    assert_eq!(err.kind().as_str(), "IdentityError");
}

#[test]
fn test_swapped_identity_files_are_identity_error() {
    let device = device_material();
    let mut spec = tls_spec();
    spec.cert_file = Some(device.key.path().to_path_buf());
    spec.key_file = Some(device.cert.path().to_path_buf());

    let err = prepare_security(&spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Identity);
}

#[test]
fn test_certificate_with_another_devices_key_is_identity_error() {
    let device = device_material();
    let other = device_material();
    let mut spec = tls_spec();
    spec.cert_file = Some(device.cert.path().to_path_buf());
    spec.key_file = Some(other.key.path().to_path_buf());

    let err = prepare_security(&spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Identity);
    assert_eq!(err.exit_code(), 3);
    assert!(
        err.to_string().contains("does not match"),
        "unexpected message: {err}"
    );
}

#[test]
fn test_insecure_without_ca_builds_config() {
    let mut spec = tls_spec();
    spec.insecure = true;

    assert!(prepare_security(&spec).unwrap().is_some());
}

#[tokio::test]
async fn test_tls_handshake_to_closed_port_is_connect_error() {
    let mut spec = tls_spec();
    spec.insecure = true;
    let tls = prepare_security(&spec).unwrap();

    let err = connect(&spec, tls, Arc::new(ConsoleReporter::default()))
        .await
        .err()
        .expect("nothing listens on port 1");
    assert_eq!(err.kind(), ErrorKind::Connect);
}
