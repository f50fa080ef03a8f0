//! TLS material loading for broker connections
//!
//! Reads CA bundles and client identity pairs from PEM files and turns them
//! into a rustls [`ClientConfig`]. Only local file reads happen here; no
//! network I/O.
//!
//! Every config is built against the ring crypto provider explicitly, so no
//! process-wide default provider has to be installed.

use super::connection::BrokerEndpoint;
use crate::config::ConnectionSpec;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring as ring_provider, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{
    version, ClientConfig, DigitallySignedStruct, InconsistentKeys, RootCertStore,
    SignatureScheme, SupportedProtocolVersion,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Protocol versions offered to the broker. TLS 1.2 is the floor.
pub static TLS12_AND_UP: &[&SupportedProtocolVersion] = &[&version::TLS13, &version::TLS12];

/// TLS material errors
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read CA file {}: {source}", .path.display())]
    CaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to append CA certificate from {}: {reason}", .path.display())]
    CaInvalid { path: PathBuf, reason: String },
    #[error("Failed to load platform trust roots: {0}")]
    SystemRoots(String),
    #[error("Client identity error: {0}")]
    Identity(String),
}

impl TlsError {
    /// True for trust-store failures, false for client identity failures
    pub fn is_ca_error(&self) -> bool {
        !matches!(self, TlsError::Identity(_))
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(ring_provider::default_provider())
}

/// Certificates used to validate the broker's chain
#[derive(Debug, Clone)]
pub enum TrustStore {
    /// Platform root set, resolved when the client config is built
    SystemDefault,
    /// Roots parsed from a CA file
    Custom(RootCertStore),
}

/// Certificate chain and private key presented for mutual TLS
#[derive(Debug)]
pub struct ClientIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ClientIdentity {
    /// Load a PEM certificate chain and private key and check that the key
    /// belongs to the leaf certificate
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let mut reader = open_pem(cert_path)
            .map_err(|e| TlsError::Identity(format!("{}: {e}", cert_path.display())))?;
        let cert_chain = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Identity(format!("{}: {e}", cert_path.display())))?;
        if cert_chain.is_empty() {
            return Err(TlsError::Identity(format!(
                "no PEM certificate found in {}",
                cert_path.display()
            )));
        }

        let mut reader = open_pem(key_path)
            .map_err(|e| TlsError::Identity(format!("{}: {e}", key_path.display())))?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| TlsError::Identity(format!("{}: {e}", key_path.display())))?
            .ok_or_else(|| {
                TlsError::Identity(format!("no PEM private key found in {}", key_path.display()))
            })?;

        let signing_key = crypto_provider()
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| TlsError::Identity(format!("{}: {e}", key_path.display())))?;

        match CertifiedKey::new(cert_chain.clone(), signing_key).keys_match() {
            Ok(()) => {}
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
                return Err(TlsError::Identity(format!(
                    "private key {} does not match certificate {}",
                    key_path.display(),
                    cert_path.display()
                )));
            }
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
                debug!(
                    "Key type in {} cannot be compared with its certificate",
                    key_path.display()
                );
            }
            Err(e) => {
                return Err(TlsError::Identity(format!("{}: {e}", cert_path.display())));
            }
        }

        Ok(Self { cert_chain, key })
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

/// Validated transport security settings for one connection attempt
#[derive(Debug, Clone)]
pub struct TransportSecurityConfig {
    pub trust_store: TrustStore,
    pub identity: Option<ClientIdentity>,
    /// Versions offered in the handshake, never below TLS 1.2
    pub protocol_versions: &'static [&'static SupportedProtocolVersion],
    /// Disables broker certificate verification. Never use in production.
    pub insecure: bool,
}

impl TransportSecurityConfig {
    /// TLS with platform roots and no client certificate
    pub fn system_default(insecure: bool) -> Self {
        Self {
            trust_store: TrustStore::SystemDefault,
            identity: None,
            protocol_versions: TLS12_AND_UP,
            insecure,
        }
    }

    /// Build the configuration from optional CA, certificate and key paths.
    ///
    /// The certificate and key must be given together.
    pub fn from_files(
        ca_path: Option<&Path>,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
        insecure: bool,
    ) -> Result<Self, TlsError> {
        let trust_store = match ca_path {
            Some(path) => TrustStore::Custom(load_ca_roots(path)?),
            None => TrustStore::SystemDefault,
        };

        let identity = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(ClientIdentity::load(cert, key)?),
            (None, None) => None,
            (Some(_), None) => {
                return Err(TlsError::Identity(
                    "certificate file given without a key file".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(TlsError::Identity(
                    "key file given without a certificate file".to_string(),
                ))
            }
        };

        Ok(Self {
            trust_store,
            identity,
            protocol_versions: TLS12_AND_UP,
            insecure,
        })
    }

    /// Load the security configuration `spec` needs on `endpoint`, or `None`
    /// for plain TCP.
    pub fn for_spec(
        spec: &ConnectionSpec,
        endpoint: &BrokerEndpoint,
    ) -> Result<Option<Self>, TlsError> {
        if !endpoint.requires_tls(spec) {
            return Ok(None);
        }

        Self::from_files(
            spec.ca_file.as_deref(),
            spec.cert_file.as_deref(),
            spec.key_file.as_deref(),
            spec.insecure,
        )
        .map(Some)
    }

    /// Produce the rustls client configuration
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TlsError> {
        // ring supports every version in TLS12_AND_UP
        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(self.protocol_versions)
            .map_err(|e| TlsError::Identity(e.to_string()))?;

        let builder = if self.insecure {
            warn!("TLS certificate verification is disabled (insecure); do not use in production");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification))
        } else {
            builder.with_root_certificates(self.resolve_roots()?)
        };

        let config = match &self.identity {
            Some(identity) => builder
                .with_client_auth_cert(identity.cert_chain.clone(), identity.key.clone_key())
                .map_err(|e| TlsError::Identity(e.to_string()))?,
            None => builder.with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    fn resolve_roots(&self) -> Result<RootCertStore, TlsError> {
        match &self.trust_store {
            TrustStore::Custom(roots) => Ok(roots.clone()),
            TrustStore::SystemDefault => {
                let native = rustls_native_certs::load_native_certs();
                for e in &native.errors {
                    debug!("Skipping platform certificate source: {}", e);
                }

                let mut roots = RootCertStore::empty();
                let (added, ignored) = roots.add_parsable_certificates(native.certs);
                debug!(added, ignored, "Loaded platform trust roots");
                if roots.is_empty() {
                    return Err(TlsError::SystemRoots(
                        "no usable certificates in the platform store".to_string(),
                    ));
                }
                Ok(roots)
            }
        }
    }
}

fn open_pem(path: &Path) -> std::io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

fn load_ca_roots(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut reader = open_pem(path).map_err(|source| TlsError::CaRead {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CaInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::CaInvalid {
            path: path.to_path_buf(),
            reason: "no PEM certificates found".to_string(),
        });
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert).map_err(|e| TlsError::CaInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    Ok(roots)
}

/// Accepts any broker certificate. Only installed when `insecure` is set.
#[derive(Debug)]
struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
