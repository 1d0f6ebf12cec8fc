//! TLS setup for broker and client connections.
//!
//! Certificates and keys are loaded from PEM files. The broker can optionally
//! require client certificates signed by a given root bundle.

use crate::error::{FlightError, Result};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

/// Broker-side TLS configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Require and verify client certificates (mutual TLS).
    pub verify_client: bool,
    /// Roots used to verify client certificates.
    pub root_certificates: Option<PathBuf>,
}

impl TlsSettings {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            verify_client: false,
            root_certificates: None,
        }
    }

    /// Enable mutual TLS against the given root bundle.
    pub fn with_client_verification(mut self, root_certificates: impl Into<PathBuf>) -> Self {
        self.verify_client = true;
        self.root_certificates = Some(root_certificates.into());
        self
    }
}

/// Client-side TLS configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTlsSettings {
    pub root_certificates: PathBuf,
    /// Certificate and key presented to brokers that verify clients.
    pub identity: Option<(PathBuf, PathBuf)>,
}

impl ClientTlsSettings {
    pub fn new(root_certificates: impl Into<PathBuf>) -> Self {
        Self {
            root_certificates: root_certificates.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.identity = Some((cert_path.into(), key_path.into()));
        self
    }
}

fn tls_error(path: &Path, message: impl std::fmt::Display) -> FlightError {
    FlightError::Tls {
        message: format!("{}: {}", path.display(), message),
    }
}

/// Load every certificate in a PEM file; an empty file is an error.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| tls_error(path, e))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path, e))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found"));
    }

    info!("Loaded {} certificates from {}", certs.len(), path.display());
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| tls_error(path, e))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(path, e))?
        .ok_or_else(|| tls_error(path, "no private key found"))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Build the acceptor used to wrap inbound broker connections.
pub fn server_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor> {
    let certs = load_certs(&settings.cert_path)?;
    let key = load_private_key(&settings.key_path)?;

    let builder = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?;

    let config = if settings.verify_client {
        let roots_path = settings
            .root_certificates
            .as_deref()
            .ok_or_else(|| FlightError::Config {
                key: "root_certificates".to_string(),
                message: "client verification needs a root certificate bundle".to_string(),
            })?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(load_roots(roots_path)?))
            .build()
            .map_err(|e| FlightError::Tls {
                message: e.to_string(),
            })?;
        info!("Client certificate verification enabled");
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the connector used by clients dialing `grpc+tls` locations.
pub fn client_connector(settings: &ClientTlsSettings) -> Result<TlsConnector> {
    let roots = load_roots(&settings.root_certificates)?;
    let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    let config = match &settings.identity {
        Some((cert_path, key_path)) => {
            builder.with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_cert_file() {
        let err = load_certs(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, FlightError::Tls { .. }));
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }

    #[test]
    fn test_file_without_certificates() {
        let file = pem_file("just some text\n");
        let err = load_certs(file.path()).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }

    #[test]
    fn test_file_without_key() {
        let file = pem_file("");
        let err = load_private_key(file.path()).unwrap_err();
        assert!(err.to_string().contains("no private key found"));
    }

    #[test]
    fn test_acceptor_fails_on_missing_material() {
        let settings = TlsSettings::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(server_acceptor(&settings).is_err());
    }

    #[test]
    fn test_client_verification_settings() {
        let settings = TlsSettings::new("c.pem", "k.pem").with_client_verification("ca.pem");
        assert!(settings.verify_client);
        assert_eq!(settings.root_certificates, Some(PathBuf::from("ca.pem")));
    }

    #[test]
    fn test_connector_needs_readable_roots() {
        let Err(err) = client_connector(&ClientTlsSettings::new("/nonexistent/ca.pem")) else {
            panic!("Expected missing roots to fail");
        };
        assert!(matches!(err, FlightError::Tls { .. }));
    }
}
