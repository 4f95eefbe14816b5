//! STARTTLS material
//!
//! Certificates come from `server.crt`/`server.key` in the working
//! directory when both exist; otherwise a self-signed RSA-2048
//! certificate is generated in memory so STARTTLS always works in
//! development.

use crate::error::{NullmailError, Result};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

const SELF_SIGNED_VALIDITY_DAYS: i64 = 365;

#[derive(Clone)]
pub struct TlsConfig {
    server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Load certificates from PEM files when both are present, otherwise
    /// fall back to an in-memory self-signed certificate.
    pub fn load_or_generate(hostname: &str, cert_path: &str, key_path: &str) -> Result<Self> {
        if Path::new(cert_path).exists() && Path::new(key_path).exists() {
            match Self::from_pem_files(cert_path, key_path) {
                Ok(config) => {
                    info!("Loaded TLS certificate from {}", cert_path);
                    return Ok(config);
                }
                Err(e) => {
                    debug!("Failed to load certificate files: {}, generating instead", e);
                }
            }
        }

        let config = Self::self_signed(hostname)?;
        info!("Generated self-signed TLS certificate for {}", hostname);
        Ok(config)
    }

    /// Create TLS config from PEM certificate and key files.
    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        let cert_file = File::open(cert_path.as_ref())
            .map_err(|e| NullmailError::Tls(format!("Failed to open certificate file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);

        let certs = certs(&mut cert_reader)
            .map_err(|e| NullmailError::Tls(format!("Failed to read certificates: {e}")))?;

        if certs.is_empty() {
            return Err(NullmailError::Tls("No certificates found in file".to_string()));
        }

        debug!("Loaded {} certificate(s)", certs.len());

        let key = read_private_key(key_path.as_ref())?;

        Self::from_der(
            certs.into_iter().map(rustls::Certificate).collect(),
            rustls::PrivateKey(key),
        )
    }

    /// Generate a self-signed RSA-2048 certificate covering the service
    /// hostname, localhost, and the loopback addresses.
    pub fn self_signed(hostname: &str) -> Result<Self> {
        let cert = build_self_signed_certificate(hostname)?;

        let cert_der = cert
            .serialize_der()
            .map_err(|e| NullmailError::Tls(format!("Failed to serialize certificate: {e}")))?;
        let key_der = cert.serialize_private_key_der();

        Self::from_der(vec![rustls::Certificate(cert_der)], rustls::PrivateKey(key_der))
    }

    fn from_der(certs: Vec<rustls::Certificate>, key: rustls::PrivateKey) -> Result<Self> {
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| NullmailError::Tls(format!("Failed to create TLS config: {e}")))?;

        Ok(Self {
            server_config: Arc::new(config),
        })
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }

    /// A tokio acceptor for upgrading an established stream.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }
}

fn read_private_key(key_path: &Path) -> Result<Vec<u8>> {
    let key_file = File::open(key_path)
        .map_err(|e| NullmailError::Tls(format!("Failed to open key file: {e}")))?;
    let mut key_reader = BufReader::new(key_file);

    let mut keys = pkcs8_private_keys(&mut key_reader)
        .map_err(|e| NullmailError::Tls(format!("Failed to read PKCS8 keys: {e}")))?;
    if let Some(key) = keys.pop() {
        return Ok(key);
    }

    // Not PKCS8; retry as a traditional RSA key.
    let key_file = File::open(key_path)
        .map_err(|e| NullmailError::Tls(format!("Failed to open key file: {e}")))?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys = rsa_private_keys(&mut key_reader)
        .map_err(|e| NullmailError::Tls(format!("Failed to read RSA keys: {e}")))?;

    keys.pop()
        .ok_or_else(|| NullmailError::Tls("No private key found in file".to_string()))
}

fn build_self_signed_certificate(hostname: &str) -> Result<rcgen::Certificate> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
    use rsa::pkcs8::EncodePrivateKey;

    // rcgen cannot generate RSA keys itself, so the key comes from the
    // rsa crate and is handed over as PKCS8.
    let mut rng = rand::thread_rng();
    let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| NullmailError::Tls(format!("Failed to generate RSA key: {e}")))?;
    let key_der = private_key
        .to_pkcs8_der()
        .map_err(|e| NullmailError::Tls(format!("Failed to encode RSA key: {e}")))?;
    let key_pair = KeyPair::from_der(key_der.as_bytes())
        .map_err(|e| NullmailError::Tls(format!("Failed to load RSA key: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Nullmail Development");
    params.distinguished_name = dn;
    params.subject_alt_names = vec![
        SanType::DnsName("localhost".to_string()),
        SanType::DnsName(hostname.to_string()),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(SELF_SIGNED_VALIDITY_DAYS);
    params.alg = &rcgen::PKCS_RSA_SHA256;
    params.key_pair = Some(key_pair);

    rcgen::Certificate::from_params(params)
        .map_err(|e| NullmailError::Tls(format!("Failed to generate certificate: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_self_signed_config() {
        let config = TlsConfig::self_signed("test.local").unwrap();
        assert!(Arc::strong_count(&config.server_config) >= 1);
    }

    #[test]
    fn test_self_signed_pem_output() {
        let cert = build_self_signed_certificate("test.local").unwrap();
        assert!(cert.serialize_pem().unwrap().contains("BEGIN CERTIFICATE"));
        assert!(cert
            .serialize_private_key_pem()
            .contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_pem_round_trip() {
        let cert = build_self_signed_certificate("test.local").unwrap();

        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file
            .write_all(cert.serialize_pem().unwrap().as_bytes())
            .unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file
            .write_all(cert.serialize_private_key_pem().as_bytes())
            .unwrap();

        TlsConfig::from_pem_files(cert_file.path(), key_file.path()).unwrap();
    }

    #[test]
    fn test_missing_files_fall_back_to_generated() {
        let config =
            TlsConfig::load_or_generate("test.local", "/nonexistent.crt", "/nonexistent.key");
        assert!(config.is_ok());
    }
}
