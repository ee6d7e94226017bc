//! TLS/certificate handling for relaypick.
//!
//! This module provides:
//! - rustls configuration builders for the prober (CA, fingerprint, insecure)
//! - SHA-256 fingerprint computation and parsing
//! - Self-signed certificate generation and a server config builder,
//!   used by in-process relay stubs in tests and local development

use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// Result type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Certificate and key pair with computed fingerprint.
#[derive(Clone)]
pub struct CertKeyPair {
    /// Certificate chain in DER format.
    pub cert_der: Vec<Vec<u8>>,
    /// Private key in DER format (PKCS#8).
    pub key_der: Vec<u8>,
    /// SHA-256 fingerprint of the certificate (colon-separated hex).
    pub fingerprint: String,
}

/// Generates a self-signed ECDSA P-256 certificate for the given hostnames.
pub fn generate_self_signed_cert(hostnames: Vec<String>) -> TlsResult<CertKeyPair> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let mut params = CertificateParams::new(hostnames)
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    // Validity period of 1 year from now
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let cert_der = cert.der().to_vec();
    let fingerprint = compute_fingerprint(&cert_der);

    Ok(CertKeyPair {
        cert_der: vec![cert_der],
        key_der: key_pair.serialize_der(),
        fingerprint,
    })
}

/// Parses PEM-encoded certificates into DER format.
fn parse_cert_pem(pem: &str) -> TlsResult<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(pem.as_bytes());
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::InvalidCertificate(
            "no certificates found in PEM".to_string(),
        ));
    }

    Ok(certs.into_iter().map(|c| c.to_vec()).collect())
}

/// Computes the SHA-256 fingerprint of a DER-encoded certificate.
///
/// Returns the fingerprint in colon-separated lowercase hex format.
pub fn compute_fingerprint(cert_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    let hash = hasher.finalize();
    format_fingerprint(&hash.into())
}

/// Parses a fingerprint string in either colon-separated or continuous hex format.
///
/// Both formats are accepted (case-insensitive):
/// - Colon-separated: `aa:bb:cc:dd:...` (95 characters for 32 bytes)
/// - Continuous hex: `aabbccdd...` (64 characters)
pub fn parse_fingerprint(s: &str) -> TlsResult<[u8; 32]> {
    let s = s.trim();

    let hex_str = if s.contains(':') {
        if s.len() != 95 {
            return Err(TlsError::InvalidFingerprint(format!(
                "colon-separated fingerprint must be 95 characters, got {}",
                s.len()
            )));
        }
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 32 {
            return Err(TlsError::InvalidFingerprint(format!(
                "expected 32 colon-separated bytes, got {}",
                parts.len()
            )));
        }
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(TlsError::InvalidFingerprint(format!(
                    "byte {} has invalid length: expected 2, got {}",
                    i,
                    part.len()
                )));
            }
        }
        s.replace(':', "")
    } else {
        if s.len() != 64 {
            return Err(TlsError::InvalidFingerprint(format!(
                "continuous hex fingerprint must be 64 characters, got {}",
                s.len()
            )));
        }
        s.to_string()
    };

    let mut result = [0u8; 32];
    for (i, chunk) in hex_str.as_bytes().chunks(2).enumerate() {
        let hex_pair = std::str::from_utf8(chunk)
            .map_err(|_| TlsError::InvalidFingerprint("invalid UTF-8 in fingerprint".to_string()))?;
        result[i] = u8::from_str_radix(hex_pair, 16).map_err(|_| {
            TlsError::InvalidFingerprint(format!(
                "invalid hex character in fingerprint: {}",
                hex_pair
            ))
        })?;
    }

    Ok(result)
}

/// Formats a fingerprint as colon-separated lowercase hex.
pub fn format_fingerprint(bytes: &[u8; 32]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Builds a server TLS configuration (relay stub side).
pub fn build_server_config(cert_key: &CertKeyPair, alpn: &str) -> TlsResult<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = cert_key
        .cert_der
        .iter()
        .map(|c| CertificateDer::from(c.clone()))
        .collect();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert_key.key_der.clone()));

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::TlsConfig(e.to_string()))?;

    config.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    Ok(config)
}

/// Builds a client TLS configuration using CA certificate validation.
pub fn build_client_config_ca(ca_path: Option<&Path>, alpn: &str) -> TlsResult<ClientConfig> {
    let root_store = if let Some(path) = ca_path {
        // Load custom CA certificate
        let ca_pem = fs::read_to_string(path)?;
        let certs = parse_cert_pem(&ca_pem)?;

        let mut store = RootCertStore::empty();
        for cert in certs {
            store
                .add(CertificateDer::from(cert))
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
        store
    } else {
        // Use system root certificates
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        store
    };

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    config.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    Ok(config)
}

/// Builds a client TLS configuration using fingerprint verification.
pub fn build_client_config_fingerprint(
    fingerprint: &[u8; 32],
    alpn: &str,
) -> TlsResult<ClientConfig> {
    let verifier = FingerprintVerifier::new(*fingerprint);

    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    config.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    Ok(config)
}

/// Builds a client TLS configuration with no certificate verification (insecure, for development).
pub fn build_client_config_insecure(alpn: &str) -> TlsResult<ClientConfig> {
    tracing::warn!(
        "TLS certificate verification is disabled. This is insecure and should only be used for development."
    );
    let verifier = InsecureVerifier;

    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    config.alpn_protocols = vec![alpn.as_bytes().to_vec()];

    Ok(config)
}

/// Custom certificate verifier that checks the certificate's SHA-256 fingerprint.
#[derive(Debug)]
struct FingerprintVerifier {
    expected: [u8; 32],
}

impl FingerprintVerifier {
    fn new(expected: [u8; 32]) -> Self {
        Self { expected }
    }
}

impl rustls::client::danger::ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let mut hasher = Sha256::new();
        hasher.update(end_entity.as_ref());
        let hash: [u8; 32] = hasher.finalize().into();

        if hash == self.expected {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "certificate fingerprint mismatch: expected {}, got {}",
                format_fingerprint(&self.expected),
                format_fingerprint(&hash)
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Insecure certificate verifier that accepts any certificate (for development only).
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
