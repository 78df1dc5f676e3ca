//! rustls server configuration and PEM loading.
//!
//! All certificate and key files are expected in **PEM format**.

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{ServerSessionMemoryCache, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use tracing::{debug, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::pki::ClientIdentity;
use crate::{Error, Result};

/// Number of sessions kept for resumption.
pub const SESSION_CACHE_SIZE: usize = 10;

/// The only protocol version negotiated, in both directions.
pub static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Crypto provider used for every TLS object in the crate.
#[must_use]
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build the mutual-TLS server configuration.
///
/// Every connection must present a client certificate chaining to the CA in
/// `ca_path`. Only TLS 1.3 is negotiated and at most
/// [`SESSION_CACHE_SIZE`] sessions are cached. A warning is logged when the
/// server certificate does not name `domain`.
///
/// # Errors
///
/// Returns an error if any file cannot be read or parsed, or if the
/// certificate and key do not match.
pub fn build_tls_config(
    ca_path: &Path,
    server_cert_path: &Path,
    server_key_path: &Path,
    domain: &str,
) -> Result<ServerConfig> {
    let server_certs = load_certs(server_cert_path)?;
    let server_key = load_private_key(server_key_path)?;
    let verifier = client_verifier(ca_path)?;

    if let Some(leaf) = server_certs.first() {
        if !certificate_names(leaf, domain) {
            warn!(
                domain,
                certificate = %server_cert_path.display(),
                "Server certificate does not name the configured domain"
            );
        }
    }

    let mut tls_cfg = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| Error::Tls(format!("Unsupported protocol version: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    tls_cfg.session_storage = ServerSessionMemoryCache::new(SESSION_CACHE_SIZE);
    tls_cfg.alpn_protocols = vec![b"http/1.1".to_vec()];

    debug!(
        server_cert = %server_cert_path.display(),
        ca_cert = %ca_path.display(),
        "mTLS config built"
    );

    Ok(tls_cfg)
}

/// Verify that the first certificate in `cert_path` is a valid client
/// certificate under the CA in `ca_path`, and return its identity.
///
/// Uses the same verifier as the listener, so a certificate accepted here is
/// accepted at the handshake.
///
/// # Errors
///
/// Returns `Error::Tls` when verification fails, or a file error.
pub fn verify_client_certificate(ca_path: &Path, cert_path: &Path) -> Result<ClientIdentity> {
    let verifier = client_verifier(ca_path)?;
    let chain = load_certs(cert_path)?;
    let (end_entity, intermediates) = chain
        .split_first()
        .ok_or_else(|| Error::Config(format!("No certificates found in '{}'", cert_path.display())))?;

    verifier
        .verify_client_cert(end_entity, intermediates, UnixTime::now())
        .map_err(|e| Error::Tls(format!("Certificate rejected: {e}")))?;

    ClientIdentity::from_der(end_entity)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!("Failed to parse certs from '{}': {e}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| {
            Error::Config(format!(
                "Failed to parse private key from '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| Error::Config(format!("No private key found in '{}'", path.display())))
}

/// Trust pool holding every certificate of the CA file.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or a certificate is not a
/// usable trust anchor.
pub fn load_trust_pool(ca_path: &Path) -> Result<RootCertStore> {
    let mut pool = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        pool.add(cert)
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}

fn client_verifier(ca_path: &Path) -> Result<Arc<dyn ClientCertVerifier>> {
    let pool = load_trust_pool(ca_path)?;
    WebPkiClientVerifier::builder_with_provider(Arc::new(pool), provider())
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))
}

/// `true` when `domain` appears as a DNS SAN, an IP SAN or the CN.
fn certificate_names(cert: &CertificateDer<'_>, domain: &str) -> bool {
    let Ok((_, cert)) = X509Certificate::from_der(cert) else {
        return false;
    };

    let ip: Option<std::net::IpAddr> = domain.parse().ok();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        let listed = san.value.general_names.iter().any(|name| match name {
            GeneralName::DNSName(dns) => dns.eq_ignore_ascii_case(domain),
            GeneralName::IPAddress(bytes) => ip.is_some_and(|ip| match ip {
                std::net::IpAddr::V4(v4) => *bytes == v4.octets().as_slice(),
                std::net::IpAddr::V6(v6) => *bytes == v6.octets().as_slice(),
            }),
            _ => false,
        });
        if listed {
            return true;
        }
    }

    cert.subject()
        .iter_common_name()
        .filter_map(|attr| attr.as_str().ok())
        .any(|cn| cn.eq_ignore_ascii_case(domain))
}
