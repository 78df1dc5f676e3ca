//! Self-signed root certificate authority.

use chrono::Utc;
use rcgen::{BasicConstraints, IsCa, KeyUsagePurpose};
use tracing::info;

use super::{Bundle, CertificateIssuer, IssueRequest, base_params, generate_key, store};
use crate::{Error, Result};

/// Trust anchor for every server and client certificate.
#[derive(Debug)]
pub struct CertificateAuthority {
    bundle: Bundle,
}

impl CertificateAuthority {
    /// Generate a root key pair and self-signed certificate in memory.
    ///
    /// Subject and issuer are equal; the certificate carries the CA flag and
    /// certificate-signing usage.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails, or if the
    /// request's validity or key size is invalid.
    pub fn generate(request: &IssueRequest) -> Result<Self> {
        let key = generate_key(request.bits)?;

        let mut params = base_params(request, Utc::now())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign];

        let certificate = params
            .self_signed(&key)
            .map_err(|e| Error::Certificate(format!("CA cert generation failed: {e}")))?;

        let issuer = params.distinguished_name.clone();
        Ok(Self {
            bundle: Bundle {
                key,
                params,
                certificate,
                issuer,
            },
        })
    }

    /// Generate the root and persist its key and certificate as PEM files at
    /// `request.key` and `request.certificate`.
    ///
    /// # Errors
    ///
    /// Returns the first generation or file-write error; nothing is returned
    /// for a partially written root.
    pub fn issue_root(request: &IssueRequest) -> Result<Self> {
        let authority = Self::generate(request)?;
        store::write_bundle(authority.bundle(), &request.key, &request.certificate)?;

        info!(
            bits = request.bits,
            certificate = %request.certificate.display(),
            "Root CA issued"
        );
        Ok(authority)
    }

    /// Issuer signing leaves with this root's key.
    #[must_use]
    pub fn issuer(&self) -> CertificateIssuer<'_> {
        CertificateIssuer::new(&self.bundle)
    }

    /// The root bundle.
    #[must_use]
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Consume the authority, keeping its bundle.
    #[must_use]
    pub fn into_bundle(self) -> Bundle {
        self.bundle
    }
}
