//! Private certificate authority.
//!
//! ```text
//! IssueRequest ──► CertificateAuthority::issue_root ──► Bundle (CA)
//!                                                        │
//! IssueRequest ──► CertificateIssuer::issue_leaf ◄───────┘
//!                    ├─► server Bundle (server auth)
//!                    └─► client Bundle (client auth)
//! ```
//!
//! Every issuance persists a PEM key file and a PEM certificate file. The CA
//! bundle stays in memory so leaves are signed without re-reading its key.
//!
//! # Modules
//!
//! - [`authority`]: self-signed root generation
//! - [`issuer`]: CA-signed leaf generation
//! - [`identity`]: fields extracted from a presented client certificate
//! - [`store`]: PEM persistence

pub mod authority;
pub mod identity;
pub mod issuer;
pub mod store;

use std::net::IpAddr;
use std::path::PathBuf;

use chrono::{DateTime, Days, Months, Utc};
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, KeyPair, RsaKeySize, SanType,
    SerialNumber, string::Ia5String,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CertConfig;
use crate::{Error, Result};

pub use authority::CertificateAuthority;
pub use identity::ClientIdentity;
pub use issuer::{CertificateIssuer, LeafUsage};

// ─────────────────────────────────────────────────────────────────────────────
// Request types
// ─────────────────────────────────────────────────────────────────────────────

/// Validity period added to the issuance time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validity {
    /// Whole years.
    pub years: u32,
    /// Whole months.
    pub months: u32,
    /// Whole days.
    pub days: u32,
}

impl Validity {
    /// End of the validity window for a certificate issued at `start`.
    ///
    /// Years and months are added as calendar months first, then days, so
    /// issuing on Jan 31 with one month yields the last day of February.
    ///
    /// # Errors
    ///
    /// Returns an error when the period is empty or the date overflows.
    pub fn not_after(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.years == 0 && self.months == 0 && self.days == 0 {
            return Err(Error::Config("Validity period must not be empty".to_string()));
        }

        let months = self
            .years
            .checked_mul(12)
            .and_then(|m| m.checked_add(self.months))
            .ok_or_else(|| Error::Config("Validity period is too long".to_string()))?;

        start
            .checked_add_months(Months::new(months))
            .and_then(|d| d.checked_add_days(Days::new(u64::from(self.days))))
            .ok_or_else(|| Error::Config("Validity period is too long".to_string()))
    }
}

/// Subject identity and alternative names of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectDescriptor {
    /// Common Name (the domain, for a server certificate).
    pub common_name: Option<String>,
    /// Country (C).
    pub country: Option<String>,
    /// Organization (O).
    pub organization: Option<String>,
    /// Organizational Unit (OU).
    pub unit: Option<String>,
    /// Locality (L).
    pub locality: Option<String>,
    /// State or province (ST).
    pub province: Option<String>,
    /// SAN DNS names.
    pub dns_names: Vec<String>,
    /// SAN email addresses.
    pub emails: Vec<String>,
    /// SAN IP addresses.
    pub ip_addresses: Vec<IpAddr>,
}

impl SubjectDescriptor {
    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let fields = [
            (DnType::CountryName, &self.country),
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.unit),
            (DnType::LocalityName, &self.locality),
            (DnType::StateOrProvinceName, &self.province),
            (DnType::CommonName, &self.common_name),
        ];
        for (kind, value) in fields {
            if let Some(value) = value {
                dn.push(kind, value.as_str());
            }
        }
        dn
    }

    fn subject_alt_names(&self) -> Result<Vec<SanType>> {
        let mut sans = Vec::with_capacity(
            self.dns_names.len() + self.emails.len() + self.ip_addresses.len(),
        );
        for dns in &self.dns_names {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Certificate(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        for email in &self.emails {
            let ia5 = Ia5String::try_from(email.as_str())
                .map_err(|e| Error::Certificate(format!("Invalid email SAN '{email}': {e}")))?;
            sans.push(SanType::Rfc822Name(ia5));
        }
        sans.extend(self.ip_addresses.iter().copied().map(SanType::IpAddress));
        Ok(sans)
    }
}

/// One issuance: key size, validity, subject and where to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueRequest {
    /// RSA modulus size in bits (2048, 3072 or 4096).
    pub bits: u32,
    /// Validity period.
    pub validity: Validity,
    /// Subject and SANs.
    pub subject: SubjectDescriptor,
    /// Destination of the PEM private key.
    pub key: PathBuf,
    /// Destination of the PEM certificate.
    pub certificate: PathBuf,
}

impl Default for IssueRequest {
    fn default() -> Self {
        Self {
            bits: 2048,
            validity: Validity {
                years: 1,
                ..Validity::default()
            },
            subject: SubjectDescriptor::default(),
            key: PathBuf::from("key.pem"),
            certificate: PathBuf::from("certificate.pem"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Key pair, certificate and issuer identity produced by one issuance.
pub struct Bundle {
    key: KeyPair,
    params: CertificateParams,
    certificate: Certificate,
    issuer: DistinguishedName,
}

impl Bundle {
    /// The signed certificate.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Subject of the issuing certificate (the bundle's own subject for a root).
    #[must_use]
    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// PEM-encoded certificate.
    #[must_use]
    pub fn cert_pem(&self) -> String {
        self.certificate.pem()
    }

    /// PEM-encoded PKCS#8 private key.
    #[must_use]
    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("subject", &self.params.distinguished_name)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Bundles written by [`issue_all`].
#[derive(Debug)]
pub struct IssuedSet {
    /// Root CA.
    pub ca: Bundle,
    /// Server leaf.
    pub server: Bundle,
    /// Client leaf.
    pub client: Bundle,
}

/// Issue the root CA, then a server and a client leaf signed by it.
///
/// # Errors
///
/// Stops at the first failing issuance and returns its error.
pub fn issue_all(config: &CertConfig) -> Result<IssuedSet> {
    let authority = CertificateAuthority::issue_root(&config.ca)?;
    let issuer = authority.issuer();
    let server = issuer.issue_leaf(&config.server, LeafUsage::Server)?;
    let client = issuer.issue_leaf(&config.client, LeafUsage::Client)?;

    info!(
        ca = %config.ca.certificate.display(),
        server = %config.server.certificate.display(),
        client = %config.client.certificate.display(),
        "Certificates issued"
    );

    Ok(IssuedSet {
        ca: authority.into_bundle(),
        server,
        client,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Generate an RSA key pair of the requested modulus size.
pub(crate) fn generate_key(bits: u32) -> Result<KeyPair> {
    let size = match bits {
        2048 => RsaKeySize::_2048,
        3072 => RsaKeySize::_3072,
        4096 => RsaKeySize::_4096,
        other => {
            return Err(Error::Config(format!(
                "Unsupported RSA key size {other} (expected 2048, 3072 or 4096)"
            )));
        }
    };

    KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, size)
        .map_err(|e| Error::Certificate(format!("Failed to generate {bits}-bit RSA key: {e}")))
}

/// Parameters common to roots and leaves: subject, window and serial.
pub(crate) fn base_params(request: &IssueRequest, now: DateTime<Utc>) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = request.subject.distinguished_name();
    params.not_before = to_offset(now)?;
    params.not_after = to_offset(request.validity.not_after(now)?)?;
    params.serial_number = Some(serial_number(now));
    Ok(params)
}

/// Serial whose high bits read as the issuance time (`YYYYMMDDhhmmss`) and
/// whose low 64 bits are random, so same-second issuances stay distinct.
pub(crate) fn serial_number(now: DateTime<Utc>) -> SerialNumber {
    let stamp: u128 = now
        .format("%Y%m%d%H%M%S")
        .to_string()
        .parse()
        .unwrap_or_default();
    let value = (stamp << 64) | u128::from(rand::random::<u64>());

    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    SerialNumber::from_slice(&bytes[first..])
}

fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::Config(format!("Date out of range: {e}")))
}
