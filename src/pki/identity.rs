//! Client certificate identity.
//!
//! Fields read from the verified peer certificate of a connection and
//! attached to each of its requests for logging.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a presented client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Common Name (CN).
    pub common_name: Option<String>,
    /// First Organisational Unit (OU).
    pub organizational_unit: Option<String>,
    /// SAN email addresses.
    pub emails: Vec<String>,
    /// SAN DNS names.
    pub dns_names: Vec<String>,
    /// Serial number as colon-separated hex.
    pub serial: String,
    /// Label for logs: CN, else first email, else `"<unknown>"`.
    pub display_name: String,
}

impl ClientIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Tls(format!("Failed to parse client certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);
        let organizational_unit = cert
            .subject()
            .iter_organizational_unit()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);

        let mut emails = Vec::new();
        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::RFC822Name(email) => emails.push((*email).to_owned()),
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                    _ => {}
                }
            }
        }

        let display_name = common_name
            .as_deref()
            .or(emails.first().map(String::as_str))
            .unwrap_or("<unknown>")
            .to_owned();

        Ok(Self {
            common_name,
            organizational_unit,
            emails,
            dns_names,
            serial: cert.raw_serial_as_string(),
            display_name,
        })
    }
}
