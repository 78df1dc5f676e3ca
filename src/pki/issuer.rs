//! CA-signed leaf certificates for the server and its clients.

use chrono::Utc;
use rcgen::{ExtendedKeyUsagePurpose, Issuer, KeyUsagePurpose};
use tracing::info;

use super::{Bundle, IssueRequest, base_params, generate_key, store};
use crate::{Error, Result};

/// Intended use of a leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server authentication.
    Server,
    /// TLS client authentication.
    Client,
}

impl LeafUsage {
    fn extended_key_usages(self) -> Vec<ExtendedKeyUsagePurpose> {
        match self {
            Self::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            Self::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        }
    }
}

/// Signs leaf certificates with a CA bundle's key.
#[derive(Debug, Clone, Copy)]
pub struct CertificateIssuer<'a> {
    ca: &'a Bundle,
}

impl<'a> CertificateIssuer<'a> {
    /// Issuer for the given CA bundle.
    #[must_use]
    pub fn new(ca: &'a Bundle) -> Self {
        Self { ca }
    }

    /// Generate a key pair and a certificate signed by the CA, in memory.
    ///
    /// The issuer name is the CA's subject. SANs are copied verbatim from
    /// the request's subject descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid SANs, key size or validity, or if
    /// signing fails.
    pub fn sign(&self, request: &IssueRequest, usage: LeafUsage) -> Result<Bundle> {
        let key = generate_key(request.bits)?;

        let mut params = base_params(request, Utc::now())?;
        params.subject_alt_names = request.subject.subject_alt_names()?;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = usage.extended_key_usages();

        let issuer = Issuer::from_params(&self.ca.params, &self.ca.key);
        let certificate = params
            .signed_by(&key, &issuer)
            .map_err(|e| Error::Certificate(format!("Leaf cert signing failed: {e}")))?;

        Ok(Bundle {
            key,
            params,
            certificate,
            issuer: self.ca.params.distinguished_name.clone(),
        })
    }

    /// [`sign`](Self::sign), then persist key and certificate as PEM files.
    ///
    /// # Errors
    ///
    /// Returns the first signing or file-write error.
    pub fn issue_leaf(&self, request: &IssueRequest, usage: LeafUsage) -> Result<Bundle> {
        let bundle = self.sign(request, usage)?;
        store::write_bundle(&bundle, &request.key, &request.certificate)?;

        info!(
            usage = ?usage,
            common_name = request.subject.common_name.as_deref().unwrap_or(""),
            certificate = %request.certificate.display(),
            "Leaf certificate issued"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{CertificateAuthority, SubjectDescriptor, Validity};
    use x509_parser::extensions::GeneralName;
    use x509_parser::prelude::{FromDer, X509Certificate};

    fn ca() -> CertificateAuthority {
        CertificateAuthority::generate(&IssueRequest {
            subject: SubjectDescriptor {
                common_name: Some("Leaf Test CA".to_string()),
                ..SubjectDescriptor::default()
            },
            ..IssueRequest::default()
        })
        .unwrap()
    }

    fn leaf_request(dir: &std::path::Path) -> IssueRequest {
        IssueRequest {
            validity: Validity {
                days: 30,
                ..Validity::default()
            },
            subject: SubjectDescriptor {
                common_name: Some("gw.internal".to_string()),
                organization: Some("Example".to_string()),
                dns_names: vec!["gw.internal".to_string(), "localhost".to_string()],
                emails: vec!["ops@example.com".to_string()],
                ip_addresses: vec!["127.0.0.1".parse().unwrap()],
                ..SubjectDescriptor::default()
            },
            key: dir.join("server.key"),
            certificate: dir.join("server.crt"),
            ..IssueRequest::default()
        }
    }

    #[test]
    fn leaf_issuer_is_ca_subject() {
        let dir = tempfile::tempdir().unwrap();
        let ca = ca();
        let leaf = ca.issuer().sign(&leaf_request(dir.path()), LeafUsage::Server).unwrap();

        let ca_der = ca.bundle().certificate().der().to_vec();
        let leaf_der = leaf.certificate().der().to_vec();
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
        let (_, leaf_cert) = X509Certificate::from_der(&leaf_der).unwrap();

        assert_eq!(leaf_cert.issuer().to_string(), ca_cert.subject().to_string());
        assert!(!leaf_cert.is_ca());
        assert_eq!(leaf.issuer(), ca.bundle().issuer());
    }

    #[test]
    fn leaf_carries_sans_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = ca().issuer().sign(&leaf_request(dir.path()), LeafUsage::Server).unwrap();

        let der = leaf.certificate().der().to_vec();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let san = cert.subject_alternative_name().unwrap().unwrap().value;

        let mut dns = Vec::new();
        let mut emails = Vec::new();
        let mut ips = Vec::new();
        for name in &san.general_names {
            match name {
                GeneralName::DNSName(d) => dns.push((*d).to_string()),
                GeneralName::RFC822Name(e) => emails.push((*e).to_string()),
                GeneralName::IPAddress(ip) => ips.push(ip.to_vec()),
                _ => {}
            }
        }
        assert_eq!(dns, vec!["gw.internal", "localhost"]);
        assert_eq!(emails, vec!["ops@example.com"]);
        assert_eq!(ips, vec![vec![127, 0, 0, 1]]);
    }

    #[test]
    fn usage_controls_extended_key_usage() {
        let dir = tempfile::tempdir().unwrap();
        let ca = ca();
        let issuer = ca.issuer();

        for (usage, server, client) in [
            (LeafUsage::Server, true, false),
            (LeafUsage::Client, false, true),
        ] {
            let leaf = issuer.sign(&leaf_request(dir.path()), usage).unwrap();
            let der = leaf.certificate().der().to_vec();
            let (_, cert) = X509Certificate::from_der(&der).unwrap();

            let eku = cert.extended_key_usage().unwrap().unwrap().value;
            assert_eq!(eku.server_auth, server, "{usage:?}");
            assert_eq!(eku.client_auth, client, "{usage:?}");

            let ku = cert.key_usage().unwrap().unwrap().value;
            assert!(ku.digital_signature());
            assert!(!ku.key_cert_sign());
        }
    }

    #[test]
    fn sequential_leaves_get_distinct_serials() {
        let dir = tempfile::tempdir().unwrap();
        let ca = ca();
        let issuer = ca.issuer();
        let first = issuer.sign(&leaf_request(dir.path()), LeafUsage::Client).unwrap();
        let second = issuer.sign(&leaf_request(dir.path()), LeafUsage::Client).unwrap();

        let first_der = first.certificate().der().to_vec();
        let second_der = second.certificate().der().to_vec();
        let (_, a) = X509Certificate::from_der(&first_der).unwrap();
        let (_, b) = X509Certificate::from_der(&second_der).unwrap();
        assert_ne!(a.raw_serial(), b.raw_serial());
    }

    #[test]
    fn issue_leaf_persists_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let req = leaf_request(dir.path());
        let leaf = ca().issuer().issue_leaf(&req, LeafUsage::Client).unwrap();

        assert_eq!(std::fs::read_to_string(&req.certificate).unwrap(), leaf.cert_pem());
        assert_eq!(std::fs::read_to_string(&req.key).unwrap(), leaf.key_pem());
    }

    #[test]
    fn invalid_san_aborts_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = leaf_request(dir.path());
        req.subject.emails = vec!["ünïcode@example.com".to_string()];

        assert!(ca().issuer().issue_leaf(&req, LeafUsage::Client).is_err());
        assert!(!req.key.exists());
        assert!(!req.certificate.exists());
    }
}
