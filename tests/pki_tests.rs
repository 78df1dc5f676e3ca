//! Certificate authority round-trip tests
//!
//! Issues a full set with `issue_all` and checks it with the same verifier
//! the listener uses.

use std::path::Path;

use pretty_assertions::assert_eq;

use httpsh::config::CertConfig;
use httpsh::pki::{self, IssueRequest, SubjectDescriptor};
use httpsh::tls;

fn cert_config(dir: &Path, prefix: &str) -> CertConfig {
    let mut config = CertConfig::default();
    for (request, name) in [
        (&mut config.ca, "ca"),
        (&mut config.server, "server"),
        (&mut config.client, "client"),
    ] {
        request.bits = 2048;
        request.key = dir.join(format!("{prefix}-{name}.key"));
        request.certificate = dir.join(format!("{prefix}-{name}.crt"));
    }
    config.client.subject = SubjectDescriptor {
        common_name: Some("alice".to_string()),
        unit: Some("ops".to_string()),
        emails: vec!["alice@example.com".to_string()],
        ..SubjectDescriptor::default()
    };
    config
}

#[test]
fn test_issue_all_writes_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = cert_config(dir.path(), "a");
    pki::issue_all(&config).unwrap();

    for request in [&config.ca, &config.server, &config.client] {
        assert!(std::fs::read_to_string(&request.key).unwrap().contains("PRIVATE KEY"));
        assert!(std::fs::read_to_string(&request.certificate).unwrap().contains("BEGIN CERTIFICATE"));
    }
}

#[test]
fn test_client_verifies_against_its_ca() {
    let dir = tempfile::tempdir().unwrap();
    let config = cert_config(dir.path(), "a");
    pki::issue_all(&config).unwrap();

    let identity =
        tls::verify_client_certificate(&config.ca.certificate, &config.client.certificate).unwrap();
    assert_eq!(identity.common_name.as_deref(), Some("alice"));
    assert_eq!(identity.organizational_unit.as_deref(), Some("ops"));
    assert_eq!(identity.emails, vec!["alice@example.com".to_string()]);
    assert_eq!(identity.display_name, "alice");
}

#[test]
fn test_client_fails_against_unrelated_ca() {
    let dir = tempfile::tempdir().unwrap();
    let ours = cert_config(dir.path(), "a");
    let theirs = cert_config(dir.path(), "b");
    pki::issue_all(&ours).unwrap();
    pki::issue_all(&theirs).unwrap();

    assert!(tls::verify_client_certificate(&theirs.ca.certificate, &ours.client.certificate).is_err());
}

#[test]
fn test_server_certificate_is_not_for_clients() {
    let dir = tempfile::tempdir().unwrap();
    let config = cert_config(dir.path(), "a");
    pki::issue_all(&config).unwrap();

    assert!(tls::verify_client_certificate(&config.ca.certificate, &config.server.certificate).is_err());
}

#[test]
fn test_server_material_builds_tls_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = cert_config(dir.path(), "a");
    pki::issue_all(&config).unwrap();

    let tls_config = tls::build_tls_config(
        &config.ca.certificate,
        &config.server.certificate,
        &config.server.key,
        "localhost",
    )
    .unwrap();
    assert_eq!(tls_config.alpn_protocols, vec![b"http/1.1".to_vec()]);
}

#[test]
fn test_failed_leaf_stops_issue_all() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = cert_config(dir.path(), "a");
    config.server = IssueRequest {
        bits: 1024,
        ..config.server.clone()
    };

    assert!(pki::issue_all(&config).is_err());
    // the root was written before the server leaf failed
    assert!(config.ca.certificate.exists());
    assert!(!config.server.certificate.exists());
    assert!(!config.client.certificate.exists());
}
