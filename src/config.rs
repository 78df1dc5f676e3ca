//! Configuration management
//!
//! One YAML document with two blocks: `server` drives the gateway and
//! `cert` describes the certificates issued by `httpsh cert`.
//!
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 8443
//!   domain: "gateway.internal"
//!   read_timeout: 10s
//!   directory: "/srv/share"
//!   methods: ["GET"]
//!   executables:
//!     ls: ["-l", "-a"]
//!     cat: []
//! cert:
//!   ca:
//!     bits: 4096
//!     validity: { years: 10 }
//!     subject: { common_name: "httpsh root" }
//! ```

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::pki::{IssueRequest, SubjectDescriptor, Validity};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Gateway server configuration
    pub server: ServerConfig,
    /// Certificate issuance configuration
    pub cert: CertConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables prefixed with `HTTPSH_` override the file,
    /// `__` separating nested keys (`HTTPSH_SERVER__PORT=9443`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("HTTPSH_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address family: `tcp`, `tcp4` or `tcp6`
    pub network: String,
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Name clients use to reach the gateway; expected in the server certificate
    pub domain: String,
    /// Bound on the TLS handshake and request header read (0 disables)
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,
    /// Bound on producing one response body (0 disables)
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,
    /// Close connections without I/O for this long (0 disables)
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
    /// PEM file holding the CA certificate clients must chain to
    pub ca_certificate: PathBuf,
    /// PEM file holding the server private key
    pub server_key: PathBuf,
    /// PEM file holding the server certificate
    pub server_certificate: PathBuf,
    /// Base directory for path arguments and subprocess working directory
    pub directory: PathBuf,
    /// Content type of every response
    pub mime: String,
    /// Allowed HTTP methods
    pub methods: Vec<String>,
    /// Executables and their permitted options
    pub executables: Whitelist,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8443,
            domain: "localhost".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            ca_certificate: PathBuf::from("certs/ca.crt"),
            server_key: PathBuf::from("certs/server.key"),
            server_certificate: PathBuf::from("certs/server.crt"),
            directory: PathBuf::from("."),
            mime: "text/plain; charset=utf-8".to_string(),
            methods: vec!["GET".to_string()],
            executables: Whitelist::default(),
        }
    }
}

/// Closed mapping of executable name to its permitted option tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist(BTreeMap<String, Vec<String>>);

impl Whitelist {
    /// Permitted options of `executable`, or `None` when it is not whitelisted.
    #[must_use]
    pub fn options(&self, executable: &str) -> Option<&[String]> {
        self.0.get(executable).map(Vec::as_slice)
    }

    /// Whitelisted executable names, sorted.
    pub fn executables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of whitelisted executables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when nothing may be executed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V, O> FromIterator<(K, V)> for Whitelist
where
    K: Into<String>,
    V: IntoIterator<Item = O>,
    O: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, options)| (name.into(), options.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}

/// Certificates produced by `httpsh cert`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    /// Root CA
    pub ca: IssueRequest,
    /// Server leaf (server authentication)
    pub server: IssueRequest,
    /// Client leaf (client authentication)
    pub client: IssueRequest,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            ca: IssueRequest {
                bits: 4096,
                validity: Validity {
                    years: 10,
                    ..Validity::default()
                },
                subject: SubjectDescriptor {
                    common_name: Some("httpsh root CA".to_string()),
                    ..SubjectDescriptor::default()
                },
                key: PathBuf::from("certs/ca.key"),
                certificate: PathBuf::from("certs/ca.crt"),
            },
            server: IssueRequest {
                subject: SubjectDescriptor {
                    common_name: Some("localhost".to_string()),
                    dns_names: vec!["localhost".to_string()],
                    ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
                    ..SubjectDescriptor::default()
                },
                key: PathBuf::from("certs/server.key"),
                certificate: PathBuf::from("certs/server.crt"),
                ..IssueRequest::default()
            },
            client: IssueRequest {
                subject: SubjectDescriptor {
                    common_name: Some("httpsh client".to_string()),
                    ..SubjectDescriptor::default()
                },
                key: PathBuf::from("certs/client.key"),
                certificate: PathBuf::from("certs/client.crt"),
                ..IssueRequest::default()
            },
        }
    }
}

/// Serde support for durations written as seconds or with a unit suffix.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    /// Serialize Duration to a string of whole seconds (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize `30`, `"30"`, `"30s"`, `"5m"` or `"100ms"`
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be read as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" before "s": both end in 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m.saturating_mul(60)))
        } else {
            s.parse().map(Duration::from_secs)
        }
    }
}
