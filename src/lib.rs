//! httpsh
//!
//! A remote command gateway: whitelisted executables exposed over HTTPS to
//! holders of a client certificate issued by a private certificate authority.
//!
//! # Features
//!
//! - **Private CA**: RSA root and leaf issuance with PEM persistence ([`pki`])
//! - **Mutual TLS**: TLS 1.3 only, client certificates required ([`tls`])
//! - **Closed whitelist**: executables and options are fixed by configuration
//! - **Streaming**: subprocess output is relayed as it is produced
//! - **Graceful shutdown**: SIGINT drains in-flight requests for up to a minute

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pki;
pub mod tls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
