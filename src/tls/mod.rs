//! Mutual-TLS listener.
//!
//! # Architecture
//!
//! ```text
//! listen(network, host, port) ──► TcpListener
//! build_tls_config(ca, cert, key, domain) ──► rustls::ServerConfig
//!   → TLS 1.3 only, client certificate required
//!   → client chain verified against the CA file
//! ```
//!
//! # Modules
//!
//! - [`config`]: rustls configuration, PEM loading, client verification
//! - [`listener`]: TCP socket binding by address family

pub mod config;
pub mod listener;

pub use config::{
    build_tls_config, load_certs, load_private_key, load_trust_pool, verify_client_certificate,
};
pub use listener::{Network, listen};
