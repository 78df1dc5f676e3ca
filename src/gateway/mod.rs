//! Command gateway
//!
//! ```text
//! TcpListener ──► Server (TLS handshake, Peer extension, HTTP/1.1)
//!                   └─► CommandGateway::handle
//!                         ├─► Invocation::from_query   (whitelist, argument tokens)
//!                         ├─► dispatch::spawn          (subprocess, output relay)
//!                         └─► ResponseStream           (status, headers, body)
//! ```

pub mod arguments;
pub mod dispatch;
mod handler;
pub mod idle;
mod rejection;
mod response;
mod server;

use std::sync::Arc;

use axum::Router;

pub use arguments::{ArgumentToken, Invocation, clean_path};
pub use dispatch::Frame;
pub use handler::CommandGateway;
pub use rejection::{Rejection, UNKNOWN_ERROR};
pub use response::ResponseStream;
pub use server::{Peer, SHUTDOWN_TIMEOUT, Server, Timeouts};

use crate::Result;
use crate::config::ServerConfig;

/// Router answering every request with a [`CommandGateway`] for `config`.
///
/// # Errors
///
/// Returns `Error::Config` when the configured methods or MIME type are
/// invalid.
pub fn router(config: &ServerConfig) -> Result<Router> {
    Ok(Arc::new(CommandGateway::new(config)?).router())
}
