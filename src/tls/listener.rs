//! TCP socket binding.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use tokio::net::{TcpListener, lookup_host};
use tracing::info;

use crate::{Error, Result};

/// Address family a listener may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// IPv4 or IPv6, whichever resolves first.
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Network {
    /// `true` when `addr` belongs to this family.
    #[must_use]
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => addr.is_ipv4(),
            Self::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            other => Err(Error::Config(format!(
                "Unknown network '{other}' (expected tcp, tcp4 or tcp6)"
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
        })
    }
}

/// Resolve `host:port` and bind the first address of the requested family.
///
/// # Errors
///
/// Returns `Error::Config` for an unknown network, and `Error::Io` when the
/// host does not resolve to a matching address or the bind fails.
pub async fn listen(network: &str, host: &str, port: u16) -> Result<TcpListener> {
    let network: Network = network.parse()?;

    let addr = lookup_host((host, port))
        .await?
        .find(|addr| network.accepts(addr))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} has no {network} address"),
            )
        })?;

    let listener = TcpListener::bind(addr).await?;
    info!(network = %network, address = %listener.local_addr()?, "socket is listening");
    Ok(listener)
}
