//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::idle::{IdleTimeout, InFlight};
use crate::config::ServerConfig;
use crate::pki::ClientIdentity;
use crate::{Error, Result};

/// How long in-flight connections may run after shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection timeouts; a zero value disables the corresponding bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// TLS handshake and request header read
    pub read: Duration,
    /// Production of one response body
    pub write: Duration,
    /// Connection without any I/O while no request is in flight
    pub idle: Duration,
}

impl From<&ServerConfig> for Timeouts {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read: config.read_timeout,
            write: config.write_timeout,
            idle: config.idle_timeout,
        }
    }
}

/// Remote end of a connection, attached to each of its requests.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Socket address of the client
    pub addr: SocketAddr,
    /// Identity from the verified client certificate
    pub identity: Option<ClientIdentity>,
    /// Requests being answered on the connection; holds the idle timer
    pub in_flight: InFlight,
}

/// Mutual-TLS HTTP/1.1 server
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    timeouts: Timeouts,
}

impl Server {
    /// Create a server accepting on `listener`.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        tls: rustls::ServerConfig,
        router: Router,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls)),
            router,
            timeouts,
        }
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until SIGINT, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop fails or in-flight connections
    /// outlive [`SHUTDOWN_TIMEOUT`].
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            info!("server is waiting");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT");
        })
        .await
    }

    /// Serve until `shutdown` completes, then shut down gracefully.
    ///
    /// Stops accepting, asks every connection to finish its current request
    /// and waits up to [`SHUTDOWN_TIMEOUT`] before aborting the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop fails or in-flight connections
    /// outlive [`SHUTDOWN_TIMEOUT`].
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let token = CancellationToken::new();
        let mut accept = tokio::spawn(accept_loop(self, token.clone()));
        info!("server is running");

        tokio::select! {
            () = shutdown => {}
            joined = &mut accept => {
                return match joined {
                    Ok(Ok(_)) => Err(Error::Internal("Accept loop stopped".to_string())),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(Error::Internal(format!("Accept loop panicked: {e}"))),
                };
            }
        }

        token.cancel();
        let mut connections = accept
            .await
            .map_err(|e| Error::Internal(format!("Accept loop panicked: {e}")))??;

        info!(in_flight = connections.len(), "Shutting down gracefully");
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = connections.len(), "Aborting connections after shutdown timeout");
            connections.shutdown().await;
            return Err(Error::Shutdown(format!(
                "connections still active after {}s",
                SHUTDOWN_TIMEOUT.as_secs()
            )));
        }

        info!("server is stopped");
        Ok(())
    }
}

/// Accept until `token` is cancelled; returns the still-running connections.
async fn accept_loop(server: Server, token: CancellationToken) -> Result<JoinSet<()>> {
    let mut connections = JoinSet::new();

    loop {
        // reap finished connections
        while connections.try_join_next().is_some() {}

        let (stream, addr) = tokio::select! {
            () = token.cancelled() => return Ok(connections),
            accepted = server.listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) if is_connection_error(&e) => {
                    debug!(error = %e, "Accept failed for one connection");
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            },
        };

        connections.spawn(serve_connection(
            stream,
            addr,
            server.acceptor.clone(),
            server.router.clone(),
            server.timeouts,
            token.clone(),
        ));
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    timeouts: Timeouts,
    token: CancellationToken,
) {
    let handshake = acceptor.accept(stream);
    let handshake = if timeouts.read.is_zero() {
        handshake.await
    } else {
        match tokio::time::timeout(timeouts.read, handshake).await {
            Ok(result) => result,
            Err(_) => {
                debug!(peer = %addr, "TLS handshake timed out");
                return;
            }
        }
    };
    let tls = match handshake {
        Ok(tls) => tls,
        Err(e) => {
            debug!(peer = %addr, error = %e, "TLS handshake failed");
            return;
        }
    };

    let identity = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|der| ClientIdentity::from_der(der).ok());
    debug!(
        peer = %addr,
        client = identity.as_ref().map_or("", |id| id.display_name.as_str()),
        "Connection established"
    );

    let in_flight = InFlight::default();
    let peer = Peer {
        addr,
        identity,
        in_flight: in_flight.clone(),
    };
    let service = TowerToHyperService::new(router.layer(Extension(peer)));
    let io = TokioIo::new(IdleTimeout::new(tls, timeouts.idle, in_flight));

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout((!timeouts.read.is_zero()).then_some(timeouts.read));

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = token.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        debug!(peer = %addr, error = %e, "Connection closed with error");
    }
}
