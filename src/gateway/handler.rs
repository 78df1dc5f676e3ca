//! The command gateway request handler.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use axum::{Extension, Router};
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::arguments::Invocation;
use super::dispatch::{self, Frame};
use super::idle::InFlightGuard;
use super::response::ResponseStream;
use super::{Peer, Rejection};
use crate::config::{ServerConfig, Whitelist};
use crate::{Error, Result};

/// Validates requests against the whitelist and runs the resulting command.
///
/// Built once from the [`ServerConfig`] and shared read-only by every
/// connection.
#[derive(Debug)]
pub struct CommandGateway {
    directory: PathBuf,
    mime: HeaderValue,
    methods: Vec<Method>,
    allow: HeaderValue,
    executables: Whitelist,
    write_timeout: Duration,
}

impl CommandGateway {
    /// Gateway for `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a method or the MIME type is not a valid
    /// header value.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_bytes())
                    .map_err(|e| Error::Config(format!("Invalid method '{m}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let allow = HeaderValue::from_str(&config.methods.join(", "))
            .map_err(|e| Error::Config(format!("Invalid methods: {e}")))?;
        let mime = HeaderValue::from_str(&config.mime)
            .map_err(|e| Error::Config(format!("Invalid mime '{}': {e}", config.mime)))?;

        if config.executables.is_empty() {
            info!("No executables whitelisted; every request will be rejected");
        } else {
            let names: Vec<_> = config.executables.executables().collect();
            info!(executables = ?names, "Whitelist loaded");
        }

        Ok(Self {
            directory: config.directory.clone(),
            mime,
            methods,
            allow,
            executables: config.executables.clone(),
            write_timeout: config.write_timeout,
        })
    }

    /// Router serving every path and method through [`handle`](Self::handle).
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(handle)
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Answer one request.
    ///
    /// Checks run in a fixed order and the first failure is answered: base
    /// directory, method, path, query, executable, then each argument.
    pub async fn handle(&self, method: &Method, uri: &Uri, peer: Option<&Peer>) -> Response {
        let busy = peer.map(|p| p.in_flight.enter());
        let response = ResponseStream::new(&self.mime, &self.allow, peer, uri);
        match self.execute(method, uri, busy).await {
            Ok(Output::Empty) => response.write(StatusCode::OK, Body::empty()),
            Ok(Output::Stream(body)) => response.write(StatusCode::OK, body),
            Err(rejection) => response.error(&rejection),
        }
    }

    async fn execute(
        &self,
        method: &Method,
        uri: &Uri,
        busy: Option<InFlightGuard>,
    ) -> std::result::Result<Output, Rejection> {
        match tokio::fs::metadata(&self.directory).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(Rejection::Directory),
        }
        if !self.methods.contains(method) {
            return Err(Rejection::MethodNotAllowed);
        }
        if uri.path() != "/" {
            return Err(Rejection::AccessDenied);
        }

        let invocation =
            Invocation::from_query(uri.query(), &self.executables, &self.directory).await?;
        debug!(
            executable = %invocation.executable,
            args = invocation.arguments.len(),
            "request validated"
        );

        let mut frames = dispatch::spawn(&invocation, &self.directory, self.write_timeout)?;
        match frames.recv().await {
            None => Ok(Output::Empty),
            Some(Frame::Data(first)) => Ok(Output::Stream(Body::from_stream(body_stream(
                first, frames, busy,
            )))),
            Some(Frame::Failed(stderr)) => Err(Rejection::Execution(stderr)),
            Some(Frame::Aborted(e)) => Err(Rejection::Execution(e.to_string())),
        }
    }
}

enum Output {
    Empty,
    Stream(Body),
}

/// Chunks after the first: failure text is appended, an abort ends the body
/// with an error. `busy` is released once the body is finished or dropped.
fn body_stream(
    first: Bytes,
    mut frames: mpsc::Receiver<Frame>,
    busy: Option<InFlightGuard>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream! {
        let _busy = busy;
        yield Ok(first);
        while let Some(frame) = frames.recv().await {
            match frame {
                Frame::Data(bytes) => yield Ok(bytes),
                Frame::Failed(stderr) => {
                    yield Ok(Bytes::from(Rejection::Execution(stderr).message()));
                }
                Frame::Aborted(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

async fn handle(
    State(gateway): State<Arc<CommandGateway>>,
    peer: Option<Extension<Peer>>,
    method: Method,
    uri: Uri,
) -> Response {
    let peer = peer.map(|Extension(peer)| peer);
    gateway.handle(&method, &uri, peer.as_ref()).await
}
