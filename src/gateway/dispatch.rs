//! Subprocess execution and output relay.
//!
//! ```text
//! Command ──stdout──► copy() ──► mpsc::Sender<Frame> ──► response body
//!         ──stderr──► capture (bounded) ──► Frame::Failed on non-zero exit
//! ```
//!
//! The relay task owns the child. A dropped receiver (client gone) or an
//! elapsed write timeout kills it.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::Rejection;
use super::arguments::Invocation;

/// Frames buffered between the relay and the response body.
pub const CHANNEL_CAPACITY: usize = 16;

/// Most standard-error bytes kept for the failure message.
pub const STDERR_LIMIT: u64 = 64 * 1024;

/// Message relayed when the write timeout elapses.
pub const WRITE_TIMEOUT_MESSAGE: &str = "write timeout exceeded";

/// One unit of subprocess output.
#[derive(Debug)]
pub enum Frame {
    /// Bytes read from standard output.
    Data(Bytes),
    /// The command exited unsuccessfully; captured standard error.
    Failed(String),
    /// Relaying stopped on an I/O error or the write timeout.
    Aborted(io::Error),
}

/// Spawn `invocation` in `directory` and start relaying its output.
///
/// A zero `write_timeout` lets the command run until it exits.
///
/// # Errors
///
/// Returns [`Rejection::Execution`] with the OS error text when the command
/// cannot be started.
pub fn spawn(
    invocation: &Invocation,
    directory: &Path,
    write_timeout: Duration,
) -> Result<mpsc::Receiver<Frame>, Rejection> {
    let child = Command::new(&invocation.executable)
        .args(invocation.argv())
        .current_dir(directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Rejection::Execution(e.to_string()))?;

    debug!(
        executable = %invocation.executable,
        pid = child.id().unwrap_or_default(),
        "command started"
    );

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(relay(child, invocation.executable.clone(), tx, write_timeout));
    Ok(rx)
}

/// Relay `source` into `sink` chunk by chunk.
///
/// Returns the number of bytes relayed. A closed sink is a
/// [`io::ErrorKind::BrokenPipe`] error.
///
/// # Errors
///
/// Returns the read error, or `BrokenPipe` when the receiver is gone.
pub async fn copy<R>(source: R, sink: &mpsc::Sender<Frame>) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = ReaderStream::new(source);
    let mut total: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        total = total.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
        sink.send(Frame::Data(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))?;
    }

    Ok(total)
}

async fn relay(mut child: Child, executable: String, tx: mpsc::Sender<Frame>, limit: Duration) {
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(capture(pipe)));

    let outcome = {
        let run = run_to_exit(&mut child, &tx);
        tokio::select! {
            outcome = bounded(limit, run) => outcome,
            () = tx.closed() => Some(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))),
        }
    };

    match outcome {
        Some(Ok((bytes, status))) if status.success() => {
            debug!(executable = %executable, bytes, "command finished");
            if let Some(task) = stderr {
                task.abort();
            }
        }
        Some(Ok((bytes, status))) => {
            let text = collect(stderr).await;
            debug!(executable = %executable, bytes, status = %status, "command failed");
            // receiver may be gone already
            let _ = tx.send(Frame::Failed(text)).await;
        }
        Some(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!(executable = %executable, "client went away, killing command");
            terminate(&mut child, stderr).await;
        }
        Some(Err(e)) => {
            warn!(executable = %executable, error = %e, "relay failed, killing command");
            terminate(&mut child, stderr).await;
            let _ = tx.send(Frame::Aborted(e)).await;
        }
        None => {
            warn!(executable = %executable, timeout = ?limit, "write timeout exceeded, killing command");
            terminate(&mut child, stderr).await;
            let _ = tx
                .send(Frame::Aborted(io::Error::new(
                    io::ErrorKind::TimedOut,
                    WRITE_TIMEOUT_MESSAGE,
                )))
                .await;
        }
    }
}

async fn run_to_exit(child: &mut Child, tx: &mpsc::Sender<Frame>) -> io::Result<(u64, ExitStatus)> {
    let bytes = match child.stdout.take() {
        Some(stdout) => copy(stdout, tx).await?,
        None => 0,
    };
    let status = child.wait().await?;
    Ok((bytes, status))
}

/// `None` when `limit` elapses first; a zero limit never elapses.
async fn bounded<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    if limit.is_zero() {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// Keep the first [`STDERR_LIMIT`] bytes and drain the rest.
async fn capture(mut pipe: ChildStderr) -> String {
    let mut kept = Vec::new();
    if let Err(e) = (&mut pipe).take(STDERR_LIMIT).read_to_end(&mut kept).await {
        debug!(error = %e, "stderr read failed");
    }
    let _ = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await;
    String::from_utf8_lossy(&kept).into_owned()
}

async fn collect(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}

async fn terminate(child: &mut Child, stderr: Option<JoinHandle<String>>) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed");
    }
    if let Some(task) = stderr {
        task.abort();
    }
}
