//! Idle timeout for connection streams.
//!
//! The timer only runs between requests. While an [`InFlightGuard`] for the
//! connection is alive the deadline is pushed forward on every poll, so a
//! command that stays silent is bounded by the write timeout instead.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep, sleep};

/// Count of requests being answered on one connection.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    /// Mark a request as started until the returned guard is dropped.
    #[must_use]
    pub fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(Arc::clone(&self.0))
    }

    /// Whether any request is still being answered.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }
}

/// Held for the lifetime of one response.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pin_project! {
    /// Stream that fails with [`io::ErrorKind::TimedOut`] once no request is
    /// in flight and neither a read nor a write has made progress for the
    /// configured duration.
    ///
    /// A zero duration disables the timer.
    pub struct IdleTimeout<S> {
        #[pin]
        inner: S,
        timer: Option<(Duration, Pin<Box<Sleep>>)>,
        in_flight: InFlight,
    }
}

impl<S> IdleTimeout<S> {
    /// Wrap `inner`, starting the timer now.
    pub fn new(inner: S, idle: Duration, in_flight: InFlight) -> Self {
        let timer = (!idle.is_zero()).then(|| (idle, Box::pin(sleep(idle))));
        Self {
            inner,
            timer,
            in_flight,
        }
    }
}

fn touch(timer: &mut Option<(Duration, Pin<Box<Sleep>>)>) {
    if let Some((idle, deadline)) = timer {
        deadline.as_mut().reset(Instant::now() + *idle);
    }
}

fn expired<T>(
    timer: &mut Option<(Duration, Pin<Box<Sleep>>)>,
    in_flight: &InFlight,
    cx: &mut Context<'_>,
) -> Poll<io::Result<T>> {
    if let Some((idle, deadline)) = timer {
        if in_flight.is_busy() {
            deadline.as_mut().reset(Instant::now() + *idle);
        } else if deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection idle timeout",
            )));
        }
    }
    Poll::Pending
}

impl<S: AsyncRead> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(res) => {
                touch(this.timer);
                Poll::Ready(res)
            }
            Poll::Pending => expired(this.timer, this.in_flight, cx),
        }
    }
}

impl<S: AsyncWrite> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(res) => {
                touch(this.timer);
                Poll::Ready(res)
            }
            Poll::Pending => expired(this.timer, this.in_flight, cx),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write_vectored(cx, bufs) {
            Poll::Ready(res) => {
                touch(this.timer);
                Poll::Ready(res)
            }
            Poll::Pending => expired(this.timer, this.in_flight, cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
