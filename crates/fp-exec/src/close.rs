//! One-shot close guards.
//!
//! [`CloseOnce`] wraps any [`Close`] resource behind a shared handle so it
//! can be registered with several owners (a command's close-after-start list,
//! a copy task, the caller) while being closed exactly once. Later calls to
//! [`CloseOnce::close`] succeed without doing anything.

use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;

/// A resource with an explicit close step.
pub trait Close {
    /// Release the resource. Called at most once through [`CloseOnce`].
    fn close(&mut self) -> io::Result<()>;
}

impl Close for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for Option<OwnedFd> {
    fn close(&mut self) -> io::Result<()> {
        match self.take() {
            Some(fd) => nix::unistd::close(fd.into_raw_fd()).map_err(io::Error::from),
            None => Ok(()),
        }
    }
}

/// Object-safe view of a [`CloseOnce`] used for close-after-start and
/// close-after-wait registration.
pub trait Closer: Send + Sync {
    /// Close the underlying resource if it is still open.
    fn close(&self) -> io::Result<()>;
}

struct Guarded<T> {
    value: T,
    closed: bool,
}

/// Shared, idempotently closable resource.
pub struct CloseOnce<T> {
    inner: Arc<Mutex<Guarded<T>>>,
}

/// A descriptor behind a close guard.
pub type FdGuard = CloseOnce<Option<OwnedFd>>;

impl<T> Clone for CloseOnce<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for CloseOnce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseOnce")
            .field("closed", &self.inner.lock().closed)
            .finish_non_exhaustive()
    }
}

impl<T: Close> CloseOnce<T> {
    /// Guard `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Guarded {
                value,
                closed: false,
            })),
        }
    }

    /// Close the resource. Only the first call has an effect; its error is
    /// returned once and never again.
    pub fn close(&self) -> io::Result<()> {
        let mut guarded = self.inner.lock();
        if guarded.closed {
            return Ok(());
        }
        guarded.closed = true;
        guarded.value.close()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Run `f` with exclusive access to the guarded value, open or closed.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock().value)
    }
}

impl CloseOnce<Option<OwnedFd>> {
    /// Guard an owned descriptor.
    pub fn fd(fd: impl Into<OwnedFd>) -> Self {
        Self::new(Some(fd.into()))
    }

    /// The raw descriptor number while it is still open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().value.as_ref().map(|fd| fd.as_raw_fd())
    }
}

impl<T: Close + Send> Closer for CloseOnce<T> {
    fn close(&self) -> io::Result<()> {
        CloseOnce::close(self)
    }
}

impl<C: Closer + ?Sized> Closer for Box<C> {
    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

/// Writes go straight to the guarded value; shutdown closes it.
impl<T: io::Write + Close + Unpin> AsyncWrite for CloseOnce<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guarded = self.inner.lock();
        if guarded.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed buffer",
            )));
        }
        Poll::Ready(guarded.value.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guarded = self.inner.lock();
        if guarded.closed {
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(guarded.value.flush())
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.close())
    }
}
