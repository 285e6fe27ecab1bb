use std::io;
use std::sync::Arc;

use crate::ready::Ready;
use crate::sys::EventFd;

/// Cross-thread wakeup handle for a single [`EventLoop`](crate::event_loop::EventLoop).
/// Cloning shares the same underlying `eventfd`; any clone can wake the loop,
/// only the loop's own `Poller` ever reads from it.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<EventFd>,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker {
            inner: Arc::new(EventFd::new()?),
        })
    }

    /// Makes the wakeup fd readable. Idempotent: writing while it is already
    /// readable just increases the eventfd counter, which `finish` collapses
    /// back to nothing in one read.
    pub fn wakeup(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(()) => Ok(()),
            // the eventfd counter is saturated; another wakeup is already pending
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drains the wakeup fd after the poller reports it readable.
    pub fn finish(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.inner.as_raw_fd()
    }

    /// The wakeup channel is always registered readable-only.
    pub fn interest() -> Ready {
        Ready::readable()
    }
}
