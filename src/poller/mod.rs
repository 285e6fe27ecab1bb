//! The polling backend: two interchangeable implementations of "wait for
//! readiness on a set of registered fds," selected once at startup.

mod array;
mod epoll;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::ready::Ready;
use crate::token::Token;

pub use array::ArrayPoller;
pub use epoll::EpollPoller;

/// One fd's reported readiness, returned from a `poll()` call.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    token: Token,
    ready: Ready,
}

impl Event {
    pub fn new(token: Token, ready: Ready) -> Event {
        Event { token, ready }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn ready(&self) -> Ready {
        self.ready
    }
}

/// Either backend, chosen once per process. `array` uses `libc::poll` over a
/// flat fd list (O(n) per wait, no fd-count limit beyond `RLIMIT_NOFILE`);
/// `epoll` uses the kernel's interest list (O(1) registration, scales to
/// many idle connections). Set `MUDUO_USE_POLL=1` to force the array
/// backend; this is the only place in the crate that reads that variable.
pub enum Poller {
    Array(ArrayPoller),
    Epoll(EpollPoller),
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        if crate::config::use_poll_backend() {
            Ok(Poller::Array(ArrayPoller::new()))
        } else {
            Ok(Poller::Epoll(EpollPoller::new()?))
        }
    }

    pub fn register(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        match self {
            Poller::Array(p) => p.register(fd, token, interest),
            Poller::Epoll(p) => p.register(fd, token, interest),
        }
    }

    pub fn reregister(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        match self {
            Poller::Array(p) => p.reregister(fd, token, interest),
            Poller::Epoll(p) => p.reregister(fd, token, interest),
        }
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self {
            Poller::Array(p) => p.deregister(fd),
            Poller::Epoll(p) => p.deregister(fd),
        }
    }

    pub fn has_fd(&self, fd: RawFd) -> bool {
        match self {
            Poller::Array(p) => p.has_fd(fd),
            Poller::Epoll(p) => p.has_fd(fd),
        }
    }

    /// Blocks for at most `timeout` (or forever, if `None`), appending every
    /// ready fd's event to `events`. `events` is cleared first.
    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Poller::Array(p) => p.poll(events, timeout),
            Poller::Epoll(p) => p.poll(events, timeout),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Poller::Array(_) => "poll",
            Poller::Epoll(_) => "epoll",
        }
    }
}
