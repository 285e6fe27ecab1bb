use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use indexmap::IndexSet;
use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use super::Event;
use crate::ready::Ready;
use crate::token::Token;

/// Kernel epoll interest list. Registration is O(1) regardless of how many
/// fds are already tracked, unlike the array backend's linear scan.
pub struct EpollPoller {
    epfd: RawFd,
    registered: IndexSet<RawFd>,
    events: Vec<libc::epoll_event>,
}

impl EpollPoller {
    pub fn new() -> io::Result<EpollPoller> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(EpollPoller {
            epfd,
            registered: IndexSet::new(),
            events: Vec::with_capacity(128),
        })
    }

    pub fn register(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: ioevent_to_epoll(interest),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
        self.registered.insert(fd);
        Ok(())
    }

    pub fn reregister(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: ioevent_to_epoll(interest),
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
        Ok(())
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        // the kernel ignores the event argument for EPOLL_CTL_DEL, but older
        // kernels (pre-2.6.9) require a non-null pointer
        let mut event: libc::epoll_event = unsafe { mem::zeroed() };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event))?;
        self.registered.swap_remove(&fd);
        Ok(())
    }

    pub fn has_fd(&self, fd: RawFd) -> bool {
        self.registered.contains(&fd)
    }

    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = timeout
            .map(|t| std::cmp::min(t.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let cnt = match syscall!(epoll_wait(
            self.epfd,
            self.events.as_mut_ptr(),
            self.events.capacity() as i32,
            timeout_ms
        )) {
            Ok(cnt) => cnt,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        };

        unsafe { self.events.set_len(cnt as usize) };

        for raw in &self.events {
            let ready = epoll_to_ioevent(raw.events as i32);
            if ready.is_empty() {
                continue;
            }
            events.push(Event::new(Token(raw.u64 as usize), ready));
        }

        Ok(())
    }
}

fn ioevent_to_epoll(interest: Ready) -> u32 {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= EPOLLIN;
    }
    if interest.is_writable() {
        kind |= EPOLLOUT;
    }
    kind as u32
}

fn epoll_to_ioevent(epoll: i32) -> Ready {
    let mut ready = Ready::empty();
    if epoll & EPOLLIN != 0 || epoll & EPOLLPRI != 0 {
        ready.insert(Ready::readable());
    }
    if epoll & EPOLLOUT != 0 {
        ready.insert(Ready::writable());
    }
    if epoll & EPOLLERR != 0 {
        ready.insert(Ready::error());
    }
    if epoll & EPOLLRDHUP != 0 || epoll & EPOLLHUP != 0 {
        ready.insert(Ready::hup());
    }
    ready
}

impl AsRawFd for EpollPoller {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sys::EventFd;

    #[test]
    fn register_and_poll_readable_eventfd() {
        let ev = EventFd::new().unwrap();
        let mut poller = EpollPoller::new().unwrap();
        poller
            .register(ev.as_raw_fd(), Token(7), Ready::readable())
            .unwrap();

        ev.write(1).unwrap();

        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(Duration::from_millis(100)))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(7));
        assert!(events[0].ready().is_readable());
    }

    #[test]
    fn deregister_then_poll_sees_nothing() {
        let ev = EventFd::new().unwrap();
        let mut poller = EpollPoller::new().unwrap();
        poller
            .register(ev.as_raw_fd(), Token(1), Ready::readable())
            .unwrap();
        poller.deregister(ev.as_raw_fd()).unwrap();
        assert!(!poller.has_fd(ev.as_raw_fd()));

        ev.write(1).unwrap();
        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(events.is_empty());
    }
}
