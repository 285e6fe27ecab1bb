use std::convert::TryInto;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use indexmap::IndexMap;

use super::Event;
use crate::ready::Ready;
use crate::token::Token;

/// `libc::poll` over a flat, swap-remove-compacted fd list. `indexmap`
/// preserves the invariant spec.md's compaction rule needs: removing an
/// entry swaps the last element into its slot, so the parallel `pollfd`
/// vector and the map stay in lockstep without ever shifting a tail.
pub struct ArrayPoller {
    fds: IndexMap<RawFd, Registration>,
    pollfds: Vec<libc::pollfd>,
}

struct Registration {
    token: Token,
    interest: Ready,
}

impl ArrayPoller {
    pub fn new() -> ArrayPoller {
        ArrayPoller {
            fds: IndexMap::new(),
            pollfds: Vec::new(),
        }
    }

    pub fn register(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        if self.fds.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "fd already registered",
            ));
        }
        self.fds.insert(fd, Registration { token, interest });
        self.pollfds.push(libc::pollfd {
            fd,
            events: ioevent_to_poll(interest),
            revents: 0,
        });
        Ok(())
    }

    pub fn reregister(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        let idx = self.index_of(fd)?;
        self.fds[idx] = Registration { token, interest };
        self.pollfds[idx].events = ioevent_to_poll(interest);
        Ok(())
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let idx = self.index_of(fd)?;
        self.fds.swap_remove_index(idx);
        self.pollfds.swap_remove(idx);
        Ok(())
    }

    pub fn has_fd(&self, fd: RawFd) -> bool {
        self.fds.contains_key(&fd)
    }

    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = timeout
            .map(|t| std::cmp::min(t.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let ret = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len().try_into().unwrap(),
                timeout_ms,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (idx, pollfd) in self.pollfds.iter().enumerate() {
            if pollfd.revents == 0 {
                continue;
            }
            let ready = poll_to_ioevent(pollfd.revents);
            if ready.is_empty() {
                continue;
            }
            let token = self.fds[idx].token;
            events.push(Event::new(token, ready));
        }

        Ok(())
    }

    fn index_of(&self, fd: RawFd) -> io::Result<usize> {
        self.fds
            .get_index_of(&fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fd not registered"))
    }
}

fn ioevent_to_poll(interest: Ready) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events as libc::c_short
}

fn poll_to_ioevent(revents: libc::c_short) -> Ready {
    let revents = revents as i32;
    let mut ready = Ready::empty();
    if revents & libc::POLLIN != 0 || revents & libc::POLLPRI != 0 {
        ready.insert(Ready::readable());
    }
    if revents & libc::POLLOUT != 0 {
        ready.insert(Ready::writable());
    }
    if revents & libc::POLLERR != 0 {
        ready.insert(Ready::error());
    }
    if revents & libc::POLLHUP != 0 {
        ready.insert(Ready::hup());
    }
    ready
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sys::EventFd;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn register_and_poll_readable_eventfd() {
        let ev = EventFd::new().unwrap();
        let mut poller = ArrayPoller::new();
        poller
            .register(ev.as_raw_fd(), Token(1), Ready::readable())
            .unwrap();

        ev.write(1).unwrap();

        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(std::time::Duration::from_millis(100)))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(1));
        assert!(events[0].ready().is_readable());
    }

    #[test]
    fn deregister_compacts_without_disturbing_others() {
        let a = EventFd::new().unwrap();
        let b = EventFd::new().unwrap();
        let mut poller = ArrayPoller::new();
        poller
            .register(a.as_raw_fd(), Token(1), Ready::readable())
            .unwrap();
        poller
            .register(b.as_raw_fd(), Token(2), Ready::readable())
            .unwrap();

        poller.deregister(a.as_raw_fd()).unwrap();
        assert!(!poller.has_fd(a.as_raw_fd()));
        assert!(poller.has_fd(b.as_raw_fd()));

        b.write(1).unwrap();
        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(std::time::Duration::from_millis(100)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(2));
    }
}
