use std::any::Any;
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::event_loop::EventLoop;
use crate::ready::Ready;

type ReadCallback = Rc<dyn Fn(&EventLoop, Instant)>;
type EventCallback = Rc<dyn Fn(&EventLoop)>;

/// A selectable I/O channel: binds one fd's interest bits to callbacks.
/// Owned by whatever created it (a connection, the acceptor, the timer
/// queue, the loop's own wakeup fd) and registered into the owning
/// [`EventLoop`] by reference-counted handle, since dispatch must be able to
/// release its borrow before invoking a callback that might reconfigure the
/// very channel being dispatched (see [`Channel::dispatch`]).
pub struct Channel {
    fd: RawFd,
    interest: Ready,
    revents: Ready,
    added: bool,
    log_hup: bool,
    tie: Option<Weak<dyn Any>>,
    tied: bool,
    read_cb: Option<ReadCallback>,
    write_cb: Option<EventCallback>,
    close_cb: Option<EventCallback>,
    error_cb: Option<EventCallback>,
}

impl Channel {
    pub fn new(fd: RawFd) -> Rc<RefCell<Channel>> {
        Rc::new(RefCell::new(Channel {
            fd,
            interest: Ready::empty(),
            revents: Ready::empty(),
            added: false,
            log_hup: true,
            tie: None,
            tied: false,
            read_cb: None,
            write_cb: None,
            close_cb: None,
            error_cb: None,
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Ready {
        self.interest
    }

    pub fn is_none_event(&self) -> bool {
        self.interest.is_empty()
    }

    pub fn is_reading(&self) -> bool {
        self.interest.is_readable()
    }

    pub fn is_writing(&self) -> bool {
        self.interest.is_writable()
    }

    pub fn added(&self) -> bool {
        self.added
    }

    pub fn set_added(&mut self, added: bool) {
        self.added = added;
    }

    pub fn set_revents(&mut self, revents: Ready) {
        self.revents = revents;
    }

    pub fn do_not_log_hup(&mut self) {
        self.log_hup = false;
    }

    pub fn set_read_callback<F>(&mut self, cb: F)
    where
        F: Fn(&EventLoop, Instant) + 'static,
    {
        self.read_cb = Some(Rc::new(cb));
    }

    pub fn set_write_callback<F>(&mut self, cb: F)
    where
        F: Fn(&EventLoop) + 'static,
    {
        self.write_cb = Some(Rc::new(cb));
    }

    pub fn set_close_callback<F>(&mut self, cb: F)
    where
        F: Fn(&EventLoop) + 'static,
    {
        self.close_cb = Some(Rc::new(cb));
    }

    pub fn set_error_callback<F>(&mut self, cb: F)
    where
        F: Fn(&EventLoop) + 'static,
    {
        self.error_cb = Some(Rc::new(cb));
    }

    /// Ties this channel's lifetime to `owner`: if `owner` has already been
    /// dropped by the time an event fires, `dispatch` skips the callbacks
    /// instead of running them against a half-destroyed object. Only
    /// channels whose owner can be dropped by someone other than the code
    /// driving this channel's own event need this — the loop's wakeup and
    /// timer channels never do, since nothing outlives the loop that owns
    /// them.
    pub fn tie(&mut self, owner: &Rc<dyn Any>) {
        self.tie = Some(Rc::downgrade(owner));
        self.tied = true;
    }

    pub fn enable_reading(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        channel.borrow_mut().interest.insert(Ready::readable());
        loop_.update_channel(channel);
    }

    pub fn disable_reading(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        channel.borrow_mut().interest.remove(Ready::readable());
        loop_.update_channel(channel);
    }

    pub fn enable_writing(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        channel.borrow_mut().interest.insert(Ready::writable());
        loop_.update_channel(channel);
    }

    pub fn disable_writing(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        channel.borrow_mut().interest.remove(Ready::writable());
        loop_.update_channel(channel);
    }

    pub fn disable_all(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        channel.borrow_mut().interest = Ready::empty();
        loop_.update_channel(channel);
    }

    pub fn remove(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop) {
        loop_.remove_channel(channel);
    }

    /// Runs whichever callbacks `revents` (set by the most recent `poll`)
    /// calls for, in muduo's precedence order: HUP-without-readable closes
    /// first, then error, then read, then write. Takes `&Rc<RefCell<Self>>`
    /// rather than `&self`/`&mut self` so every callback it invokes runs
    /// with no live borrow of `channel` outstanding — a callback is free to
    /// call `enable_writing`/`remove`/etc. on this same channel.
    pub fn dispatch(channel: &Rc<RefCell<Channel>>, loop_: &EventLoop, now: Instant) {
        let (revents, log_hup, tie, read_cb, write_cb, close_cb, error_cb) = {
            let ch = channel.borrow();
            (
                ch.revents,
                ch.log_hup,
                ch.tie.clone(),
                ch.read_cb.clone(),
                ch.write_cb.clone(),
                ch.close_cb.clone(),
                ch.error_cb.clone(),
            )
        };

        // if tied and the owner is already gone, drop the event on the floor
        let _guard = match &tie {
            Some(weak) => match weak.upgrade() {
                Some(strong) => Some(strong),
                None => return,
            },
            None => None,
        };

        // Mutually exclusive per firing, in precedence order: a channel that
        // is simultaneously hup-without-readable and error-marked only
        // closes; one that's both readable and writable only reads. Matches
        // spec's "invokes at most one of {close, error, read, write}".
        if revents.is_hup() && !revents.is_readable() {
            if log_hup {
                log::warn!("channel fd = {} hup", channel.borrow().fd);
            }
            if let Some(cb) = &close_cb {
                cb(loop_);
            }
        } else if revents.is_error() {
            if let Some(cb) = &error_cb {
                cb(loop_);
            }
        } else if revents.is_readable() {
            if let Some(cb) = &read_cb {
                cb(loop_, now);
            }
        } else if revents.is_writable() {
            if let Some(cb) = &write_cb {
                cb(loop_);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug_assert!(
            !self.added,
            "channel fd = {} dropped while still registered with a loop",
            self.fd
        );
    }
}
