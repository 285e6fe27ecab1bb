use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::poller::Poller;
use crate::queue::Queue;
use crate::timer::{TimerCallback, TimerId};
use crate::timer_queue::TimerQueue;
use crate::waker::Waker;

thread_local! {
    static CURRENT: RefCell<Option<Rc<EventLoop>>> = RefCell::new(None);
}

/// A task posted to a loop from (possibly) another thread. Must be `Send`
/// since `EventLoopHandle` is `Send + Sync`; it may still freely look up and
/// mutate loop-thread-only state once running, via [`EventLoop::current`].
pub type Task = Box<dyn FnOnce() + Send>;

/// One reactor: one `Poller`, one `TimerQueue`, one cross-thread task queue,
/// pinned to the OS thread that calls [`EventLoop::run`]. Every method here
/// that touches loop-owned state takes `&self` (not `&mut self`) — internal
/// mutability lives in the `RefCell`/`Cell` fields below, which is what lets
/// a channel callback call back into `update_channel` or `queue_in_loop`
/// while `run` is mid-dispatch. See `channel.rs`'s `Channel::dispatch` for
/// why that reentrancy has to be possible at all.
pub struct EventLoop {
    poller: RefCell<Poller>,
    channels: RefCell<HashMap<RawFd, Rc<RefCell<Channel>>>>,
    timer_queue: RefCell<TimerQueue>,
    pending: Queue<Task>,
    waker: Waker,
    wakeup_channel: RefCell<Option<Rc<RefCell<Channel>>>>,
    thread_id: ThreadId,
    quit: Arc<AtomicBool>,
    looping: Cell<bool>,
    event_handling: Cell<bool>,
    calling_pending_functors: Cell<bool>,
    iteration: Cell<u64>,
    poll_return_time: Cell<Instant>,
    context: RefCell<Option<Box<dyn Any>>>,
}

/// The `Send + Sync` half of an `EventLoop`: the only thing safe to hand to
/// another thread. Lets arbitrary code post work to the loop without ever
/// touching its (thread-pinned) internals directly.
#[derive(Clone)]
pub struct EventLoopHandle {
    pending: Queue<Task>,
    waker: Waker,
    thread_id: ThreadId,
    quit: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new() -> io::Result<Rc<EventLoop>> {
        let waker = Waker::new()?;
        let pending = Queue::new(waker.clone());

        let loop_ = Rc::new(EventLoop {
            poller: RefCell::new(Poller::new()?),
            channels: RefCell::new(HashMap::new()),
            timer_queue: RefCell::new(TimerQueue::new()?),
            pending,
            waker,
            wakeup_channel: RefCell::new(None),
            thread_id: std::thread::current().id(),
            quit: Arc::new(AtomicBool::new(false)),
            looping: Cell::new(false),
            event_handling: Cell::new(false),
            calling_pending_functors: Cell::new(false),
            iteration: Cell::new(0),
            poll_return_time: Cell::new(Instant::now()),
            context: RefCell::new(None),
        });

        let wakeup_fd = loop_.waker.raw_fd();
        let wakeup_channel = Channel::new(wakeup_fd);
        {
            let weak = Rc::downgrade(&loop_);
            wakeup_channel.borrow_mut().set_read_callback(move |_loop, _now| {
                if let Some(l) = weak.upgrade() {
                    let _ = l.waker.finish();
                }
            });
        }
        *loop_.wakeup_channel.borrow_mut() = Some(wakeup_channel.clone());
        loop_.update_channel(&wakeup_channel);
        Channel::enable_reading(&wakeup_channel, &loop_);

        let timer_channel = loop_.timer_queue.borrow().channel();
        timer_channel.borrow_mut().set_read_callback(|loop_, now| {
            loop_.handle_timer_read(now);
        });
        loop_.update_channel(&timer_channel);
        Channel::enable_reading(&timer_channel, &loop_);

        Ok(loop_)
    }

    fn handle_timer_read(&self, now: Instant) {
        let mut expired = self.timer_queue.borrow_mut().begin_dispatch(now);
        for timer in &mut expired {
            timer.run();
        }
        self.timer_queue.borrow_mut().end_dispatch(self, expired);
    }

    /// Returns the loop currently running on this thread. Panics if called
    /// from a thread with no loop attached — only code reached via a
    /// channel callback or a posted task may call this.
    pub fn current() -> Rc<EventLoop> {
        CURRENT.with(|c| {
            c.borrow()
                .clone()
                .expect("EventLoop::current() called outside a running loop")
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            pending: self.pending.clone(),
            waker: self.waker.clone(),
            thread_id: self.thread_id,
            quit: self.quit.clone(),
        }
    }

    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "EventLoop used from a thread other than the one that created it"
        );
    }

    /// Runs `f` now if already on this thread, otherwise defers it exactly
    /// like `queue_in_loop`.
    pub fn run_in_loop<F>(self: &Rc<Self>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.pending.push(Box::new(f));
        if !self.is_in_loop_thread() || self.calling_pending_functors.get() {
            let _ = self.waker.wakeup();
        }
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        if !self.is_in_loop_thread() {
            let _ = self.waker.wakeup();
        }
    }

    pub fn set_context(&self, context: Box<dyn Any>) {
        *self.context.borrow_mut() = Some(context);
    }

    pub fn with_context<R>(&self, f: impl FnOnce(Option<&Box<dyn Any>>) -> R) -> R {
        f(self.context.borrow().as_ref())
    }

    /// Number of completed `poll` cycles since `run()` started. Diagnostic
    /// only, like muduo's `EventLoop::iteration()`.
    pub fn iteration(&self) -> u64 {
        self.iteration.get()
    }

    /// Timestamp of the most recent `poll` return, muduo's `pollReturnTime_`.
    pub fn poll_return_time(&self) -> Instant {
        self.poll_return_time.get()
    }

    /// Schedules `callback` to run at `when`. Safe to call from any thread;
    /// the `TimerId` is valid for `cancel` immediately, even if the actual
    /// insertion is still queued for the loop thread to pick up.
    pub fn run_at(&self, when: Instant, callback: TimerCallback) -> TimerId {
        self.schedule(when, Duration::ZERO, callback)
    }

    pub fn run_after(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        self.schedule(Instant::now() + delay, Duration::ZERO, callback)
    }

    pub fn run_every(&self, interval: Duration, callback: TimerCallback) -> TimerId {
        self.schedule(Instant::now() + interval, interval, callback)
    }

    fn schedule(&self, when: Instant, interval: Duration, callback: TimerCallback) -> TimerId {
        let timer = crate::timer::Timer::new(callback, when, interval);
        let id = timer.id();
        if self.is_in_loop_thread() {
            self.timer_queue.borrow_mut().insert(self, timer);
        } else {
            self.queue_in_loop(move || {
                let loop_ = EventLoop::current();
                loop_.timer_queue.borrow_mut().insert(&loop_, timer);
            });
        }
        id
    }

    pub fn cancel(&self, id: TimerId) {
        if self.is_in_loop_thread() {
            self.timer_queue.borrow_mut().cancel(self, id);
        } else {
            self.queue_in_loop(move || {
                let loop_ = EventLoop::current();
                loop_.timer_queue.borrow_mut().cancel(&loop_, id);
            });
        }
    }

    pub fn update_channel(&self, channel: &Rc<RefCell<Channel>>) {
        self.assert_in_loop_thread();
        let fd = channel.borrow().fd();
        let interest = channel.borrow().interest();
        let already_added = channel.borrow().added();

        if interest.is_empty() {
            if already_added {
                let mut poller = self.poller.borrow_mut();
                if poller.has_fd(fd) {
                    let _ = poller.deregister(fd);
                }
                channel.borrow_mut().set_added(false);
            }
            return;
        }

        let mut poller = self.poller.borrow_mut();
        if already_added {
            let _ = poller.reregister(fd, crate::token::Token(fd as usize), interest);
        } else {
            let _ = poller.register(fd, crate::token::Token(fd as usize), interest);
            channel.borrow_mut().set_added(true);
            drop(poller);
            self.channels.borrow_mut().insert(fd, channel.clone());
        }
    }

    pub fn remove_channel(&self, channel: &Rc<RefCell<Channel>>) {
        self.assert_in_loop_thread();
        let fd = channel.borrow().fd();
        {
            let mut poller = self.poller.borrow_mut();
            if poller.has_fd(fd) {
                let _ = poller.deregister(fd);
            }
        }
        channel.borrow_mut().set_added(false);
        self.channels.borrow_mut().remove(&fd);
    }

    pub fn has_channel(&self, fd: RawFd) -> bool {
        self.channels.borrow().contains_key(&fd)
    }

    /// Runs until `quit()` is called. Must be called on the thread that
    /// created this loop.
    pub fn run(self: &Rc<Self>) -> io::Result<()> {
        self.assert_in_loop_thread();
        assert!(!self.looping.get(), "EventLoop::run called re-entrantly");
        self.looping.set(true);
        self.quit.store(false, Ordering::SeqCst);

        CURRENT.with(|c| *c.borrow_mut() = Some(self.clone()));

        log::trace!("EventLoop {:?} start looping", self.thread_id);

        let mut events = Vec::new();
        while !self.quit.load(Ordering::SeqCst) {
            events.clear();
            self.poller
                .borrow_mut()
                .poll(&mut events, Some(Duration::from_millis(10_000)))?;

            let now = Instant::now();
            self.poll_return_time.set(now);
            self.iteration.set(self.iteration.get() + 1);
            self.event_handling.set(true);

            for ev in &events {
                let fd = ev.token().0 as RawFd;
                let channel = self.channels.borrow().get(&fd).cloned();
                if let Some(channel) = channel {
                    channel.borrow_mut().set_revents(ev.ready());
                    Channel::dispatch(&channel, self, now);
                }
            }
            self.event_handling.set(false);

            self.do_pending_functors();
        }

        self.looping.set(false);
        CURRENT.with(|c| *c.borrow_mut() = None);
        log::trace!("EventLoop {:?} stop looping", self.thread_id);
        Ok(())
    }

    fn do_pending_functors(&self) {
        self.calling_pending_functors.set(true);

        let n = self.pending.len();
        for _ in 0..n {
            if let Some(task) = self.pending.pop() {
                task();
            }
        }

        self.calling_pending_functors.set(false);
    }
}

impl EventLoopHandle {
    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Posts `f` to run on the owning loop's thread. If already on that
    /// thread, runs it immediately via `EventLoop::current()`.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.pending.push(Box::new(f));
        let _ = self.waker.wakeup();
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        let _ = self.waker.wakeup();
    }
}
