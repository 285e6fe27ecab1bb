use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::callbacks::ThreadInitCallback;
use crate::event_loop::{EventLoop, EventLoopHandle};

/// Spawns a dedicated OS thread, constructs an `EventLoop` on it, and hands
/// the parent a [`EventLoopHandle`] — not the loop itself, since `EventLoop`
/// is `Rc`-confined to the thread that created it and cannot cross the
/// handoff. The condvar below carries exactly that handle back.
pub struct EventLoopThread {
    handle: Mutex<Option<EventLoopHandle>>,
    condvar: Condvar,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoopThread {
    pub fn new() -> Arc<EventLoopThread> {
        Arc::new(EventLoopThread {
            handle: Mutex::new(None),
            condvar: Condvar::new(),
            join: Mutex::new(None),
        })
    }

    /// Spawns the thread (if not already started) and blocks until the
    /// child's `EventLoop` exists, returning a handle to it.
    pub fn start_loop(self: &Arc<Self>, init: Option<ThreadInitCallback>) -> EventLoopHandle {
        {
            let join = self.join.lock().unwrap();
            assert!(join.is_none(), "EventLoopThread::start_loop called twice");
        }

        let this = self.clone();
        let join = std::thread::Builder::new()
            .name("io-loop".to_string())
            .spawn(move || this.thread_main(init))
            .expect("failed to spawn event loop thread");
        *self.join.lock().unwrap() = Some(join);

        let mut guard = self.handle.lock().unwrap();
        while guard.is_none() {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard.clone().unwrap()
    }

    fn thread_main(&self, init: Option<ThreadInitCallback>) {
        let loop_ = EventLoop::new().expect("failed to create EventLoop on IO thread");

        if let Some(cb) = &init {
            cb(&loop_);
        }

        {
            let mut guard = self.handle.lock().unwrap();
            *guard = Some(loop_.handle());
            self.condvar.notify_one();
        }

        let _ = loop_.run();
    }
}

impl Drop for EventLoopThread {
    fn drop(&mut self) {
        let handle = self.handle.lock().unwrap().clone();
        if let Some(handle) = handle {
            handle.quit();
        }
        if let Some(join) = self.join.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn start_loop_hands_back_a_usable_handle() {
        let thread = EventLoopThread::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();

        let init: ThreadInitCallback = Arc::new(move |_loop| {
            ran2.store(true, Ordering::SeqCst);
        });
        let handle = thread.start_loop(Some(init));

        assert!(ran.load(Ordering::SeqCst));
        assert!(!handle.is_in_loop_thread());
    }
}
