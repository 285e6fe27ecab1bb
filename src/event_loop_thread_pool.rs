use std::sync::Arc;

use crate::callbacks::ThreadInitCallback;
use crate::event_loop::EventLoopHandle;
use crate::event_loop_thread::EventLoopThread;

/// N worker loops dispatched by round-robin or hash; when `num_threads ==
/// 0` the base (acceptor) loop does everything and is never itself in
/// `threads`/`loops`.
pub struct EventLoopThreadPool {
    base_loop: EventLoopHandle,
    num_threads: usize,
    started: bool,
    threads: Vec<Arc<EventLoopThread>>,
    loops: Vec<EventLoopHandle>,
    next: usize,
}

impl EventLoopThreadPool {
    pub fn new(base_loop: EventLoopHandle) -> EventLoopThreadPool {
        EventLoopThreadPool {
            base_loop,
            num_threads: 0,
            started: false,
            threads: Vec::new(),
            loops: Vec::new(),
            next: 0,
        }
    }

    pub fn set_thread_num(&mut self, n: usize) {
        assert!(!self.started, "set_thread_num after start");
        self.num_threads = n;
    }

    pub fn thread_num(&self) -> usize {
        self.num_threads
    }

    pub fn start(&mut self, init: Option<ThreadInitCallback>) {
        assert!(!self.started, "EventLoopThreadPool::start called twice");
        self.started = true;

        for _ in 0..self.num_threads {
            let thread = EventLoopThread::new();
            let handle = thread.start_loop(init.clone());
            self.threads.push(thread);
            self.loops.push(handle);
        }

        if self.num_threads == 0 {
            if let Some(cb) = &init {
                // No worker threads: the base loop does everything, so its
                // init callback runs inline rather than on a spawned thread.
                self.base_loop.run_in_loop({
                    let cb = cb.clone();
                    move || {
                        let loop_ = crate::event_loop::EventLoop::current();
                        cb(&loop_);
                    }
                });
            }
        }
    }

    /// Round-robin dispatch. Returns the base loop when `num_threads == 0`.
    pub fn get_next_loop(&mut self) -> EventLoopHandle {
        assert!(self.started);
        if self.loops.is_empty() {
            return self.base_loop.clone();
        }
        let loop_ = self.loops[self.next].clone();
        self.next = (self.next + 1) % self.loops.len();
        loop_
    }

    /// Hash dispatch: same worker always serves the same key.
    pub fn get_loop_for_hash(&self, hash_code: u64) -> EventLoopHandle {
        assert!(self.started);
        if self.loops.is_empty() {
            self.base_loop.clone()
        } else {
            self.loops[(hash_code as usize) % self.loops.len()].clone()
        }
    }

    pub fn get_all_loops(&self) -> Vec<EventLoopHandle> {
        assert!(self.started);
        if self.loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            self.loops.clone()
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event_loop::EventLoop;

    #[test]
    fn zero_threads_always_returns_base_loop() {
        let base = EventLoop::new().unwrap();
        let mut pool = EventLoopThreadPool::new(base.handle());
        pool.start(None);
        for _ in 0..3 {
            assert!(pool.get_next_loop().is_in_loop_thread());
        }
    }

    #[test]
    fn round_robin_cycles_through_workers() {
        let base = EventLoop::new().unwrap();
        let mut pool = EventLoopThreadPool::new(base.handle());
        pool.set_thread_num(3);
        pool.start(None);

        assert_eq!(pool.get_all_loops().len(), 3);

        let first = pool.get_next_loop();
        pool.get_next_loop();
        pool.get_next_loop();
        let fourth = pool.get_next_loop();
        // a full cycle of 3 workers returns to the same one
        assert_eq!(first.thread_id(), fourth.thread_id());
    }

    #[test]
    fn hash_dispatch_is_deterministic() {
        let base = EventLoop::new().unwrap();
        let mut pool = EventLoopThreadPool::new(base.handle());
        pool.set_thread_num(4);
        pool.start(None);

        let a = pool.get_loop_for_hash(42);
        let b = pool.get_loop_for_hash(42);
        assert_eq!(a.thread_id(), b.thread_id());
    }
}
