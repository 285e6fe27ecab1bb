use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use concurrent_queue::ConcurrentQueue;

use crate::waker::Waker;

/// A multi-producer task queue fused with a [`Waker`]: pushing a task arms
/// the wakeup fd exactly on the 0 -> 1 transition of the pending count, so
/// `EventLoop` only pays for one `eventfd` write per otherwise-idle wakeup
/// no matter how many functors arrive before the loop notices.
#[derive(Clone)]
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    queue: ConcurrentQueue<T>,
    pending: AtomicUsize,
    waker: Waker,
}

impl<T> Queue<T> {
    pub fn new(waker: Waker) -> Queue<T> {
        Queue {
            inner: Arc::new(Inner {
                queue: ConcurrentQueue::unbounded(),
                pending: AtomicUsize::new(0),
                waker,
            }),
        }
    }

    /// Enqueues `value` and wakes the owning loop if it was idle.
    pub fn push(&self, value: T) -> io::Result<()> {
        self.inner
            .queue
            .push(value)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "queue closed"))?;
        self.inc()?;
        Ok(())
    }

    /// Pops one pending item, if any.
    pub fn pop(&self) -> Option<T> {
        match self.inner.queue.pop() {
            Ok(value) => {
                self.dec();
                Some(value)
            }
            Err(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    fn inc(&self) -> io::Result<()> {
        if self.inner.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.inner.waker.wakeup()?;
        }
        Ok(())
    }

    fn dec(&self) {
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod test {
    use super::Queue;
    use crate::waker::Waker;

    #[test]
    fn push_then_pop_preserves_order() {
        let waker = Waker::new().unwrap();
        let queue: Queue<i32> = Queue::new(waker);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let waker = Waker::new().unwrap();
        let queue: Queue<i32> = Queue::new(waker);
        assert_eq!(queue.pop(), None);
    }
}
