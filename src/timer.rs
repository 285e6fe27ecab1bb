use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub type TimerCallback = Box<dyn FnMut() + Send>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identifies one scheduled timer for cancellation. Rust has no address we
/// can safely expose the way muduo exposes a raw `Timer*` inside `TimerId`,
/// so identity here is a process-wide monotonic sequence number instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub(crate) sequence: u64,
}

/// A single scheduled callback: fires once at `expiration`, and if `repeat`
/// is set, reschedules itself `interval` after the deadline it just hit
/// (not `interval` after the time it actually ran) so drift doesn't
/// accumulate under load.
pub struct Timer {
    callback: TimerCallback,
    expiration: Instant,
    interval: Duration,
    repeat: bool,
    sequence: u64,
}

impl Timer {
    pub fn new(callback: TimerCallback, expiration: Instant, interval: Duration) -> Timer {
        let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Timer {
            callback,
            expiration,
            interval,
            repeat: interval > Duration::ZERO,
            sequence,
        }
    }

    pub fn run(&mut self) {
        (self.callback)();
    }

    pub fn expiration(&self) -> Instant {
        self.expiration
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn id(&self) -> TimerId {
        TimerId {
            sequence: self.sequence,
        }
    }

    /// Reschedules a repeating timer to fire `interval` after the deadline
    /// it just hit, not `interval` after whatever instant it actually ran
    /// at — so per-tick callback latency doesn't accumulate into the
    /// schedule. Multiple missed ticks still collapse into one, since a
    /// deadline far enough in the past just puts the next one in the past
    /// too, and `TimerQueue::get_expired` picks it straight back up.
    pub fn restart(&mut self) {
        debug_assert!(self.repeat);
        self.expiration += self.interval;
    }
}
