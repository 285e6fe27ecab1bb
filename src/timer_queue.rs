use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::sys::TimerFd;
use crate::timer::{Timer, TimerCallback, TimerId};

/// Dispatches callbacks scheduled by `EventLoop::run_at`/`run_after`/
/// `run_every`, backed by one kernel `timerfd` always armed to the earliest
/// pending deadline. `timers` is deadline-ordered (the key tuple breaks ties
/// between timers sharing an instant by sequence number); `active_ids`
/// tracks which sequence numbers are still live, for `cancel`.
pub struct TimerQueue {
    timer_fd: TimerFd,
    channel: Rc<RefCell<Channel>>,
    timers: BTreeMap<(Instant, u64), Timer>,
    // id-ordered index mirroring `timers`, letting `cancel` find an entry's
    // deadline key in O(log n) instead of scanning `timers`.
    deadline_by_id: std::collections::HashMap<u64, Instant>,
    active_ids: HashSet<u64>,
    calling_expired_timers: bool,
    canceling_ids: HashSet<u64>,
}

impl TimerQueue {
    pub fn new() -> io::Result<TimerQueue> {
        let timer_fd = TimerFd::new()?;
        let channel = Channel::new(std::os::unix::io::AsRawFd::as_raw_fd(&timer_fd));
        Ok(TimerQueue {
            timer_fd,
            channel,
            timers: BTreeMap::new(),
            deadline_by_id: std::collections::HashMap::new(),
            active_ids: HashSet::new(),
            calling_expired_timers: false,
            canceling_ids: HashSet::new(),
        })
    }

    pub fn channel(&self) -> Rc<RefCell<Channel>> {
        self.channel.clone()
    }

    pub fn add_timer(
        &mut self,
        loop_: &EventLoop,
        callback: TimerCallback,
        when: Instant,
        interval: Duration,
    ) -> TimerId {
        let timer = Timer::new(callback, when, interval);
        let id = timer.id();
        self.insert(loop_, timer);
        id
    }

    pub fn cancel(&mut self, loop_: &EventLoop, id: TimerId) {
        if !self.active_ids.remove(&id.sequence) {
            if self.calling_expired_timers {
                self.canceling_ids.insert(id.sequence);
            }
            return;
        }
        if let Some(when) = self.deadline_by_id.remove(&id.sequence) {
            self.timers.remove(&(when, id.sequence));
        }
        let _ = loop_;
    }

    pub(crate) fn insert(&mut self, loop_: &EventLoop, timer: Timer) {
        let earliest_changed = self
            .timers
            .keys()
            .next()
            .map(|(when, _)| timer.expiration() < *when)
            .unwrap_or(true);

        self.active_ids.insert(timer.sequence());
        self.deadline_by_id.insert(timer.sequence(), timer.expiration());
        self.timers.insert((timer.expiration(), timer.sequence()), timer);

        if earliest_changed {
            self.reset_timer_fd(loop_);
        }
    }

    /// Drains the timerfd and returns every timer due at `now`, removed
    /// from `timers` but not yet re-inserted. Split from running those
    /// timers' callbacks (see `end_dispatch`) so this borrow of `self` is
    /// released before any callback runs — a callback that calls
    /// `EventLoop::run_after`/`cancel` reaches back into this same
    /// `TimerQueue`, which would otherwise be a reentrant `borrow_mut`.
    pub(crate) fn begin_dispatch(&mut self, now: Instant) -> Vec<Timer> {
        let _ = self.timer_fd.read();
        debug_assert!(!self.calling_expired_timers);
        self.calling_expired_timers = true;
        self.canceling_ids.clear();
        self.get_expired(now)
    }

    pub(crate) fn end_dispatch(&mut self, loop_: &EventLoop, ran: Vec<Timer>) {
        for mut timer in ran {
            let seq = timer.sequence();
            if timer.repeat() && !self.canceling_ids.contains(&seq) {
                timer.restart();
                self.active_ids.insert(seq);
                self.deadline_by_id.insert(seq, timer.expiration());
                self.timers.insert((timer.expiration(), seq), timer);
            } else {
                self.active_ids.remove(&seq);
                self.deadline_by_id.remove(&seq);
            }
        }

        self.calling_expired_timers = false;
        self.reset_timer_fd(loop_);
    }

    fn get_expired(&mut self, now: Instant) -> Vec<Timer> {
        let expired_keys: Vec<(Instant, u64)> = self
            .timers
            .range(..=(now, u64::MAX))
            .map(|(k, _)| *k)
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| {
                let timer = self.timers.remove(&key)?;
                // Erase from `active_ids`/`deadline_by_id` too, same as
                // muduo's `getExpired` erasing from `activeTimers_`: a
                // cancel arriving for this id while its callback is running
                // must find it already gone from the active set and fall
                // into the `canceling_ids` path instead of no-op'ing here.
                self.active_ids.remove(&key.1);
                self.deadline_by_id.remove(&key.1);
                Some(timer)
            })
            .collect()
    }

    fn reset_timer_fd(&self, loop_: &EventLoop) {
        let _ = loop_;
        match self.timers.keys().next() {
            Some((when, _)) => {
                let now = Instant::now();
                let delay = if *when > now {
                    *when - now
                } else {
                    Duration::from_nanos(100)
                };
                let _ = self.timer_fd.set(delay, Duration::ZERO);
            }
            None => {
                let _ = self.timer_fd.disarm();
            }
        }
    }
}
