//! Time source and deferral timers.
//!
//! All engine timing flows through the `Clock` trait so tests can drive the
//! state machine deterministically. Timestamps are seconds since the Unix
//! epoch as `f64`, the same representation Frigate uses on the wire.

use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub type Timestamp = f64;

pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source used in production.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Hand-advanced clock for tests. Clones share the same underlying instant,
/// so a test can keep one handle and move the engine's view of time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<Timestamp>>);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self(Rc::new(Cell::new(start)))
    }

    pub fn set(&self, now: Timestamp) {
        self.0.set(now);
    }

    pub fn advance(&self, secs: f64) {
        self.0.set(self.0.get() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.get()
    }
}

/// Handle for one scheduled deferral. The owning record holds it; clearing
/// the record's copy cancels the timer, and cancelling twice is a no-op
/// because the queue compares handles when an entry comes due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    token: u64,
}

#[derive(Debug)]
struct TimerEntry {
    fire_at: Timestamp,
    token: u64,
    event_id: String,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .total_cmp(&other.fire_at)
            .then(self.token.cmp(&other.token))
    }
}

/// Deferral scheduler: a min-heap of fire times.
///
/// Cancellation is lazy. Entries are never removed up front; when one comes
/// due the caller matches its handle against whatever the owning record
/// currently holds and drops entries that lost that race.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_token: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a deferral for `event_id` at `fire_at`.
    pub fn schedule(&mut self, fire_at: Timestamp, event_id: &str) -> TimerHandle {
        self.next_token += 1;
        let token = self.next_token;
        self.heap.push(Reverse(TimerEntry {
            fire_at,
            token,
            event_id: event_id.to_string(),
        }));
        TimerHandle { token }
    }

    /// Earliest scheduled fire time, cancelled entries included.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(entry)| entry.fire_at)
    }

    /// Pop the next entry due at or before `now`.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<(TimerHandle, String)> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.fire_at <= now => {}
            _ => return None,
        }
        let Reverse(entry) = self.heap.pop()?;
        Some((TimerHandle { token: entry.token }, entry.event_id))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
