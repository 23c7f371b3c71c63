//! Clocks used to age intents.

use crate::types::Timestamp;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Hybrid logical clock over the system wall clock.
///
/// Timestamps are strictly increasing: when the wall clock has not moved
/// past the last reading, the logical counter is bumped instead.
pub struct HlcClock {
    last: Mutex<Timestamp>,
}

impl HlcClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Timestamp::ZERO),
        }
    }

    fn physical_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// Move the clock forward to at least `received`.
    pub fn update(&self, received: Timestamp) {
        self.last.lock().forward(received);
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HlcClock {
    fn now(&self) -> Timestamp {
        let physical = Self::physical_now();
        let mut last = self.last.lock();
        if physical > last.wall_time {
            *last = Timestamp::wall(physical);
        } else {
            *last = last.next();
        }
        *last
    }
}

impl fmt::Debug for HlcClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HlcClock").field("last", &*self.last.lock()).finish()
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall_time: AtomicI64,
}

impl ManualClock {
    pub fn new(wall_time: i64) -> Self {
        Self {
            wall_time: AtomicI64::new(wall_time),
        }
    }

    pub fn set(&self, wall_time: i64) {
        self.wall_time.store(wall_time, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) {
        self.wall_time.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::wall(self.wall_time.load(Ordering::SeqCst))
    }
}
