// crates/tessera-core/src/clock.rs
//
// Period Clock: maps wall-clock seconds onto a monotonically increasing
// period index. Time itself is injected through the `TimeSource` trait so the
// staking core never reads a caller-supplied timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::traits::TimeSource;
use crate::types::{Period, Timestamp};

/// Seconds in one hour, the unit periods are configured in.
pub const SECONDS_PER_HOUR: u64 = 3_600;

/// Pure conversion between timestamps and period indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClock {
    /// Timestamp at which period 0 begins.
    pub genesis: Timestamp,
    /// Length of one period in seconds.
    pub seconds_per_period: u64,
}

impl PeriodClock {
    /// Create a clock with the given genesis and period length in hours.
    ///
    /// A zero-hour period is treated as one hour.
    pub fn new(genesis: Timestamp, hours_per_period: u64) -> Self {
        Self {
            genesis,
            seconds_per_period: hours_per_period.max(1) * SECONDS_PER_HOUR,
        }
    }

    /// Period containing `timestamp`. Timestamps before genesis map to period 0.
    pub fn period_at(&self, timestamp: Timestamp) -> Period {
        let elapsed = timestamp.saturating_sub(self.genesis);
        (elapsed / self.seconds_per_period) as Period
    }

    /// First second of `period`.
    pub fn start_of(&self, period: Period) -> Timestamp {
        self.genesis + period as u64 * self.seconds_per_period
    }

    /// Current period according to `source`.
    pub fn current_period(&self, source: &dyn TimeSource) -> Period {
        self.period_at(source.now())
    }
}

/// Wall-clock time from the system via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually advanced time. Clones share the same underlying instant, so a
/// test can hold one handle and advance time seen by the network.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Advance by whole hours.
    pub fn advance_hours(&self, hours: u64) {
        self.advance(hours * SECONDS_PER_HOUR);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
