//! Progress arithmetic for one transfer.
//!
//! A [`TransferMetric`] is a plain value: the pump that owns it records bytes
//! and elapsed time, everyone else reads copies of it. All derived getters are
//! total. Zero totals or zero elapsed time give zero results instead of NaN,
//! infinity or a panic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scale used for speed and ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    fn of(&self, elapsed: Duration) -> f64 {
        match self {
            TimeUnit::Seconds => elapsed.as_secs_f64(),
            TimeUnit::Milliseconds => elapsed.as_secs_f64() * 1000f64,
        }
    }

    fn to_duration(self, amount: f64) -> Duration {
        let secs = match self {
            TimeUnit::Seconds => amount,
            TimeUnit::Milliseconds => amount / 1000f64,
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferMetric {
    bytes_transferred: u64,
    total_bytes: u64,
    elapsed: Duration,
    time_unit: TimeUnit,
}

impl TransferMetric {
    /// `total` falls back to `ceiling` when the size is not known.
    pub fn new(total: Option<u64>, ceiling: u64, time_unit: TimeUnit) -> Self {
        TransferMetric {
            bytes_transferred: 0,
            total_bytes: total.unwrap_or(ceiling),
            elapsed: Duration::ZERO,
            time_unit,
        }
    }

    /// Adds a chunk and moves the clock forward.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
        if elapsed > self.elapsed {
            self.elapsed = elapsed;
        }
    }

    /// Reduces per-worker snapshots into one. Workers run side by side, so the
    /// combined elapsed time is the slowest worker's.
    pub fn combine<I>(metrics: I) -> Option<Self>
    where
        I: IntoIterator<Item = TransferMetric>,
    {
        metrics.into_iter().reduce(|acc, m| TransferMetric {
            bytes_transferred: acc.bytes_transferred.saturating_add(m.bytes_transferred),
            total_bytes: acc.total_bytes.saturating_add(m.total_bytes),
            elapsed: acc.elapsed.max(m.elapsed),
            time_unit: acc.time_unit,
        })
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Percentage in `0..=100` while within the declared total.
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0f64;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100f64
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes.saturating_sub(self.bytes_transferred)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes per second or per millisecond, following the time unit.
    pub fn speed(&self) -> f64 {
        let elapsed = self.time_unit.of(self.elapsed);
        if elapsed <= 0f64 {
            return 0f64;
        }
        self.bytes_transferred as f64 / elapsed
    }

    pub fn eta(&self) -> Duration {
        let speed = self.speed();
        if speed <= 0f64 || self.total_bytes == 0 {
            return Duration::ZERO;
        }
        self.time_unit.to_duration(self.remaining() as f64 / speed)
    }
}
