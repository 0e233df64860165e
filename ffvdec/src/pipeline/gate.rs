//! Timestamp gate
//!
//! Decides whether a decoded output is before the requested start time and
//! accumulates the skip counter that travels on the next delivered output.

/// Start-time threshold plus the running skip counter for one flush epoch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimestampGate {
    start_time_us: Option<i64>,
    skipped: u32,
}

impl TimestampGate {
    pub fn new(start_time_us: Option<i64>) -> Self {
        Self {
            start_time_us,
            skipped: 0,
        }
    }

    pub fn start_time_us(&self) -> Option<i64> {
        self.start_time_us
    }

    pub fn set_start_time_us(&mut self, start_time_us: Option<i64>) {
        self.start_time_us = start_time_us;
    }

    /// True when `timestamp_us` is at or after the start time (or no start
    /// time is set)
    pub fn passes(&self, timestamp_us: i64) -> bool {
        self.start_time_us
            .map_or(true, |start| timestamp_us >= start)
    }

    /// An output is decode-only when it precedes the start time or the engine
    /// flagged it
    pub fn is_decode_only(&self, timestamp_us: i64, flagged: bool) -> bool {
        flagged || !self.passes(timestamp_us)
    }

    pub fn record_skipped(&mut self, count: u32) {
        self.skipped = self.skipped.saturating_add(count);
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Hand the accumulated count to a delivered output and start over
    pub fn take_skipped(&mut self) -> u32 {
        std::mem::take(&mut self.skipped)
    }

    /// Flush: the counter restarts, the threshold is kept
    pub fn reset(&mut self) {
        self.skipped = 0;
    }
}
