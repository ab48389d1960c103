//! Delivery statistics for the subscriber loop.
//!
//! Counters live on the subscriber thread and are reported between poll
//! cycles; emitting a report never touches I/O beyond the logger.

use std::fmt;

/// Rolling received/dropped/delay counters over a reporting window.
///
/// Every arriving message counts as received; messages that fail decoding,
/// routing, or persistence additionally count as dropped, so
/// `received - dropped` is the number fully processed.
#[derive(Debug)]
pub struct DeliveryStats {
    /// Reporting interval in seconds; 0 disables reporting entirely.
    interval: f64,
    received: u64,
    dropped: u64,
    delay_sum: f64,
    window_start: f64,
}

/// One emitted report; counters reset after it is produced.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsReport {
    pub received: u64,
    pub dropped: u64,
    pub elapsed: f64,
    pub in_fps: f64,
    pub average_delay: f64,
}

impl DeliveryStats {
    pub fn new(interval_secs: f64, now: f64) -> Self {
        Self {
            interval: interval_secs,
            received: 0,
            dropped: 0,
            delay_sum: 0.0,
            window_start: now,
        }
    }

    /// Record a successfully decoded message and its delivery delay.
    pub fn note_received(&mut self, frame_time: f64, now: f64) {
        self.received += 1;
        self.delay_sum += now - frame_time;
    }

    /// Record a message that arrived but was dropped. The frame time of a
    /// malformed message is unknown, so no delay is accumulated.
    pub fn note_dropped(&mut self) {
        self.received += 1;
        self.dropped += 1;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Emit a report and reset counters once the interval has elapsed.
    pub fn tick(&mut self, now: f64) -> Option<StatsReport> {
        if self.interval <= 0.0 {
            return None;
        }
        let elapsed = now - self.window_start;
        if elapsed < self.interval {
            return None;
        }
        let report = StatsReport {
            received: self.received,
            dropped: self.dropped,
            elapsed,
            in_fps: if elapsed > 0.0 {
                (self.received - self.dropped) as f64 / elapsed
            } else {
                0.0
            },
            average_delay: if self.received > 0 {
                self.delay_sum / self.received as f64
            } else {
                0.0
            },
        };
        self.received = 0;
        self.dropped = 0;
        self.delay_sum = 0.0;
        self.window_start = now;
        Some(report)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} dropped={} elapsed={:.1}s in_fps={:.1} avg_delay={:.3}s",
            self.received, self.dropped, self.elapsed, self.in_fps, self.average_delay
        )
    }
}
