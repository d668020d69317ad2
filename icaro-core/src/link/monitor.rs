//! Link monitor implementation
//!
//! Watches consecutive failed reads and the age of the last good sample.

use crate::config::TelemetryConfig;
use crate::traits::clock::elapsed_ms;

/// Link condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    /// Recent sample, no failures since
    Healthy,
    /// Last sample too old, or the last read failed
    Stale,
    /// Too many consecutive failures
    Lost,
}

/// Link monitor for the telemetry stream
///
/// Fed with the outcome of every attitude read. It never touches the bus
/// itself; the client decides what to do with the verdict.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    /// Age after which a sample counts as stale (ms)
    stale_after_ms: u32,
    /// Consecutive failures that mean the link is gone
    max_failures: u8,
    /// Time of the last good sample
    last_success_ms: Option<u32>,
    /// Failures since the last good sample
    consecutive_failures: u8,
}

impl LinkMonitor {
    /// Create a monitor with explicit thresholds
    pub fn new(stale_after_ms: u32, max_failures: u8) -> Self {
        Self {
            stale_after_ms,
            max_failures: max_failures.max(1),
            last_success_ms: None,
            consecutive_failures: 0,
        }
    }

    /// Create a monitor from telemetry settings
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.stale_after_ms, config.max_consecutive_failures)
    }

    /// Record a good sample
    pub fn record_success(&mut self, now_ms: u32) {
        self.last_success_ms = Some(now_ms);
        self.consecutive_failures = 0;
    }

    /// Record a failed read
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Evaluate the link at `now_ms`
    pub fn status(&self, now_ms: u32) -> LinkStatus {
        if self.consecutive_failures >= self.max_failures {
            return LinkStatus::Lost;
        }
        if self.consecutive_failures > 0 {
            return LinkStatus::Stale;
        }
        match self.last_success_ms {
            Some(at) if elapsed_ms(now_ms, at) <= self.stale_after_ms => LinkStatus::Healthy,
            _ => LinkStatus::Stale,
        }
    }

    /// Failures since the last good sample
    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.last_success_ms = None;
        self.consecutive_failures = 0;
    }
}
