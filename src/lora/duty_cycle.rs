//! Duty-cycle tracking over a fixed accounting window.
//!
//! Airtime is accumulated in milliseconds since the start of the current
//! window. Once more than one window duration has passed, the accumulator is
//! cleared and a new window starts. Transmission is admitted while usage is
//! strictly below the regulatory limit, and the accumulator never holds more
//! than the limit's share of the window.
//!
//! # Example
//!
//! ```
//! use lpwan_manager::lora::DutyCycleTracker;
//!
//! // 1% duty cycle over 1 hour (EU 868 MHz band)
//! let mut tracker = DutyCycleTracker::new(1.0, 3_600_000, 0);
//! assert!(tracker.can_transmit(0));
//!
//! assert!(tracker.can_transmit_for(0, 36_000));
//! assert!(!tracker.can_transmit_for(0, 36_001));
//!
//! tracker.record(0, 36_000); // the full 36 s budget
//! assert!(!tracker.can_transmit(1_000));
//! assert!(tracker.can_transmit(3_600_001));
//! ```

use log::debug;

/// Fixed-window airtime accumulator.
#[derive(Debug, Clone)]
pub struct DutyCycleTracker {
    /// Limit as percentage of the window (e.g. 1.0 for 1%)
    limit_percent: f32,
    /// Window duration in milliseconds
    window_ms: u64,
    /// Start of the current window
    window_start_ms: u64,
    /// Airtime used in the current window, never above `budget_ms()`
    accumulated_ms: u64,
}

impl DutyCycleTracker {
    /// Create a tracker whose first window starts at `now_ms`.
    pub fn new(limit_percent: f32, window_ms: u64, now_ms: u64) -> Self {
        Self {
            limit_percent: limit_percent.clamp(0.0, 100.0),
            window_ms,
            window_start_ms: now_ms,
            accumulated_ms: 0,
        }
    }

    /// Charge `airtime_ms` of transmission to the current window.
    pub fn record(&mut self, now_ms: u64, airtime_ms: u32) {
        self.roll_window(now_ms);
        self.accumulated_ms = self
            .accumulated_ms
            .saturating_add(airtime_ms as u64)
            .min(self.budget_ms());
    }

    /// Fraction of the current window spent transmitting, in percent (0..=100).
    pub fn usage_percent(&mut self, now_ms: u64) -> f32 {
        self.roll_window(now_ms);
        self.current_usage()
    }

    /// Whether another transmission may start now.
    pub fn can_transmit(&mut self, now_ms: u64) -> bool {
        self.usage_percent(now_ms) < self.limit_percent
    }

    /// Whether a transmission of `airtime_ms` fits in what is left of the budget.
    pub fn can_transmit_for(&mut self, now_ms: u64, airtime_ms: u32) -> bool {
        self.roll_window(now_ms);
        self.accumulated_ms.saturating_add(airtime_ms as u64) <= self.budget_ms()
    }

    /// Airtime still available under the limit in this window.
    pub fn remaining_ms(&mut self, now_ms: u64) -> u64 {
        self.roll_window(now_ms);
        self.budget_ms().saturating_sub(self.accumulated_ms)
    }

    /// Milliseconds until the current window closes.
    pub fn window_remaining_ms(&self, now_ms: u64) -> u64 {
        (self.window_start_ms + self.window_ms).saturating_sub(now_ms)
    }

    /// Clear the accumulator and start a fresh window at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        self.window_start_ms = now_ms;
        self.accumulated_ms = 0;
    }

    /// Total airtime allowed per window.
    pub fn budget_ms(&self) -> u64 {
        (self.window_ms as f64 * self.limit_percent as f64 / 100.0) as u64
    }

    pub fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    pub fn limit_percent(&self) -> f32 {
        self.limit_percent
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn current_usage(&self) -> f32 {
        if self.window_ms == 0 {
            return 0.0;
        }
        let usage = self.accumulated_ms as f64 / self.window_ms as f64 * 100.0;
        usage.min(100.0) as f32
    }

    fn roll_window(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.window_start_ms) > self.window_ms {
            if self.accumulated_ms > 0 {
                debug!(
                    "Duty cycle window expired, clearing {} ms of airtime",
                    self.accumulated_ms
                );
            }
            self.window_start_ms = now_ms;
            self.accumulated_ms = 0;
        }
    }
}
