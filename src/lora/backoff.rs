//! Bounded exponential-backoff retries for uplink transmissions.
//!
//! The delay before retry `n` (1-based) is `min(initial * 2^(n-1), max)`.
//! `max_retries` counts retries after the first attempt, so a frame is sent
//! at most `max_retries + 1` times.
//!
//! Two forms are provided:
//! - [`TransmissionAttempt`], a stepwise record the manager keeps between
//!   ticks so it never sleeps;
//! - [`RetryEngine::attempt`], a blocking loop for hosts that own their
//!   sleeping.
//!
//! # Example
//!
//! ```
//! use lpwan_manager::lora::{RecordingDelay, RetryEngine, RetryPolicy};
//!
//! let engine = RetryEngine::new(RetryPolicy::default());
//! let mut delay = RecordingDelay::default();
//! let report = engine.attempt(|_attempt| Err::<(), _>("no ack"), &mut delay);
//!
//! assert!(!report.success);
//! assert_eq!(report.delays_ms, vec![1000, 2000, 4000]);
//! ```

use log::{debug, warn};

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u8 = 20;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u8,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u32,
    /// Cap on any single delay in milliseconds.
    pub max_delay_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.initial_delay_ms == 0 {
            return Err(RetryError::InvalidConfig("initial_delay_ms must be > 0"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RetryError::InvalidConfig(
                "max_delay_ms must be >= initial_delay_ms",
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(RetryError::InvalidConfig("max_retries must be <= 20"));
        }
        Ok(())
    }

    /// Backoff before retry `retry` (1-based). Retry 0 has no delay.
    pub fn backoff_ms(&self, retry: u8) -> u32 {
        if retry == 0 {
            return 0;
        }
        let factor = 1u32.checked_shl(u32::from(retry - 1)).unwrap_or(u32::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Errors from retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Invalid configuration parameter.
    InvalidConfig(&'static str),
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid retry config: {}", msg),
        }
    }
}

impl std::error::Error for RetryError {}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignoring the retry decision leaves the frame in limbo"]
pub enum RetryDecision {
    /// Try again once `ms` have passed.
    RetryAfter {
        /// Backoff in milliseconds.
        ms: u32,
    },
    /// Retries exhausted, drop the frame.
    GiveUp,
}

/// Retry bookkeeping for one uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionAttempt {
    retries: u8,
    last_delay_ms: Option<u32>,
    airtime_ms: u32,
    next_attempt_ms: u64,
}

impl TransmissionAttempt {
    /// Start tracking an uplink whose first attempt may go out at `now_ms`.
    pub fn new(airtime_ms: u32, now_ms: u64) -> Self {
        Self {
            retries: 0,
            last_delay_ms: None,
            airtime_ms,
            next_attempt_ms: now_ms,
        }
    }

    /// Register a failed attempt and decide whether to retry.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now_ms: u64) -> RetryDecision {
        if self.retries >= policy.max_retries {
            warn!(
                "Giving up after {} attempts",
                u16::from(self.retries) + 1
            );
            return RetryDecision::GiveUp;
        }
        self.retries += 1;
        let ms = policy.backoff_ms(self.retries);
        self.last_delay_ms = Some(ms);
        self.next_attempt_ms = now_ms.saturating_add(u64::from(ms));
        debug!("Retry {} of {} in {} ms", self.retries, policy.max_retries, ms);
        RetryDecision::RetryAfter { ms }
    }

    /// Whether the next attempt may start.
    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_attempt_ms
    }

    /// Retries used so far.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Attempts made or in progress, counting the first.
    pub fn attempts(&self) -> u8 {
        self.retries.saturating_add(1)
    }

    pub fn last_delay_ms(&self) -> Option<u32> {
        self.last_delay_ms
    }

    pub fn airtime_ms(&self) -> u32 {
        self.airtime_ms
    }

    /// Replace the airtime estimate (e.g. after a data-rate change).
    pub fn set_airtime_ms(&mut self, airtime_ms: u32) {
        self.airtime_ms = airtime_ms;
    }

    pub fn next_attempt_ms(&self) -> u64 {
        self.next_attempt_ms
    }
}

/// Host-provided sleeper used by the blocking retry loop.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default, Clone)]
pub struct RecordingDelay {
    pub delays_ms: Vec<u32>,
}

impl Delay for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.delays_ms.push(ms);
    }
}

/// Outcome of a blocking retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub success: bool,
    /// Attempts made, including the first.
    pub attempts: u8,
    /// Backoff delays applied, in order.
    pub delays_ms: Vec<u32>,
}

/// Drives retries with a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryEngine {
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `send` until it succeeds or retries are exhausted.
    ///
    /// `send` receives the 1-based attempt number and performs exactly one
    /// physical transmission.
    pub fn attempt<F, E, D>(&self, mut send: F, delay: &mut D) -> AttemptReport
    where
        F: FnMut(u8) -> Result<(), E>,
        E: std::fmt::Display,
        D: Delay + ?Sized,
    {
        let mut state = TransmissionAttempt::new(0, 0);
        let mut delays_ms = Vec::new();
        loop {
            let attempt = state.attempts();
            match send(attempt) {
                Ok(()) => {
                    return AttemptReport {
                        success: true,
                        attempts: attempt,
                        delays_ms,
                    }
                }
                Err(e) => {
                    debug!("Attempt {} failed: {}", attempt, e);
                    match state.record_failure(&self.policy, 0) {
                        RetryDecision::RetryAfter { ms } => {
                            delays_ms.push(ms);
                            delay.delay_ms(ms);
                        }
                        RetryDecision::GiveUp => {
                            return AttemptReport {
                                success: false,
                                attempts: attempt,
                                delays_ms,
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validation() {
        let zero_initial = RetryPolicy {
            initial_delay_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_initial.validate(),
            Err(RetryError::InvalidConfig(_))
        ));

        let inverted = RetryPolicy {
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(RetryError::InvalidConfig(_))
        ));

        let too_many = RetryPolicy {
            max_retries: 21,
            ..Default::default()
        };
        assert!(matches!(
            too_many.validate(),
            Err(RetryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        };
        let delays: Vec<u32> = (1..=8).map(|n| policy.backoff_ms(n)).collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]
        );
        assert_eq!(policy.backoff_ms(0), 0);
        assert_eq!(policy.backoff_ms(200), 60_000);
    }

    #[test]
    fn test_always_failing_send_reports_failure() {
        let engine = RetryEngine::new(RetryPolicy::default());
        let mut delay = RecordingDelay::default();
        let mut calls = 0;
        let report = engine.attempt(
            |_| {
                calls += 1;
                Err("timeout")
            },
            &mut delay,
        );
        assert!(!report.success);
        assert_eq!(report.attempts, 4);
        assert_eq!(calls, 4);
        assert_eq!(report.delays_ms, vec![1_000, 2_000, 4_000]);
        assert_eq!(delay.delays_ms, vec![1_000, 2_000, 4_000]);
    }

    #[test]
    fn test_success_after_one_retry() {
        let engine = RetryEngine::new(RetryPolicy::default());
        let mut delay = RecordingDelay::default();
        let report = engine.attempt(
            |attempt| if attempt < 2 { Err("nack") } else { Ok(()) },
            &mut delay,
        );
        assert!(report.success);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.delays_ms, vec![1_000]);
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let engine = RetryEngine::new(RetryPolicy {
            max_retries: 0,
            ..Default::default()
        });
        let mut delay = RecordingDelay::default();
        let report = engine.attempt(|_| Err("fail"), &mut delay);
        assert!(!report.success);
        assert_eq!(report.attempts, 1);
        assert!(report.delays_ms.is_empty());
    }

    #[test]
    fn test_stepwise_attempt_schedules_next_try() {
        let policy = RetryPolicy::default();
        let mut attempt = TransmissionAttempt::new(50, 10_000);
        assert!(attempt.is_due(10_000));

        assert_eq!(
            attempt.record_failure(&policy, 10_000),
            RetryDecision::RetryAfter { ms: 1_000 }
        );
        assert!(!attempt.is_due(10_999));
        assert!(attempt.is_due(11_000));
        assert_eq!(attempt.last_delay_ms(), Some(1_000));
        assert_eq!(attempt.attempts(), 2);

        let _ = attempt.record_failure(&policy, 11_000);
        let _ = attempt.record_failure(&policy, 13_000);
        assert_eq!(attempt.retries(), 3);
        assert_eq!(attempt.record_failure(&policy, 17_000), RetryDecision::GiveUp);
    }
}
