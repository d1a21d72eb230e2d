//! LoRa radio support.
//!
//! This module contains:
//! - [`config`]: Region limits, data-rate mapping and radio parameters
//! - [`duty_cycle`]: Duty cycle tracker for regulatory compliance
//! - [`airtime`]: Time-on-air calculation for LoRa packets
//! - [`backoff`]: Retry policy with exponential backoff
//! - [`radio`]: Radio trait the manager drives
//! - [`sim`]: Scriptable in-memory radio for the host

mod airtime;
mod backoff;
mod config;
mod duty_cycle;
mod radio;
mod sim;

pub use airtime::{calculate_airtime_ms, calculate_airtime_us, uplink_airtime_ms, LoRaParams};
pub use backoff::{
    AttemptReport, Delay, RecordingDelay, RetryDecision, RetryEngine, RetryError, RetryPolicy,
    TransmissionAttempt, MAX_RETRIES_LIMIT,
};
pub use config::{
    RadioParams, Region, DEFAULT_DATA_RATE, DEFAULT_TX_POWER_DBM, DUTY_CYCLE_WINDOW_MS,
    LORAWAN_OVERHEAD_BYTES,
};
pub use duty_cycle::DutyCycleTracker;
pub use radio::{Radio, RadioError, RadioEvent, MAX_UPLINK_PAYLOAD};
pub use sim::{JoinBehavior, SentFrame, SimulatedRadio};
