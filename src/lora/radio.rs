//! Radio transceiver boundary.
//!
//! The manager never touches hardware. A LoRaWAN MAC stack (or the
//! [`SimulatedRadio`](super::SimulatedRadio)) implements [`Radio`]: it runs the
//! join handshake, sends one uplink per call, and reports asynchronous events
//! (join results, downlinks received in the RX windows, link loss) through
//! [`Radio::poll_event`].

use super::RadioParams;
use crate::session::{AbpSession, OtaaCredentials};
use std::fmt;

/// Largest application payload accepted for one uplink.
pub const MAX_UPLINK_PAYLOAD: usize = 51;

/// Event raised by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Join accept received; the network assigned `dev_addr`.
    Joined { dev_addr: [u8; 4] },
    /// Join request was rejected or got no answer.
    JoinFailed,
    /// Application data received in an RX window.
    Downlink {
        port: u8,
        payload: Vec<u8>,
        /// RSSI in dBm.
        rssi: i16,
        /// SNR in dB.
        snr: i8,
    },
    /// Link check failed repeatedly; the session is gone.
    LinkDead,
    /// Beacon / time synchronisation lost.
    LostTimeSync,
}

/// Radio transceiver operations used by the manager.
pub trait Radio {
    /// Issue an OTAA join request. The result arrives later as
    /// [`RadioEvent::Joined`] or [`RadioEvent::JoinFailed`].
    fn start_join(&mut self, credentials: &OtaaCredentials, dev_nonce: u16)
        -> Result<(), RadioError>;

    /// Install pre-shared ABP session keys.
    fn install_session(&mut self, session: &AbpSession) -> Result<(), RadioError>;

    /// Drop the current session and any pending join.
    fn reset(&mut self);

    /// Apply data rate, power and ADR.
    fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError>;

    /// Transmit one uplink and wait (at most `timeout_ms`) for completion.
    fn send(&mut self, port: u8, payload: &[u8], timeout_ms: u32) -> Result<(), RadioError>;

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<RadioEvent>;
}

/// Radio errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// No active session.
    NotJoined,
    /// Transmission did not complete in time.
    Timeout,
    /// Confirmed uplink was not acknowledged.
    NoAck,
    /// Radio is busy with another operation.
    Busy,
    /// Payload exceeds what the data rate allows.
    PayloadTooLarge { size: usize, max: usize },
    /// Port outside 1..=223.
    InvalidPort(u8),
    /// Driver-specific failure.
    Driver(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotJoined => write!(f, "not joined"),
            Self::Timeout => write!(f, "radio timeout"),
            Self::NoAck => write!(f, "no acknowledgement"),
            Self::Busy => write!(f, "radio busy"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {} bytes (max {})", size, max)
            }
            Self::InvalidPort(port) => write!(f, "invalid port: {}", port),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
        }
    }
}

impl std::error::Error for RadioError {}
