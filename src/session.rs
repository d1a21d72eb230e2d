//! Network session and join state machine.
//!
//! ```text
//!              connect() [OTAA]          Joined
//! Disconnected ----------------> Joining ------> Connected
//!      ^  |                         |               |
//!      |  +--- connect() [ABP] -----|-------------->|
//!      |        JoinFailed/timeout  |               |
//!      +----------------------------+  LinkDead /   |
//!      +--------------------------------------------+ LostTimeSync
//! ```
//!
//! After a failed join or a link loss the machine retries on its own, spaced
//! by `retry_delay_ms`, until `max_retries` retries have failed. It then
//! stays disconnected until the host calls [`Session::connect`] or
//! [`Session::rejoin`].

use crate::lora::{Radio, RadioError, RadioEvent};
use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// OTAA credentials.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OtaaCredentials {
    pub dev_eui: [u8; 8],
    pub join_eui: [u8; 8],
    pub app_key: [u8; 16],
}

impl fmt::Debug for OtaaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtaaCredentials")
            .field("dev_eui", &self.dev_eui)
            .field("join_eui", &self.join_eui)
            .field("app_key", &"<redacted>")
            .finish()
    }
}

/// Pre-provisioned ABP session.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AbpSession {
    pub dev_addr: [u8; 4],
    pub nwk_s_key: [u8; 16],
    pub app_s_key: [u8; 16],
}

impl fmt::Debug for AbpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbpSession")
            .field("dev_addr", &self.dev_addr)
            .field("nwk_s_key", &"<redacted>")
            .field("app_s_key", &"<redacted>")
            .finish()
    }
}

/// How the device obtains its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationMode {
    /// Over-the-air activation with a join handshake.
    Otaa(OtaaCredentials),
    /// Activation by personalisation, usable immediately.
    Abp(AbpSession),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Joining,
    Connected,
}

/// Join timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    /// Minimum spacing between join attempts.
    pub retry_delay_ms: u64,
    /// Automatic retries after the first failed attempt.
    pub max_retries: u8,
    /// How long to wait for a join answer.
    pub timeout_ms: u64,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            retry_delay_ms: 30_000,
            max_retries: 5,
            timeout_ms: 60_000,
        }
    }
}

/// Session state changes reported to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session established.
    Joined,
    /// A join attempt failed. `will_retry` is false once retries are exhausted.
    JoinFailed { will_retry: bool },
    /// An established session was lost.
    LinkLost,
}

/// Errors returned by [`Session::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A join request is already waiting for an answer.
    JoinInProgress,
    /// The previous attempt was too recent.
    RetryTooSoon { wait_ms: u64 },
    /// The radio refused the request.
    Radio(RadioError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinInProgress => write!(f, "join already in progress"),
            Self::RetryTooSoon { wait_ms } => {
                write!(f, "join retry too soon, wait {} ms", wait_ms)
            }
            Self::Radio(e) => write!(f, "radio error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RadioError> for SessionError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// Session owner and join state machine.
#[derive(Debug)]
pub struct Session {
    mode: ActivationMode,
    policy: JoinPolicy,
    state: SessionState,
    dev_addr: Option<[u8; 4]>,
    join_started_ms: u64,
    last_attempt_ms: Option<u64>,
    /// Attempts in the current join cycle, including the first.
    cycle_attempts: u8,
    auto_retry: bool,
    total_attempts: u32,
}

impl Session {
    pub fn new(mode: ActivationMode, policy: JoinPolicy) -> Self {
        Self {
            mode,
            policy,
            state: SessionState::Disconnected,
            dev_addr: None,
            join_started_ms: 0,
            last_attempt_ms: None,
            cycle_attempts: 0,
            auto_retry: false,
            total_attempts: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Device address of the active session.
    pub fn dev_addr(&self) -> Option<[u8; 4]> {
        self.dev_addr
    }

    pub fn mode(&self) -> &ActivationMode {
        &self.mode
    }

    /// Join attempts since creation (or the last statistics reset).
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn reset_attempt_counter(&mut self) {
        self.total_attempts = 0;
    }

    /// Whether an automatic retry is scheduled.
    pub fn auto_retry_pending(&self) -> bool {
        self.auto_retry && self.state == SessionState::Disconnected
    }

    /// Start a join (OTAA) or install the session (ABP).
    ///
    /// Returns `Ok(true)` when the session became usable immediately,
    /// `Ok(false)` when a join request is now in flight.
    pub fn connect<R: Radio + ?Sized>(
        &mut self,
        radio: &mut R,
        now_ms: u64,
    ) -> Result<bool, SessionError> {
        match self.state {
            SessionState::Connected => return Ok(true),
            SessionState::Joining => return Err(SessionError::JoinInProgress),
            SessionState::Disconnected => {}
        }
        if let Some(wait_ms) = self.retry_wait(now_ms) {
            debug!("Join retry too soon, {} ms left", wait_ms);
            return Err(SessionError::RetryTooSoon { wait_ms });
        }
        self.cycle_attempts = 0;
        self.start_attempt(radio, now_ms)
    }

    /// Drop the session. Automatic retries stop.
    pub fn disconnect<R: Radio + ?Sized>(&mut self, radio: &mut R) {
        if self.state != SessionState::Disconnected {
            info!("Disconnecting from network");
        }
        radio.reset();
        self.state = SessionState::Disconnected;
        self.dev_addr = None;
        self.auto_retry = false;
    }

    /// Disconnect, then connect again without waiting for the retry delay.
    pub fn rejoin<R: Radio + ?Sized>(
        &mut self,
        radio: &mut R,
        now_ms: u64,
    ) -> Result<bool, SessionError> {
        self.disconnect(radio);
        self.last_attempt_ms = None;
        self.connect(radio, now_ms)
    }

    /// Feed a radio event. Downlinks are ignored here.
    pub fn on_radio_event<R: Radio + ?Sized>(
        &mut self,
        event: &RadioEvent,
        radio: &mut R,
        now_ms: u64,
    ) -> Option<SessionEvent> {
        match event {
            RadioEvent::Joined { dev_addr } => {
                if self.state != SessionState::Joining {
                    debug!("Ignoring join accept while {:?}", self.state);
                    return None;
                }
                info!("Joined network, dev_addr {:02X?}", dev_addr);
                self.state = SessionState::Connected;
                self.dev_addr = Some(*dev_addr);
                self.cycle_attempts = 0;
                self.auto_retry = false;
                Some(SessionEvent::Joined)
            }
            RadioEvent::JoinFailed => {
                if self.state != SessionState::Joining {
                    return None;
                }
                Some(self.join_failed(now_ms))
            }
            RadioEvent::LinkDead | RadioEvent::LostTimeSync => {
                if self.state == SessionState::Connected {
                    warn!("Link lost ({:?})", event);
                }
                self.link_lost(radio)
            }
            RadioEvent::Downlink { .. } => None,
        }
    }

    /// Drop a session the network no longer knows and rejoin on the next poll.
    ///
    /// Only acts while connected.
    pub fn link_lost<R: Radio + ?Sized>(&mut self, radio: &mut R) -> Option<SessionEvent> {
        if self.state != SessionState::Connected {
            return None;
        }
        info!("Session dropped, scheduling rejoin");
        radio.reset();
        self.state = SessionState::Disconnected;
        self.dev_addr = None;
        self.cycle_attempts = 0;
        self.auto_retry = true;
        self.last_attempt_ms = None;
        Some(SessionEvent::LinkLost)
    }

    /// Advance timers: join timeout and scheduled automatic retries.
    pub fn poll<R: Radio + ?Sized>(&mut self, radio: &mut R, now_ms: u64) -> Option<SessionEvent> {
        match self.state {
            SessionState::Joining => {
                if now_ms.saturating_sub(self.join_started_ms) >= self.policy.timeout_ms {
                    warn!("Join timed out after {} ms", self.policy.timeout_ms);
                    radio.reset();
                    return Some(self.join_failed(now_ms));
                }
                None
            }
            SessionState::Disconnected if self.auto_retry => {
                if self.retry_wait(now_ms).is_some() {
                    return None;
                }
                match self.start_attempt(radio, now_ms) {
                    Ok(true) => Some(SessionEvent::Joined),
                    Ok(false) => None,
                    Err(e) => {
                        warn!("Automatic join attempt failed: {}", e);
                        Some(self.join_failed(now_ms))
                    }
                }
            }
            _ => None,
        }
    }

    fn retry_wait(&self, now_ms: u64) -> Option<u64> {
        let last = self.last_attempt_ms?;
        let elapsed = now_ms.saturating_sub(last);
        (elapsed < self.policy.retry_delay_ms).then(|| self.policy.retry_delay_ms - elapsed)
    }

    fn start_attempt<R: Radio + ?Sized>(
        &mut self,
        radio: &mut R,
        now_ms: u64,
    ) -> Result<bool, SessionError> {
        self.cycle_attempts = self.cycle_attempts.saturating_add(1);
        self.total_attempts = self.total_attempts.saturating_add(1);
        self.last_attempt_ms = Some(now_ms);
        self.auto_retry = true;

        match &self.mode {
            ActivationMode::Otaa(credentials) => {
                let dev_nonce = (OsRng.next_u32() & 0xFFFF) as u16;
                info!(
                    "Joining (OTAA) attempt {} of {}",
                    self.cycle_attempts,
                    u16::from(self.policy.max_retries) + 1
                );
                radio.start_join(credentials, dev_nonce)?;
                self.state = SessionState::Joining;
                self.join_started_ms = now_ms;
                Ok(false)
            }
            ActivationMode::Abp(session) => {
                radio.install_session(session)?;
                info!("ABP session active, dev_addr {:02X?}", session.dev_addr);
                self.state = SessionState::Connected;
                self.dev_addr = Some(session.dev_addr);
                self.cycle_attempts = 0;
                self.auto_retry = false;
                Ok(true)
            }
        }
    }

    fn join_failed(&mut self, now_ms: u64) -> SessionEvent {
        self.state = SessionState::Disconnected;
        self.dev_addr = None;
        let will_retry = self.cycle_attempts <= self.policy.max_retries;
        self.auto_retry = will_retry;
        if will_retry {
            info!(
                "Join failed, retrying in {} ms",
                self.policy.retry_delay_ms.saturating_sub(
                    now_ms.saturating_sub(self.last_attempt_ms.unwrap_or(now_ms))
                )
            );
        } else {
            warn!(
                "Join failed after {} attempts, giving up",
                self.cycle_attempts
            );
        }
        SessionEvent::JoinFailed { will_retry }
    }
}
