//! Scriptable in-memory radio.
//!
//! Used by the host node binary and by tests. Join results, send outcomes
//! and downlinks are queued ahead of time; everything the manager sends is
//! recorded for inspection.

use super::radio::{Radio, RadioError, RadioEvent, MAX_UPLINK_PAYLOAD};
use super::RadioParams;
use crate::session::{AbpSession, OtaaCredentials};
use log::debug;
use std::collections::VecDeque;

/// How the simulated network answers join requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinBehavior {
    /// Accept and assign this device address.
    Accept([u8; 4]),
    /// Answer with a join failure.
    Reject,
    /// Never answer; the manager's join timeout has to fire.
    Silent,
}

/// Uplink recorded by [`SimulatedRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub port: u8,
    pub payload: Vec<u8>,
}

/// In-memory [`Radio`] implementation.
#[derive(Debug)]
pub struct SimulatedRadio {
    join_behavior: JoinBehavior,
    send_results: VecDeque<Result<(), RadioError>>,
    downlinks: VecDeque<(u8, Vec<u8>)>,
    events: VecDeque<RadioEvent>,
    session_active: bool,
    params: Option<RadioParams>,
    sent: Vec<SentFrame>,
    join_nonces: Vec<u16>,
    resets: u32,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new(JoinBehavior::Accept([0x26, 0x01, 0x1B, 0x5F]))
    }
}

impl SimulatedRadio {
    pub fn new(join_behavior: JoinBehavior) -> Self {
        Self {
            join_behavior,
            send_results: VecDeque::new(),
            downlinks: VecDeque::new(),
            events: VecDeque::new(),
            session_active: false,
            params: None,
            sent: Vec::new(),
            join_nonces: Vec::new(),
            resets: 0,
        }
    }

    pub fn set_join_behavior(&mut self, behavior: JoinBehavior) {
        self.join_behavior = behavior;
    }

    /// Queue the outcome of the next send. Sends succeed once the queue is empty.
    pub fn push_send_result(&mut self, result: Result<(), RadioError>) {
        self.send_results.push_back(result);
    }

    /// Queue `count` consecutive send failures.
    pub fn fail_next_sends(&mut self, count: usize, error: RadioError) {
        for _ in 0..count {
            self.push_send_result(Err(error.clone()));
        }
    }

    /// Queue a downlink delivered in the RX window of the next successful send.
    pub fn queue_downlink(&mut self, port: u8, payload: impl Into<Vec<u8>>) {
        self.downlinks.push_back((port, payload.into()));
    }

    /// Inject an event directly (link loss, unsolicited downlink).
    pub fn inject_event(&mut self, event: RadioEvent) {
        if matches!(event, RadioEvent::LinkDead | RadioEvent::LostTimeSync) {
            self.session_active = false;
        }
        self.events.push_back(event);
    }

    pub fn sent(&self) -> &[SentFrame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }

    pub fn join_nonces(&self) -> &[u16] {
        &self.join_nonces
    }

    pub fn params(&self) -> Option<RadioParams> {
        self.params
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn session_active(&self) -> bool {
        self.session_active
    }
}

impl Radio for SimulatedRadio {
    fn start_join(
        &mut self,
        credentials: &OtaaCredentials,
        dev_nonce: u16,
    ) -> Result<(), RadioError> {
        debug!(
            "sim: join request dev_eui={:02X?} nonce={:#06x}",
            credentials.dev_eui, dev_nonce
        );
        self.join_nonces.push(dev_nonce);
        match self.join_behavior {
            JoinBehavior::Accept(dev_addr) => {
                self.session_active = true;
                self.events.push_back(RadioEvent::Joined { dev_addr });
            }
            JoinBehavior::Reject => self.events.push_back(RadioEvent::JoinFailed),
            JoinBehavior::Silent => {}
        }
        Ok(())
    }

    fn install_session(&mut self, session: &AbpSession) -> Result<(), RadioError> {
        debug!("sim: ABP session for {:02X?}", session.dev_addr);
        self.session_active = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.session_active = false;
        self.events
            .retain(|e| !matches!(e, RadioEvent::Joined { .. } | RadioEvent::JoinFailed));
        self.resets += 1;
    }

    fn configure(&mut self, params: &RadioParams) -> Result<(), RadioError> {
        self.params = Some(*params);
        Ok(())
    }

    fn send(&mut self, port: u8, payload: &[u8], _timeout_ms: u32) -> Result<(), RadioError> {
        if !self.session_active {
            return Err(RadioError::NotJoined);
        }
        if port == 0 || port > 223 {
            return Err(RadioError::InvalidPort(port));
        }
        if payload.len() > MAX_UPLINK_PAYLOAD {
            return Err(RadioError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_UPLINK_PAYLOAD,
            });
        }
        self.sent.push(SentFrame {
            port,
            payload: payload.to_vec(),
        });
        if let Some(result) = self.send_results.pop_front() {
            result?;
        }
        if let Some((port, payload)) = self.downlinks.pop_front() {
            self.events.push_back(RadioEvent::Downlink {
                port,
                payload,
                rssi: -87,
                snr: 7,
            });
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        self.events.pop_front()
    }
}
