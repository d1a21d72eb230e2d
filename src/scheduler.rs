//! Uplink scheduling.
//!
//! Regular uplinks wait for the transmit interval; command responses skip
//! the interval. Both are subject to the duty-cycle check the caller passes
//! in. Queued uplinks expire after a time-to-live so that readings taken
//! before a long outage are not sent late.

use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;

/// Shortest allowed transmit interval (10 s).
pub const MIN_INTERVAL_MS: u32 = 10_000;

/// Longest allowed transmit interval (1 h).
pub const MAX_INTERVAL_MS: u32 = 3_600_000;

/// Interval used until configured otherwise (60 s).
pub const DEFAULT_INTERVAL_MS: u32 = 60_000;

/// Regular uplinks kept while waiting. The oldest is dropped on overflow.
pub const UPLINK_QUEUE_CAPACITY: usize = 8;

/// Command responses kept while waiting. New responses are refused on overflow.
pub const RESPONSE_QUEUE_CAPACITY: usize = 16;

/// Time-to-live for queued uplinks (10 min).
pub const UPLINK_TTL_MS: u64 = 600_000;

/// Kind of queued uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkKind {
    /// Application data, sent on the interval.
    Regular,
    /// Answer to a downlink command, sent as soon as the duty cycle allows.
    Response,
    /// Answer to a REBOOT command; the device restarts once it is sent.
    RestartAck,
}

/// An uplink waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUplink {
    port: u8,
    payload: Vec<u8>,
    kind: UplinkKind,
    queued_at_ms: u64,
}

impl QueuedUplink {
    pub fn new(port: u8, payload: Vec<u8>, kind: UplinkKind, queued_at_ms: u64) -> Self {
        Self {
            port,
            payload,
            kind,
            queued_at_ms,
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn kind(&self) -> UplinkKind {
        self.kind
    }

    pub fn queued_at_ms(&self) -> u64 {
        self.queued_at_ms
    }

    /// True once the uplink has waited longer than `ttl_ms`.
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.queued_at_ms) > ttl_ms
    }
}

/// Interval limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalBounds {
    pub min_ms: u32,
    pub max_ms: u32,
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self {
            min_ms: MIN_INTERVAL_MS,
            max_ms: MAX_INTERVAL_MS,
        }
    }
}

impl IntervalBounds {
    pub fn contains(&self, ms: u32) -> bool {
        (self.min_ms..=self.max_ms).contains(&ms)
    }
}

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Requested interval is outside the configured bounds.
    IntervalOutOfRange { ms: u32, min: u32, max: u32 },
    /// Response queue is at capacity.
    ResponseQueueFull,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntervalOutOfRange { ms, min, max } => {
                write!(f, "interval {} ms outside [{}, {}] ms", ms, min, max)
            }
            Self::ResponseQueueFull => write!(f, "response queue full"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Decides which uplink goes out next and when.
#[derive(Debug, Clone)]
pub struct TransmitScheduler {
    bounds: IntervalBounds,
    interval_ms: u32,
    last_transmission_ms: Option<u64>,
    responses: VecDeque<QueuedUplink>,
    uplinks: VecDeque<QueuedUplink>,
    capacity: usize,
    ttl_ms: u64,
}

impl TransmitScheduler {
    pub fn new(bounds: IntervalBounds, interval_ms: u32) -> Result<Self, SchedulerError> {
        let mut scheduler = Self {
            bounds,
            interval_ms: bounds.min_ms,
            last_transmission_ms: None,
            responses: VecDeque::with_capacity(RESPONSE_QUEUE_CAPACITY),
            uplinks: VecDeque::with_capacity(UPLINK_QUEUE_CAPACITY),
            capacity: UPLINK_QUEUE_CAPACITY,
            ttl_ms: UPLINK_TTL_MS,
        };
        scheduler.set_interval(interval_ms)?;
        Ok(scheduler)
    }

    /// Override queue capacity and time-to-live.
    pub fn with_queue_limits(mut self, capacity: usize, ttl_ms: u64) -> Self {
        self.capacity = capacity.max(1);
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn bounds(&self) -> IntervalBounds {
        self.bounds
    }

    pub fn set_interval(&mut self, ms: u32) -> Result<(), SchedulerError> {
        if !self.bounds.contains(ms) {
            return Err(SchedulerError::IntervalOutOfRange {
                ms,
                min: self.bounds.min_ms,
                max: self.bounds.max_ms,
            });
        }
        self.interval_ms = ms;
        Ok(())
    }

    /// Queue application data. Returns the uplink dropped to make room, if any.
    pub fn enqueue(&mut self, port: u8, payload: Vec<u8>, now_ms: u64) -> Option<QueuedUplink> {
        let dropped = if self.uplinks.len() >= self.capacity {
            let oldest = self.uplinks.pop_front();
            warn!("Uplink queue full, dropping oldest frame");
            oldest
        } else {
            None
        };
        self.uplinks
            .push_back(QueuedUplink::new(port, payload, UplinkKind::Regular, now_ms));
        dropped
    }

    /// Queue a command response ahead of regular data.
    pub fn enqueue_response(
        &mut self,
        port: u8,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.push_response(QueuedUplink::new(port, payload, UplinkKind::Response, now_ms))
    }

    /// Queue the acknowledgement of a REBOOT command.
    pub fn enqueue_restart_ack(
        &mut self,
        port: u8,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.push_response(QueuedUplink::new(port, payload, UplinkKind::RestartAck, now_ms))
    }

    fn push_response(&mut self, uplink: QueuedUplink) -> Result<(), SchedulerError> {
        if self.responses.len() >= RESPONSE_QUEUE_CAPACITY {
            warn!("Response queue full, refusing response on port {}", uplink.port());
            return Err(SchedulerError::ResponseQueueFull);
        }
        self.responses.push_back(uplink);
        Ok(())
    }

    /// Whether the interval since the last transmission has passed.
    pub fn interval_elapsed(&self, now_ms: u64) -> bool {
        match self.last_transmission_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= u64::from(self.interval_ms),
        }
    }

    /// Milliseconds until the next regular uplink may go out.
    pub fn time_until_due(&self, now_ms: u64) -> u64 {
        match self.last_transmission_ms {
            None => 0,
            Some(last) => (last + u64::from(self.interval_ms)).saturating_sub(now_ms),
        }
    }

    /// Take the next uplink to send, if one is due.
    ///
    /// `duty_cycle_ok` is the admission check for this instant; when it is
    /// false nothing is taken and queued uplinks stay put.
    pub fn next_due(&mut self, now_ms: u64, duty_cycle_ok: bool) -> Option<QueuedUplink> {
        self.purge_expired(now_ms);
        if !duty_cycle_ok {
            if !self.is_empty() {
                debug!("Uplink deferred by duty cycle");
            }
            return None;
        }
        if let Some(response) = self.responses.pop_front() {
            return Some(response);
        }
        if self.interval_elapsed(now_ms) {
            return self.uplinks.pop_front();
        }
        None
    }

    /// The uplink [`next_due`](Self::next_due) would hand out if the duty
    /// cycle allowed it. Expired uplinks are dropped first.
    pub fn peek_due(&mut self, now_ms: u64) -> Option<&QueuedUplink> {
        self.purge_expired(now_ms);
        if let Some(response) = self.responses.front() {
            return Some(response);
        }
        if self.interval_elapsed(now_ms) {
            return self.uplinks.front();
        }
        None
    }

    /// Record the start of a transmission.
    pub fn mark_transmitted(&mut self, now_ms: u64) {
        self.last_transmission_ms = Some(now_ms);
    }

    pub fn last_transmission_ms(&self) -> Option<u64> {
        self.last_transmission_ms
    }

    pub fn len(&self) -> usize {
        self.responses.len() + self.uplinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&mut self, now_ms: u64) {
        let ttl = self.ttl_ms;
        let before = self.len();
        self.uplinks.retain(|u| !u.is_expired(now_ms, ttl));
        self.responses.retain(|u| !u.is_expired(now_ms, ttl));
        let expired = before - self.len();
        if expired > 0 {
            debug!("Dropped {} expired uplink(s)", expired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TransmitScheduler {
        TransmitScheduler::new(IntervalBounds::default(), DEFAULT_INTERVAL_MS).unwrap()
    }

    #[test]
    fn test_interval_bounds_enforced() {
        let mut s = scheduler();
        assert_eq!(
            s.set_interval(9_999),
            Err(SchedulerError::IntervalOutOfRange {
                ms: 9_999,
                min: MIN_INTERVAL_MS,
                max: MAX_INTERVAL_MS
            })
        );
        assert!(s.set_interval(3_600_001).is_err());
        assert_eq!(s.interval_ms(), DEFAULT_INTERVAL_MS);
        assert!(s.set_interval(10_000).is_ok());
        assert_eq!(s.interval_ms(), 10_000);
    }

    #[test]
    fn test_new_rejects_bad_initial_interval() {
        assert!(TransmitScheduler::new(IntervalBounds::default(), 5).is_err());
    }

    #[test]
    fn test_first_uplink_goes_immediately() {
        let mut s = scheduler();
        s.enqueue(1, vec![1], 0);
        assert!(s.next_due(0, true).is_some());
    }

    #[test]
    fn test_waits_for_interval() {
        let mut s = scheduler();
        s.mark_transmitted(1_000);
        s.enqueue(1, vec![1], 1_000);
        assert!(s.next_due(60_999, true).is_none());
        assert_eq!(s.time_until_due(60_000), 1_000);
        assert!(s.next_due(61_000, true).is_some());
    }

    #[test]
    fn test_duty_cycle_blocks_everything() {
        let mut s = scheduler();
        s.enqueue(1, vec![1], 0);
        s.enqueue_response(3, vec![0x80], 0).unwrap();
        assert!(s.next_due(0, false).is_none());
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_responses_skip_interval_and_go_first() {
        let mut s = scheduler();
        s.mark_transmitted(0);
        s.enqueue(1, vec![1], 0);
        s.enqueue_response(3, vec![0x80], 0).unwrap();
        let next = s.next_due(5, true).unwrap();
        assert_eq!(next.kind(), UplinkKind::Response);
        assert_eq!(next.port(), 3);
        assert!(s.next_due(5, true).is_none());
    }

    #[test]
    fn test_peek_matches_next_due() {
        let mut s = scheduler();
        s.mark_transmitted(0);
        s.enqueue(1, vec![1], 0);
        assert!(s.peek_due(10).is_none());
        s.enqueue_restart_ack(3, vec![0x84], 10).unwrap();
        assert_eq!(s.peek_due(10).map(|u| u.kind()), Some(UplinkKind::RestartAck));
        assert_eq!(s.len(), 2);
        assert_eq!(s.next_due(10, true).unwrap().kind(), UplinkKind::RestartAck);
        assert_eq!(s.peek_due(60_000).map(|u| u.payload().to_vec()), Some(vec![1]));
    }

    #[test]
    fn test_response_queue_is_bounded() {
        let mut s = scheduler();
        for i in 0..RESPONSE_QUEUE_CAPACITY {
            s.enqueue_response(3, vec![i as u8], 0).unwrap();
        }
        assert_eq!(
            s.enqueue_response(3, vec![0xFF], 0),
            Err(SchedulerError::ResponseQueueFull)
        );
        assert_eq!(
            s.enqueue_restart_ack(3, vec![0x84], 0),
            Err(SchedulerError::ResponseQueueFull)
        );
        assert_eq!(s.len(), RESPONSE_QUEUE_CAPACITY);
        assert_eq!(s.next_due(0, true).unwrap().payload(), &[0]);
        assert!(s.enqueue_response(3, vec![0xFF], 0).is_ok());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut s = scheduler().with_queue_limits(2, UPLINK_TTL_MS);
        assert!(s.enqueue(1, vec![1], 0).is_none());
        assert!(s.enqueue(1, vec![2], 0).is_none());
        let dropped = s.enqueue(1, vec![3], 0).unwrap();
        assert_eq!(dropped.payload(), &[1]);
        assert_eq!(s.next_due(0, true).unwrap().payload(), &[2]);
    }

    #[test]
    fn test_expired_uplinks_are_dropped() {
        let mut s = scheduler();
        s.enqueue(1, vec![1], 0);
        assert!(s.next_due(UPLINK_TTL_MS + 1, true).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_uplink_expiry_boundary() {
        let uplink = QueuedUplink::new(1, vec![], UplinkKind::Regular, 100);
        assert!(!uplink.is_expired(100 + UPLINK_TTL_MS, UPLINK_TTL_MS));
        assert!(uplink.is_expired(101 + UPLINK_TTL_MS, UPLINK_TTL_MS));
    }
}
