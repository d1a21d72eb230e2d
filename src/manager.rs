//! Communication manager.
//!
//! [`LpwanManager`] owns the radio, the session, the duty-cycle window and
//! the uplink queue. The host drives it by calling [`LpwanManager::tick`]
//! from its main loop and reacting to the returned [`ManagerEvent`]s.
//!
//! One tick:
//! 1. drain radio events (join results, downlinks, link loss)
//! 2. advance the join state machine (timeouts, automatic retries)
//! 3. execute queued downlink commands in arrival order
//! 4. pick the pending retry or the next due uplink, gated by the duty cycle
//! 5. make at most one transmission attempt
//! 6. request a restart once a REBOOT acknowledgement is done or overdue
//!
//! # Example
//!
//! ```
//! use lpwan_manager::config::ManagerConfig;
//! use lpwan_manager::lora::SimulatedRadio;
//! use lpwan_manager::{LpwanManager, ManagerEvent, ManualClock};
//!
//! let json = r#"{"activation": {"mode": "abp", "dev_addr": "26011BDA",
//!     "nwk_s_key": "000102030405060708090A0B0C0D0E0F",
//!     "app_s_key": "F0E0D0C0B0A090807060504030201000"}}"#;
//! let config = ManagerConfig::from_json_str(json).unwrap();
//! let clock = ManualClock::new(0);
//! let mut manager = LpwanManager::new(config, SimulatedRadio::default(), clock.clone()).unwrap();
//!
//! manager.connect().unwrap();
//! manager.queue_uplink(1, vec![0x01, 0x02]).unwrap();
//! let events = manager.tick();
//! assert!(events.contains(&ManagerEvent::TransmitComplete { port: 1, success: true }));
//! ```

use crate::clock::Clock;
use crate::config::{AirtimeAccounting, ConfigError, ManagerConfig};
use crate::downlink::{
    BatteryReading, CommandLimits, CommandProcessor, CommandQueue, DeviceConfig, Effect, ErrorCode,
    Response,
};
use crate::lora::{
    uplink_airtime_ms, DutyCycleTracker, Radio, RadioError, RadioEvent, RadioParams,
    RetryDecision, RetryPolicy, TransmissionAttempt, MAX_UPLINK_PAYLOAD,
};
use crate::packet::{Frame, StatusRecord, PORT_COMMAND};
use crate::scheduler::{QueuedUplink, SchedulerError, TransmitScheduler, UplinkKind};
use crate::session::{Session, SessionError, SessionEvent, SessionState};
use crate::stats::{Diagnostics, Statistics};
use log::{debug, error, info, warn};

/// Event reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A join finished. `success: false` means retries are exhausted.
    Joined { success: bool },
    /// An uplink was delivered or dropped after its last retry.
    TransmitComplete { port: u8, success: bool },
    /// Application data received.
    Downlink { port: u8, payload: Vec<u8>, rssi: i16 },
    /// Something the host should know about; the manager stays usable.
    Error(ErrorCode),
    /// A REBOOT acknowledgement was sent, given up on, or timed out; the
    /// host should restart.
    RestartRequested,
}

#[derive(Debug)]
struct InFlight {
    uplink: QueuedUplink,
    attempt: TransmissionAttempt,
}

/// LoRaWAN communication manager for one device.
pub struct LpwanManager<R: Radio, C: Clock> {
    radio: R,
    clock: C,
    config: ManagerConfig,
    session: Session,
    scheduler: TransmitScheduler,
    duty_cycle: DutyCycleTracker,
    retry_policy: RetryPolicy,
    processor: CommandProcessor,
    device: DeviceConfig,
    commands: CommandQueue,
    stats: Statistics,
    battery: BatteryReading,
    in_flight: Option<InFlight>,
    pending_events: Vec<ManagerEvent>,
    /// Set while a REBOOT acknowledgement is outstanding.
    restart_deadline_ms: Option<u64>,
    started_ms: u64,
}

impl<R: Radio, C: Clock> LpwanManager<R, C> {
    /// Build a manager from a validated configuration.
    pub fn new(config: ManagerConfig, mut radio: R, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now_ms();

        let scheduler = TransmitScheduler::new(config.interval_bounds(), config.interval_ms)
            .map_err(|_| ConfigError::InvalidConfig("interval_ms out of bounds"))?
            .with_queue_limits(config.uplink_queue_capacity, config.uplink_ttl_ms);
        let duty_cycle = DutyCycleTracker::new(
            config.duty_cycle_limit_pct(),
            config.duty_cycle_window_ms,
            now,
        );
        let processor = CommandProcessor::new(CommandLimits {
            region: config.region,
            min_interval_ms: config.min_interval_ms,
            max_interval_ms: config.max_interval_ms,
        });
        let device = DeviceConfig {
            interval_ms: config.interval_ms,
            radio: config.radio_params(),
            led_enabled: false,
            alarm_enabled: false,
        };
        if let Err(e) = radio.configure(&device.radio) {
            warn!("Initial radio configuration failed: {}", e);
        }

        info!(
            "LPWAN manager ready: {:?} ({} channels), DR{}, {} dBm, interval {} ms, duty cycle {}%",
            config.region,
            config.region.channel_count(),
            device.radio.data_rate,
            device.radio.tx_power_dbm,
            device.interval_ms,
            config.duty_cycle_limit_pct()
        );

        Ok(Self {
            session: Session::new(config.activation.to_mode(), config.join_policy()),
            retry_policy: config.retry_policy(),
            radio,
            clock,
            config,
            scheduler,
            duty_cycle,
            processor,
            device,
            commands: CommandQueue::default(),
            stats: Statistics::default(),
            battery: BatteryReading::default(),
            in_flight: None,
            pending_events: Vec::new(),
            restart_deadline_ms: None,
            started_ms: now,
        })
    }

    /// Join the network (OTAA) or activate the stored session (ABP).
    ///
    /// For ABP the `Joined` event is delivered by the next [`tick`](Self::tick).
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let now = self.clock.now_ms();
        let result = self.session.connect(&mut self.radio, now);
        self.sync_join_attempts();
        if result? {
            self.pending_events.push(ManagerEvent::Joined { success: true });
        }
        Ok(())
    }

    /// Leave the network. Any in-flight uplink is discarded.
    pub fn disconnect(&mut self) {
        self.session.disconnect(&mut self.radio);
        if let Some(flight) = self.in_flight.take() {
            debug!("Discarding in-flight uplink on port {}", flight.uplink.port());
        }
    }

    /// Disconnect and connect again immediately.
    pub fn rejoin(&mut self) -> Result<(), SessionError> {
        if let Some(flight) = self.in_flight.take() {
            debug!("Discarding in-flight uplink on port {}", flight.uplink.port());
        }
        let now = self.clock.now_ms();
        let result = self.session.rejoin(&mut self.radio, now);
        self.sync_join_attempts();
        if result? {
            self.pending_events.push(ManagerEvent::Joined { success: true });
        }
        Ok(())
    }

    /// Queue application data for the next transmit slot.
    pub fn queue_uplink(&mut self, port: u8, payload: Vec<u8>) -> Result<(), RadioError> {
        if port == 0 || port > 223 {
            return Err(RadioError::InvalidPort(port));
        }
        if payload.len() > MAX_UPLINK_PAYLOAD {
            return Err(RadioError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_UPLINK_PAYLOAD,
            });
        }
        let now = self.clock.now_ms();
        if self.scheduler.enqueue(port, payload, now).is_some() {
            debug!("Oldest queued uplink dropped");
        }
        Ok(())
    }

    /// Encode a record and queue it on its port.
    pub fn queue_frame(&mut self, frame: &Frame) -> Result<(), RadioError> {
        self.queue_uplink(frame.port(), frame.encode())
    }

    /// Current device status as an uplink record.
    pub fn status_frame(&self) -> Frame {
        let uptime_ms = self.clock.now_ms().saturating_sub(self.started_ms);
        Frame::Status(StatusRecord {
            uptime_s: u32::try_from(uptime_ms / 1000).unwrap_or(u32::MAX),
            tx_count: self.stats.tx_count,
            rx_count: self.stats.rx_count,
            data_rate: self.device.radio.data_rate,
            battery_pct: self.battery.percent,
        })
    }

    /// Advance the manager. Never blocks beyond one radio send.
    pub fn tick(&mut self) -> Vec<ManagerEvent> {
        let now = self.clock.now_ms();
        let mut events = std::mem::take(&mut self.pending_events);

        self.drain_radio_events(now, &mut events);

        if let Some(event) = self.session.poll(&mut self.radio, now) {
            self.on_session_event(event, &mut events);
        }
        self.sync_join_attempts();

        self.process_commands(now, &mut events);

        if self.session.is_connected() {
            self.select_uplink(now);
            self.transmit(now, &mut events);
        }

        if self.restart_deadline_ms.is_some_and(|deadline| now >= deadline) {
            warn!("REBOOT acknowledgement not sent in time, restarting anyway");
            self.finish_restart(&mut events);
        }

        events
    }

    fn drain_radio_events(&mut self, now: u64, events: &mut Vec<ManagerEvent>) {
        while let Some(event) = self.radio.poll_event() {
            match event {
                RadioEvent::Downlink {
                    port,
                    payload,
                    rssi,
                    snr,
                } => {
                    self.stats.record_rx();
                    debug!(
                        "Downlink on port {}: {} bytes, RSSI {} dBm, SNR {} dB",
                        port,
                        payload.len(),
                        rssi,
                        snr
                    );
                    if port == PORT_COMMAND {
                        if let Err(code) = self.commands.push(payload.clone()) {
                            self.queue_response(Response::Error(code), now, events);
                        }
                    }
                    events.push(ManagerEvent::Downlink {
                        port,
                        payload,
                        rssi,
                    });
                }
                other => {
                    if let Some(session_event) =
                        self.session.on_radio_event(&other, &mut self.radio, now)
                    {
                        self.on_session_event(session_event, events);
                    }
                }
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent, events: &mut Vec<ManagerEvent>) {
        match event {
            SessionEvent::Joined => {
                if let Err(e) = self.radio.configure(&self.device.radio) {
                    warn!("Radio configuration after join failed: {}", e);
                }
                events.push(ManagerEvent::Joined { success: true });
            }
            SessionEvent::JoinFailed { will_retry: true } => {}
            SessionEvent::JoinFailed { will_retry: false } => {
                events.push(ManagerEvent::Joined { success: false });
            }
            SessionEvent::LinkLost => {
                events.push(ManagerEvent::Error(ErrorCode::NotJoined));
            }
        }
    }

    fn process_commands(&mut self, now: u64, events: &mut Vec<ManagerEvent>) {
        while let Some(frame) = self.commands.pop() {
            let outcome =
                self.processor
                    .process(&frame, &mut self.device, &self.stats, self.battery);
            if outcome.effect == Some(Effect::RestartRequested) {
                self.queue_restart_ack(outcome.response, now, events);
                continue;
            }
            self.queue_response(outcome.response, now, events);
            match outcome.effect {
                Some(Effect::IntervalChanged(ms)) => {
                    if let Err(e) = self.scheduler.set_interval(ms) {
                        error!("Scheduler rejected accepted interval: {}", e);
                    }
                }
                Some(Effect::RadioParamsChanged(params)) => self.apply_radio_params(params),
                Some(Effect::StatsCleared) => self.clear_statistics(now),
                Some(Effect::RestartRequested) | None => {}
            }
        }
    }

    fn queue_response(&mut self, response: Response, now: u64, events: &mut Vec<ManagerEvent>) {
        if self
            .scheduler
            .enqueue_response(PORT_COMMAND, response.encode(), now)
            .is_err()
        {
            events.push(ManagerEvent::Error(ErrorCode::BufferOverflow));
        }
    }

    /// Queue the REBOOT acknowledgement and arm the restart deadline.
    fn queue_restart_ack(&mut self, response: Response, now: u64, events: &mut Vec<ManagerEvent>) {
        if self
            .scheduler
            .enqueue_restart_ack(PORT_COMMAND, response.encode(), now)
            .is_err()
        {
            events.push(ManagerEvent::Error(ErrorCode::BufferOverflow));
        }
        let deadline = now.saturating_add(self.config.restart_ack_timeout_ms);
        let deadline = *self.restart_deadline_ms.get_or_insert(deadline);
        info!("Restart pending, acknowledging REBOOT (deadline {} ms)", deadline);
    }

    fn finish_restart(&mut self, events: &mut Vec<ManagerEvent>) {
        if self.restart_deadline_ms.take().is_some() {
            events.push(ManagerEvent::RestartRequested);
        }
    }

    fn select_uplink(&mut self, now: u64) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(payload_len) = self.scheduler.peek_due(now).map(|u| u.payload().len()) else {
            return;
        };
        let airtime = self.airtime_for(payload_len);
        let duty_ok = self.duty_cycle.can_transmit_for(now, airtime);
        if let Some(uplink) = self.scheduler.next_due(now, duty_ok) {
            if uplink.kind() == UplinkKind::Regular {
                self.scheduler.mark_transmitted(now);
            }
            self.in_flight = Some(InFlight {
                uplink,
                attempt: TransmissionAttempt::new(airtime, now),
            });
        }
    }

    fn transmit(&mut self, now: u64, events: &mut Vec<ManagerEvent>) {
        let Some(mut flight) = self.in_flight.take() else {
            return;
        };
        if !flight.attempt.is_due(now) {
            self.in_flight = Some(flight);
            return;
        }

        // Data rate may have changed since the uplink was selected.
        let airtime = self.airtime_for(flight.uplink.payload().len());
        if !self.duty_cycle.can_transmit_for(now, airtime) {
            debug!(
                "Transmission deferred by duty cycle ({:.2}% used)",
                self.duty_cycle.usage_percent(now)
            );
            self.in_flight = Some(flight);
            return;
        }
        flight.attempt.set_airtime_ms(airtime);
        let port = flight.uplink.port();

        let result = self
            .radio
            .send(port, flight.uplink.payload(), self.config.tx_timeout_ms);
        let success = result.is_ok();
        self.stats.record_attempt(success);
        if success || self.config.airtime_accounting == AirtimeAccounting::PerAttempt {
            self.duty_cycle.record(now, airtime);
        }

        let err = match result {
            Ok(()) => {
                info!(
                    "Uplink on port {} sent ({} bytes, {} ms airtime, attempt {})",
                    port,
                    flight.uplink.payload().len(),
                    airtime,
                    flight.attempt.attempts()
                );
                events.push(ManagerEvent::TransmitComplete {
                    port,
                    success: true,
                });
                if flight.uplink.kind() == UplinkKind::RestartAck {
                    self.finish_restart(events);
                }
                return;
            }
            Err(e) => e,
        };

        warn!("Uplink on port {} failed: {}", port, err);
        let decision = match err {
            RadioError::PayloadTooLarge { .. } | RadioError::InvalidPort(_) => RetryDecision::GiveUp,
            _ => flight.attempt.record_failure(&self.retry_policy, now),
        };
        let restart_ack = flight.uplink.kind() == UplinkKind::RestartAck;
        match decision {
            RetryDecision::RetryAfter { .. } => self.in_flight = Some(flight),
            RetryDecision::GiveUp => {
                events.push(ManagerEvent::TransmitComplete {
                    port,
                    success: false,
                });
                if restart_ack {
                    self.finish_restart(events);
                }
            }
        }

        // The network forgot the session; the retry waits for the rejoin.
        if err == RadioError::NotJoined {
            if let Some(event) = self.session.link_lost(&mut self.radio) {
                self.on_session_event(event, events);
            }
        }
    }

    fn airtime_for(&self, payload_len: usize) -> u32 {
        let params = self
            .config
            .region
            .lora_params(self.device.radio.data_rate)
            .unwrap_or_default();
        uplink_airtime_ms(payload_len, &params)
    }

    fn apply_radio_params(&mut self, params: RadioParams) {
        self.device.radio = params;
        if let Err(e) = self.radio.configure(&params) {
            warn!("Radio rejected new parameters: {}", e);
        }
    }

    fn clear_statistics(&mut self, now: u64) {
        self.stats.reset();
        self.session.reset_attempt_counter();
        self.duty_cycle.reset(now);
    }

    fn sync_join_attempts(&mut self) {
        self.stats.join_attempts = self.session.total_attempts();
    }

    /// Change the transmit interval.
    pub fn set_interval(&mut self, ms: u32) -> Result<(), SchedulerError> {
        self.scheduler.set_interval(ms)?;
        self.device.interval_ms = ms;
        Ok(())
    }

    pub fn set_data_rate(&mut self, data_rate: u8) -> Result<(), ConfigError> {
        if !self.config.region.is_valid_data_rate(data_rate) {
            return Err(ConfigError::InvalidConfig("data rate not valid for region"));
        }
        let params = RadioParams {
            data_rate,
            ..self.device.radio
        };
        self.apply_radio_params(params);
        Ok(())
    }

    pub fn set_tx_power(&mut self, dbm: i8) -> Result<(), ConfigError> {
        if !self.config.region.is_valid_tx_power(dbm) {
            return Err(ConfigError::InvalidConfig("tx power not valid for region"));
        }
        let params = RadioParams {
            tx_power_dbm: dbm,
            ..self.device.radio
        };
        self.apply_radio_params(params);
        Ok(())
    }

    pub fn set_adr(&mut self, enabled: bool) {
        let params = RadioParams {
            adr: enabled,
            ..self.device.radio
        };
        self.apply_radio_params(params);
    }

    /// Latest battery measurement, reported by GET_BATTERY and status records.
    pub fn update_battery(&mut self, reading: BatteryReading) {
        self.battery = reading;
    }

    /// Reset counters and the duty-cycle window.
    pub fn reset_statistics(&mut self) {
        let now = self.clock.now_ms();
        self.clear_statistics(now);
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn diagnostics(&mut self) -> Diagnostics {
        let now = self.clock.now_ms();
        Diagnostics {
            stats: self.stats.clone(),
            success_rate_pct: self.stats.success_rate_percent(),
            duty_cycle_usage_pct: self.duty_cycle.usage_percent(now),
            state: self.session.state(),
            data_rate: self.device.radio.data_rate,
            tx_power_dbm: self.device.radio.tx_power_dbm,
            adr: self.device.radio.adr,
            channel_count: self.config.region.channel_count(),
            interval_ms: self.scheduler.interval_ms(),
            queued_uplinks: self.scheduler.len(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn dev_addr(&self) -> Option<[u8; 4]> {
        self.session.dev_addr()
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Whether an uplink is waiting for a retry.
    pub fn has_pending_retry(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued_uplinks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn duty_cycle_usage_percent(&mut self) -> f32 {
        let now = self.clock.now_ms();
        self.duty_cycle.usage_percent(now)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
