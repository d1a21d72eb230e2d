//! Downlink command execution.
//!
//! The processor validates a command against the device limits, applies it
//! to [`DeviceConfig`] and returns the response together with the side
//! effect the manager still has to carry out (push radio parameters, reset
//! counters, restart).

use super::commands::{Command, ErrorCode, Response, StatusReport};
use crate::lora::{RadioParams, Region};
use crate::stats::Statistics;
use log::{debug, info, warn};
use std::collections::VecDeque;

/// Pending downlink frames kept between ticks.
pub const COMMAND_QUEUE_CAPACITY: usize = 10;

/// Mutable device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub interval_ms: u32,
    pub radio: RadioParams,
    pub led_enabled: bool,
    pub alarm_enabled: bool,
}

/// Latest battery measurement supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryReading {
    pub percent: u8,
    /// Voltage in tenths of a volt (42 = 4.2 V).
    pub decivolts: u8,
}

impl BatteryReading {
    pub fn new(percent: u8, volts: f32) -> Self {
        Self {
            percent: percent.min(100),
            decivolts: (volts * 10.0).round() as u8,
        }
    }
}

/// Limits a command is validated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLimits {
    pub region: Region,
    pub min_interval_ms: u32,
    pub max_interval_ms: u32,
}

/// Work left for the caller after a command was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    IntervalChanged(u32),
    RadioParamsChanged(RadioParams),
    StatsCleared,
    RestartRequested,
}

/// Result of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub response: Response,
    pub effect: Option<Effect>,
}

impl CommandOutcome {
    fn respond(response: Response) -> Self {
        Self {
            response,
            effect: None,
        }
    }

    fn ack(effect: Effect) -> Self {
        Self {
            response: Response::Ack,
            effect: Some(effect),
        }
    }

    fn error(code: ErrorCode) -> Self {
        Self::respond(Response::Error(code))
    }
}

/// Applies downlink commands.
#[derive(Debug, Clone, Copy)]
pub struct CommandProcessor {
    limits: CommandLimits,
}

impl CommandProcessor {
    pub fn new(limits: CommandLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &CommandLimits {
        &self.limits
    }

    /// Decode and execute one raw downlink frame.
    ///
    /// Configuration is only touched when the command is valid.
    pub fn process(
        &self,
        frame: &[u8],
        config: &mut DeviceConfig,
        stats: &Statistics,
        battery: BatteryReading,
    ) -> CommandOutcome {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(code) => {
                warn!(
                    "Rejected downlink {:02X?}: {}",
                    &frame[..frame.len().min(4)],
                    code
                );
                return CommandOutcome::error(code);
            }
        };
        debug!("Executing {:?}", command);
        self.execute(command, config, stats, battery)
    }

    fn execute(
        &self,
        command: Command,
        config: &mut DeviceConfig,
        stats: &Statistics,
        battery: BatteryReading,
    ) -> CommandOutcome {
        match command {
            Command::Ping => CommandOutcome::respond(Response::Ack),
            Command::SetInterval(ms) => {
                if !(self.limits.min_interval_ms..=self.limits.max_interval_ms).contains(&ms) {
                    warn!(
                        "Interval {} ms outside [{}, {}]",
                        ms, self.limits.min_interval_ms, self.limits.max_interval_ms
                    );
                    return CommandOutcome::error(ErrorCode::InvalidParameter);
                }
                info!("Transmit interval set to {} ms", ms);
                config.interval_ms = ms;
                CommandOutcome::ack(Effect::IntervalChanged(ms))
            }
            Command::SetDataRate(dr) => {
                if !self.limits.region.is_valid_data_rate(dr) {
                    warn!("Data rate DR{} not valid in {:?}", dr, self.limits.region);
                    return CommandOutcome::error(ErrorCode::InvalidParameter);
                }
                info!("Data rate set to DR{}", dr);
                config.radio.data_rate = dr;
                CommandOutcome::ack(Effect::RadioParamsChanged(config.radio))
            }
            Command::SetTxPower(dbm) => {
                if !self.limits.region.is_valid_tx_power(dbm) {
                    warn!("TX power {} dBm not valid in {:?}", dbm, self.limits.region);
                    return CommandOutcome::error(ErrorCode::InvalidParameter);
                }
                info!("TX power set to {} dBm", dbm);
                config.radio.tx_power_dbm = dbm;
                CommandOutcome::ack(Effect::RadioParamsChanged(config.radio))
            }
            Command::SetAdr(enabled) => {
                info!("ADR {}", if enabled { "enabled" } else { "disabled" });
                config.radio.adr = enabled;
                CommandOutcome::ack(Effect::RadioParamsChanged(config.radio))
            }
            Command::SetLed(enabled) => {
                config.led_enabled = enabled;
                CommandOutcome::respond(Response::Ack)
            }
            Command::SetAlarm(enabled) => {
                config.alarm_enabled = enabled;
                CommandOutcome::respond(Response::Ack)
            }
            Command::Reboot => {
                info!("Reboot requested");
                CommandOutcome::ack(Effect::RestartRequested)
            }
            Command::GetStatus => CommandOutcome::respond(Response::Status(StatusReport {
                interval_ms: config.interval_ms,
                data_rate: config.radio.data_rate,
                tx_power_dbm: config.radio.tx_power_dbm,
                adr: config.radio.adr,
                led: config.led_enabled,
                alarm: config.alarm_enabled,
                tx_count: stats.tx_count,
                rx_count: stats.rx_count,
            })),
            Command::GetBattery => CommandOutcome::respond(Response::Battery {
                percent: battery.percent,
                decivolts: battery.decivolts,
            }),
            Command::ClearStats => {
                info!("Statistics cleared");
                CommandOutcome::ack(Effect::StatsCleared)
            }
        }
    }
}

/// Bounded FIFO of raw downlink frames.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::with_capacity(COMMAND_QUEUE_CAPACITY)
    }
}

impl CommandQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame; a full queue rejects it with `BufferOverflow`.
    pub fn push(&mut self, frame: Vec<u8>) -> Result<(), ErrorCode> {
        if self.frames.len() >= self.capacity {
            warn!("Command queue full, dropping downlink");
            return Err(ErrorCode::BufferOverflow);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
