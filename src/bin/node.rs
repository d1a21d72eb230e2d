//! Host simulation node.
//!
//! Drives the communication manager against the simulated radio with the
//! system clock, queuing a synthetic telemetry record every transmit interval
//! and logging diagnostics as JSON.
//!
//! - `cargo run --bin node` - built-in demo configuration (OTAA, EU868)
//! - `cargo run --bin node -- config.json` - configuration from a file
//!
//! `RUST_LOG=debug` shows every scheduling decision.

use log::{error, info, warn};
use lpwan_manager::config::ManagerConfig;
use lpwan_manager::downlink::commands::id;
use lpwan_manager::lora::{JoinBehavior, SimulatedRadio};
use lpwan_manager::packet::{Frame, StatusFlags, TelemetryRecord, PORT_COMMAND};
use lpwan_manager::{BatteryReading, LpwanManager, ManagerEvent, SystemClock};
use rand_core::{OsRng, RngCore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often the manager is ticked.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// How often diagnostics are logged.
const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(30);

const DEMO_CONFIG: &str = r#"{
    "region": "eu868",
    "interval_ms": 15000,
    "activation": {
        "mode": "otaa",
        "dev_eui": "70B3D57ED0000001",
        "join_eui": "0000000000000000",
        "app_key": "2B7E151628AED2A6ABF7158809CF4F3C"
    }
}"#;

fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn load_config() -> Result<ManagerConfig, lpwan_manager::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            ManagerConfig::load(path)
        }
        None => {
            info!("No configuration file given, using demo configuration");
            ManagerConfig::from_json_str(DEMO_CONFIG)
        }
    }
}

/// Synthetic sensor readings with a little jitter.
fn sample_telemetry(uptime_s: u32, battery_pct: u8) -> Frame {
    let jitter = (OsRng.next_u32() % 100) as f32 / 100.0;
    let mut flags = StatusFlags::SENSOR_OK;
    if battery_pct < 20 {
        flags |= StatusFlags::LOW_BATTERY;
    }
    Frame::Telemetry(TelemetryRecord::from_readings(
        uptime_s,
        21.5 + jitter,
        48.0 + jitter * 4.0,
        1013.2,
        12_500,
        42,
        flags,
        battery_pct,
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== LPWAN node starting ===");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let interval = Duration::from_millis(u64::from(config.interval_ms));

    let radio = SimulatedRadio::new(JoinBehavior::Accept([0x26, 0x01, 0x1B, 0x5F]));
    let mut manager = match LpwanManager::new(config, radio, SystemClock::new()) {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = manager.connect() {
        warn!("Initial connect failed: {}", e);
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut telemetry = tokio::time::interval(interval);
    let mut diagnostics = tokio::time::interval(DIAGNOSTICS_INTERVAL);
    let mut battery_pct: u8 = 100;
    let mut uptime_s: u32 = 0;
    let mut records: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                for event in manager.tick() {
                    match event {
                        ManagerEvent::Joined { success: true } => {
                            info!("Joined, dev_addr {:02X?}", manager.dev_addr());
                        }
                        ManagerEvent::Joined { success: false } => {
                            warn!("Join failed, retrying");
                            if let Err(e) = manager.rejoin() {
                                warn!("Rejoin failed: {}", e);
                            }
                        }
                        ManagerEvent::TransmitComplete { port, success } => {
                            info!("Uplink on port {} {}", port, if success { "delivered" } else { "dropped" });
                        }
                        ManagerEvent::Downlink { port, payload, rssi } => {
                            info!("Downlink on port {} ({} dBm): {:02X?}", port, rssi, payload);
                        }
                        ManagerEvent::Error(code) => warn!("Manager error: {}", code),
                        ManagerEvent::RestartRequested => {
                            info!("Restart requested by network");
                            cancel.cancel();
                        }
                    }
                }
            }
            _ = telemetry.tick() => {
                uptime_s = uptime_s.saturating_add(interval.as_secs() as u32);
                battery_pct = battery_pct.saturating_sub(1).max(5);
                manager.update_battery(BatteryReading::new(battery_pct, 3.3 + f32::from(battery_pct) / 100.0));
                let frame = sample_telemetry(uptime_s, battery_pct);
                if let Err(e) = manager.queue_frame(&frame) {
                    warn!("Telemetry not queued: {}", e);
                }
                records += 1;
                // Every fourth record the network asks for status.
                if records % 4 == 0 {
                    manager.radio_mut().queue_downlink(PORT_COMMAND, vec![id::GET_STATUS]);
                }
            }
            _ = diagnostics.tick() => {
                info!("Diagnostics: {}", manager.diagnostics().to_json());
            }
        }
    }

    manager.disconnect();
    info!("Final statistics: {}", manager.diagnostics().to_json());
}
