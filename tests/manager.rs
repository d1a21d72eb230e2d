//! End-to-end behaviour of the manager against the simulated radio.

use lpwan_manager::config::{ActivationConfig, HexBytes, ManagerConfig};
use lpwan_manager::lora::{JoinBehavior, RadioError, RadioEvent, SentFrame, SimulatedRadio};
use lpwan_manager::packet::{Frame, PORT_COMMAND, PORT_TELEMETRY};
use lpwan_manager::{ErrorCode, LpwanManager, ManagerEvent, ManualClock, Radio, SessionState};

type Manager = LpwanManager<SimulatedRadio, ManualClock>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn abp() -> ManagerConfig {
    ManagerConfig {
        activation: ActivationConfig::Abp {
            dev_addr: HexBytes::new([0x26, 0x01, 0x1B, 0xDA]),
            nwk_s_key: HexBytes::new([0x11; 16]),
            app_s_key: HexBytes::new([0x22; 16]),
        },
        ..Default::default()
    }
}

fn otaa() -> ManagerConfig {
    ManagerConfig {
        activation: ActivationConfig::Otaa {
            dev_eui: HexBytes::new([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01]),
            join_eui: HexBytes::zero(),
            app_key: HexBytes::new([0x2B; 16]),
        },
        ..Default::default()
    }
}

fn start(config: ManagerConfig, radio: SimulatedRadio) -> (Manager, ManualClock) {
    init_logging();
    let clock = ManualClock::new(0);
    let manager = LpwanManager::new(config, radio, clock.clone()).unwrap();
    (manager, clock)
}

/// ABP manager, connected, with the initial `Joined` event consumed.
fn connected() -> (Manager, ManualClock) {
    let (mut m, clock) = start(abp(), SimulatedRadio::default());
    m.connect().unwrap();
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);
    (m, clock)
}

/// Deliver `command` as a downlink and run the tick that answers it.
fn exchange(m: &mut Manager, clock: &ManualClock, command: &[u8]) -> Vec<ManagerEvent> {
    m.radio_mut().inject_event(RadioEvent::Downlink {
        port: PORT_COMMAND,
        payload: command.to_vec(),
        rssi: -90,
        snr: 5,
    });
    clock.advance(100);
    m.tick()
}

fn last_sent(m: &Manager) -> SentFrame {
    m.radio().sent().last().cloned().unwrap()
}

fn command_frames_sent(m: &Manager) -> usize {
    m.radio()
        .sent()
        .iter()
        .filter(|f| f.port == PORT_COMMAND)
        .count()
}

/// ABP with a 90 ms budget per minute, already spent down by one 10-byte uplink.
fn duty_cycle_spent(config: ManagerConfig) -> (Manager, ManualClock) {
    let config = ManagerConfig {
        duty_cycle_limit_pct: Some(0.15),
        duty_cycle_window_ms: 60_000,
        interval_ms: 10_000,
        ..config
    };
    let (mut m, clock) = start(config, SimulatedRadio::default());
    m.connect().unwrap();
    m.tick();
    m.queue_uplink(PORT_TELEMETRY, vec![1; 10]).unwrap();
    m.tick();
    assert_eq!(m.radio().sent().len(), 1);
    (m, clock)
}

#[test]
fn abp_connects_without_joining() {
    let (mut m, _) = start(abp(), SimulatedRadio::default());
    m.connect().unwrap();
    assert_eq!(m.state(), SessionState::Connected);
    assert_eq!(m.dev_addr(), Some([0x26, 0x01, 0x1B, 0xDA]));
    assert!(m.radio().join_nonces().is_empty());
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);
}

#[test]
fn otaa_join_then_first_uplink() {
    let radio = SimulatedRadio::new(JoinBehavior::Accept([0x01, 0x02, 0x03, 0x04]));
    let (mut m, _) = start(otaa(), radio);
    m.connect().unwrap();
    assert_eq!(m.state(), SessionState::Joining);

    m.queue_uplink(PORT_TELEMETRY, vec![0xAA; 8]).unwrap();
    let events = m.tick();
    assert_eq!(
        events,
        vec![
            ManagerEvent::Joined { success: true },
            ManagerEvent::TransmitComplete {
                port: PORT_TELEMETRY,
                success: true
            },
        ]
    );
    assert_eq!(m.dev_addr(), Some([0x01, 0x02, 0x03, 0x04]));
    assert_eq!(m.statistics().join_attempts, 1);
    assert_eq!(m.statistics().tx_success, 1);
}

#[test]
fn otaa_join_gives_up_after_retries() {
    let config = ManagerConfig {
        join_max_retries: 1,
        join_retry_delay_ms: 10_000,
        ..otaa()
    };
    let (mut m, clock) = start(config, SimulatedRadio::new(JoinBehavior::Reject));
    m.connect().unwrap();

    assert!(m.tick().is_empty());
    assert_eq!(m.state(), SessionState::Disconnected);

    clock.advance(10_000);
    assert!(m.tick().is_empty());
    assert_eq!(m.state(), SessionState::Joining);

    clock.advance(1);
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: false }]);

    clock.advance(1_000_000);
    assert!(m.tick().is_empty());
    assert_eq!(m.radio().join_nonces().len(), 2);
}

#[test]
fn duty_cycle_defers_until_window_rolls() {
    let (mut m, clock) = duty_cycle_spent(abp());
    assert!(m.diagnostics().duty_cycle_usage_pct > 0.1);

    // a second 62 ms frame would overrun the 90 ms budget
    m.queue_uplink(PORT_TELEMETRY, vec![2; 10]).unwrap();
    clock.advance(10_000);
    assert!(m.tick().is_empty());
    assert_eq!(m.radio().sent().len(), 1);
    assert_eq!(m.queued_uplinks(), 1);
    assert!(m.duty_cycle_usage_percent() <= 0.15);

    clock.set(60_001);
    let events = m.tick();
    assert!(events.contains(&ManagerEvent::TransmitComplete {
        port: PORT_TELEMETRY,
        success: true
    }));
    assert_eq!(last_sent(&m).payload, vec![2; 10]);
}

#[test]
fn failed_uplink_backs_off_then_gives_up() {
    let (mut m, clock) = connected();
    m.radio_mut().fail_next_sends(10, RadioError::Timeout);
    m.queue_uplink(PORT_TELEMETRY, vec![7; 12]).unwrap();

    assert!(m.tick().is_empty());
    assert_eq!(m.radio().sent().len(), 1);

    // backoffs 1000, 2000, 4000 ms
    for (delay, attempts) in [(1_000, 2), (2_000, 3)] {
        clock.advance(delay - 1);
        assert!(m.tick().is_empty());
        assert_eq!(m.radio().sent().len(), attempts - 1);
        clock.advance(1);
        assert!(m.tick().is_empty());
        assert_eq!(m.radio().sent().len(), attempts);
    }

    clock.advance(3_999);
    m.tick();
    assert_eq!(m.radio().sent().len(), 3);
    clock.advance(1);
    assert_eq!(
        m.tick(),
        vec![ManagerEvent::TransmitComplete {
            port: PORT_TELEMETRY,
            success: false
        }]
    );

    let stats = m.statistics();
    assert_eq!(stats.tx_count, 4);
    assert_eq!(stats.tx_fail, 4);
    assert_eq!(stats.tx_success, 0);
    assert!(!m.has_pending_retry());
}

#[test]
fn retry_succeeds_after_transient_failure() {
    let (mut m, clock) = connected();
    m.radio_mut().fail_next_sends(1, RadioError::NoAck);
    m.queue_uplink(PORT_TELEMETRY, vec![3; 4]).unwrap();
    m.tick();
    clock.advance(1_000);
    assert_eq!(
        m.tick(),
        vec![ManagerEvent::TransmitComplete {
            port: PORT_TELEMETRY,
            success: true
        }]
    );
    assert_eq!(m.statistics().success_rate_percent(), 50.0);
}

#[test]
fn set_interval_downlink_is_acknowledged() {
    let (mut m, clock) = connected();
    m.queue_uplink(PORT_TELEMETRY, vec![1, 2, 3]).unwrap();
    m.radio_mut()
        .queue_downlink(PORT_COMMAND, vec![0x01, 0x10, 0x27, 0x00, 0x00]);
    m.tick();

    clock.advance(100);
    let events = m.tick();
    assert_eq!(
        events,
        vec![
            ManagerEvent::Downlink {
                port: PORT_COMMAND,
                payload: vec![0x01, 0x10, 0x27, 0x00, 0x00],
                rssi: -87
            },
            ManagerEvent::TransmitComplete {
                port: PORT_COMMAND,
                success: true
            },
        ]
    );
    assert_eq!(
        last_sent(&m),
        SentFrame {
            port: PORT_COMMAND,
            payload: vec![0x80]
        }
    );
    assert_eq!(m.device_config().interval_ms, 10_000);
    assert_eq!(m.diagnostics().interval_ms, 10_000);
    assert_eq!(m.statistics().rx_count, 1);
}

#[test]
fn invalid_interval_is_rejected() {
    let (mut m, clock) = connected();
    exchange(&mut m, &clock, &[0x01, 0x88, 0x13, 0x00, 0x00]);
    assert_eq!(last_sent(&m).payload, vec![0xFF, 0x02]);
    assert_eq!(m.device_config().interval_ms, 60_000);
}

#[test]
fn unknown_command_reports_error() {
    let (mut m, clock) = connected();
    let before = *m.device_config();
    exchange(&mut m, &clock, &[0x7E, 0x01]);
    assert_eq!(last_sent(&m).payload, vec![0xFF, 0x01]);
    assert_eq!(*m.device_config(), before);
}

#[test]
fn reboot_acks_and_requests_restart() {
    let (mut m, clock) = connected();
    let events = exchange(&mut m, &clock, &[0x04]);
    assert_eq!(
        events,
        vec![
            ManagerEvent::Downlink {
                port: PORT_COMMAND,
                payload: vec![0x04],
                rssi: -90
            },
            ManagerEvent::TransmitComplete {
                port: PORT_COMMAND,
                success: true
            },
            ManagerEvent::RestartRequested,
        ]
    );
    assert_eq!(last_sent(&m).payload, vec![0x80]);
}

#[test]
fn reboot_waits_for_ack_held_by_duty_cycle() {
    let config = ManagerConfig {
        restart_ack_timeout_ms: 120_000,
        ..abp()
    };
    let (mut m, clock) = duty_cycle_spent(config);

    let events = exchange(&mut m, &clock, &[0x04]);
    assert!(!events.contains(&ManagerEvent::RestartRequested));
    assert_eq!(command_frames_sent(&m), 0);

    clock.set(30_000);
    assert!(m.tick().is_empty());

    clock.set(60_001);
    assert_eq!(
        m.tick(),
        vec![
            ManagerEvent::TransmitComplete {
                port: PORT_COMMAND,
                success: true
            },
            ManagerEvent::RestartRequested,
        ]
    );
    assert_eq!(last_sent(&m).payload, vec![0x80]);

    clock.advance(200_000);
    assert!(m.tick().is_empty());
}

#[test]
fn reboot_restarts_when_ack_is_overdue() {
    let (mut m, clock) = duty_cycle_spent(abp());
    exchange(&mut m, &clock, &[0x04]);

    // default 30 s wait, counted from the command at t=100
    clock.set(30_099);
    assert!(m.tick().is_empty());
    clock.set(30_100);
    assert_eq!(m.tick(), vec![ManagerEvent::RestartRequested]);
    assert_eq!(command_frames_sent(&m), 0);
}

#[test]
fn reboot_restarts_after_ack_gives_up() {
    let (mut m, clock) = connected();
    m.radio_mut().fail_next_sends(4, RadioError::NoAck);
    let events = exchange(&mut m, &clock, &[0x04]);
    assert!(!events.contains(&ManagerEvent::RestartRequested));

    for delay in [1_000, 2_000] {
        clock.advance(delay);
        assert!(m.tick().is_empty());
    }
    clock.advance(4_000);
    assert_eq!(
        m.tick(),
        vec![
            ManagerEvent::TransmitComplete {
                port: PORT_COMMAND,
                success: false
            },
            ManagerEvent::RestartRequested,
        ]
    );
    assert_eq!(command_frames_sent(&m), 4);
}

#[test]
fn get_status_reports_config_and_counters() {
    let (mut m, clock) = connected();
    m.queue_uplink(PORT_TELEMETRY, vec![9]).unwrap();
    m.tick();
    exchange(&mut m, &clock, &[0x05]);

    let payload = last_sent(&m).payload;
    assert_eq!(payload.len(), 18);
    assert_eq!(payload[0], 0x82);
    assert_eq!(&payload[1..5], &60_000u32.to_le_bytes());
    assert_eq!(payload[5], 5); // DR5
    assert_eq!(payload[6], 14); // dBm
    assert_eq!(&payload[7..10], &[1, 0, 0]); // adr, led, alarm
    assert_eq!(&payload[10..14], &1u32.to_le_bytes());
    assert_eq!(&payload[14..18], &1u32.to_le_bytes());
}

#[test]
fn data_rate_command_reconfigures_radio() {
    let (mut m, clock) = connected();
    exchange(&mut m, &clock, &[0x02, 0x03]);
    assert_eq!(last_sent(&m).payload, vec![0x80]);
    assert_eq!(m.radio().params().map(|p| p.data_rate), Some(3));
    assert_eq!(m.diagnostics().data_rate, 3);
}

#[test]
fn clear_stats_resets_counters() {
    let (mut m, clock) = connected();
    m.queue_uplink(PORT_TELEMETRY, vec![1; 20]).unwrap();
    m.tick();
    assert_eq!(m.statistics().tx_count, 1);

    exchange(&mut m, &clock, &[0x0A]);
    // only the ACK sent after the reset is counted
    let stats = m.statistics();
    assert_eq!(stats.tx_count, 1);
    assert_eq!(stats.tx_success, 1);
    assert_eq!(stats.rx_count, 0);
    assert_eq!(last_sent(&m).payload, vec![0x80]);
}

#[test]
fn full_command_queue_reports_overflow() {
    let (mut m, clock) = connected();
    for _ in 0..11 {
        m.radio_mut().inject_event(RadioEvent::Downlink {
            port: PORT_COMMAND,
            payload: vec![0x00],
            rssi: -100,
            snr: 1,
        });
    }
    clock.advance(100);
    m.tick();
    assert_eq!(last_sent(&m).payload, vec![0xFF, 0x04]);
    // ten pings still answered, one per tick
    for _ in 0..10 {
        clock.advance(100);
        m.tick();
    }
    let acks = m
        .radio()
        .sent()
        .iter()
        .filter(|f| f.payload == vec![0x80])
        .count();
    assert_eq!(acks, 10);
}

#[test]
fn held_responses_are_bounded() {
    let (mut m, clock) = duty_cycle_spent(abp());
    for batch in 0..2 {
        for _ in 0..10 {
            m.radio_mut().inject_event(RadioEvent::Downlink {
                port: PORT_COMMAND,
                payload: vec![0x00],
                rssi: -100,
                snr: 1,
            });
        }
        clock.advance(100);
        let overflows = m
            .tick()
            .iter()
            .filter(|e| **e == ManagerEvent::Error(ErrorCode::BufferOverflow))
            .count();
        assert_eq!(overflows, if batch == 0 { 0 } else { 4 });
    }
    assert_eq!(m.queued_uplinks(), 16);
    assert_eq!(command_frames_sent(&m), 0);
}

#[test]
fn application_downlink_is_forwarded() {
    let (mut m, _) = connected();
    m.radio_mut().inject_event(RadioEvent::Downlink {
        port: 10,
        payload: vec![0xDE, 0xAD],
        rssi: -70,
        snr: 9,
    });
    assert_eq!(
        m.tick(),
        vec![ManagerEvent::Downlink {
            port: 10,
            payload: vec![0xDE, 0xAD],
            rssi: -70
        }]
    );
    assert!(m.radio().sent().is_empty());
}

#[test]
fn link_loss_triggers_rejoin() {
    let (mut m, clock) = start(otaa(), SimulatedRadio::default());
    m.connect().unwrap();
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);

    m.radio_mut().inject_event(RadioEvent::LinkDead);
    clock.advance(5_000);
    assert_eq!(m.tick(), vec![ManagerEvent::Error(ErrorCode::NotJoined)]);
    assert_eq!(m.state(), SessionState::Joining);

    clock.advance(1);
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);
    assert_eq!(m.radio().join_nonces().len(), 2);
    assert_eq!(m.statistics().join_attempts, 2);
}

#[test]
fn not_joined_send_failure_rejoins() {
    let (mut m, clock) = start(otaa(), SimulatedRadio::default());
    m.connect().unwrap();
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);

    // the network side forgets the session
    m.radio_mut().reset();
    m.queue_uplink(PORT_TELEMETRY, vec![4; 6]).unwrap();
    clock.advance(100);
    assert_eq!(m.tick(), vec![ManagerEvent::Error(ErrorCode::NotJoined)]);
    assert_eq!(m.state(), SessionState::Disconnected);
    assert!(m.has_pending_retry());

    clock.advance(100);
    assert!(m.tick().is_empty());
    assert_eq!(m.state(), SessionState::Joining);

    clock.advance(100);
    assert_eq!(m.tick(), vec![ManagerEvent::Joined { success: true }]);
    assert_eq!(m.radio().join_nonces().len(), 2);
    assert_eq!(m.statistics().join_attempts, 2);

    // first retry is due 1 s after the failed attempt
    clock.set(1_100);
    assert_eq!(
        m.tick(),
        vec![ManagerEvent::TransmitComplete {
            port: PORT_TELEMETRY,
            success: true
        }]
    );
    assert_eq!(last_sent(&m).payload, vec![4; 6]);
    assert_eq!(m.statistics().tx_fail, 1);
}

#[test]
fn abp_session_reinstalled_after_not_joined() {
    let (mut m, clock) = connected();
    m.radio_mut().push_send_result(Err(RadioError::NotJoined));
    m.queue_uplink(PORT_TELEMETRY, vec![8; 3]).unwrap();
    assert_eq!(m.tick(), vec![ManagerEvent::Error(ErrorCode::NotJoined)]);
    assert_eq!(m.state(), SessionState::Disconnected);
    assert_eq!(m.radio_mut().take_sent().len(), 1);

    clock.advance(1_000);
    assert_eq!(
        m.tick(),
        vec![
            ManagerEvent::Joined { success: true },
            ManagerEvent::TransmitComplete {
                port: PORT_TELEMETRY,
                success: true
            },
        ]
    );
    assert_eq!(
        m.radio_mut().take_sent(),
        vec![SentFrame {
            port: PORT_TELEMETRY,
            payload: vec![8; 3]
        }]
    );
}

#[test]
fn uplinks_wait_while_disconnected() {
    let radio = SimulatedRadio::new(JoinBehavior::Silent);
    let (mut m, clock) = start(otaa(), radio);
    m.connect().unwrap();
    m.queue_uplink(PORT_TELEMETRY, vec![1]).unwrap();
    m.tick();
    assert!(m.radio().sent().is_empty());

    // first join times out, the automatic retry is answered
    m.radio_mut()
        .set_join_behavior(JoinBehavior::Accept([5, 6, 7, 8]));
    clock.set(60_000);
    assert!(m.tick().is_empty());
    assert_eq!(m.state(), SessionState::Disconnected);
    clock.advance(1);
    m.tick();
    assert_eq!(m.state(), SessionState::Joining);

    clock.advance(1);
    let events = m.tick();
    assert_eq!(
        events,
        vec![
            ManagerEvent::Joined { success: true },
            ManagerEvent::TransmitComplete {
                port: PORT_TELEMETRY,
                success: true
            },
        ]
    );
    assert_eq!(m.radio().sent().len(), 1);
}

#[test]
fn status_frame_decodes() {
    let (mut m, clock) = connected();
    m.queue_uplink(PORT_TELEMETRY, vec![1]).unwrap();
    m.tick();
    clock.advance(42_000);

    let frame = m.status_frame();
    let decoded = Frame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded, frame);
    match decoded {
        Frame::Status(status) => {
            assert_eq!(status.uptime_s, 42);
            assert_eq!(status.tx_count, 1);
        }
        other => panic!("expected status, got {:?}", other),
    }
}

#[test]
fn diagnostics_serialize_to_json() {
    let (mut m, _) = connected();
    let json = m.diagnostics().to_json();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["state"], "connected");
    assert_eq!(value["tx_count"], 0);
    assert_eq!(value["interval_ms"], 60_000);
    assert_eq!(value["channel_count"], 8);
}

#[test]
fn config_loads_from_file() {
    let path = std::env::temp_dir().join(format!("lpwan-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{
            "region": "eu868",
            "interval_ms": 30000,
            "max_retries": 5,
            "airtime_accounting": "on_success",
            "activation": {
                "mode": "abp",
                "dev_addr": "26:01:1B:DA",
                "nwk_s_key": "000102030405060708090A0B0C0D0E0F",
                "app_s_key": "F0E0D0C0B0A090807060504030201000"
            }
        }"#,
    )
    .unwrap();

    let config = ManagerConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.interval_ms, 30_000);
    assert_eq!(config.retry_policy().max_retries, 5);
    let (mut m, _) = start(config, SimulatedRadio::default());
    m.connect().unwrap();
    assert_eq!(m.dev_addr(), Some([0x26, 0x01, 0x1B, 0xDA]));
}
