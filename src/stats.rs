//! Transmission statistics and diagnostics snapshots.

use crate::session::SessionState;
use serde::Serialize;

/// Link counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Transmission attempts, retries included.
    pub tx_count: u32,
    pub tx_success: u32,
    pub tx_fail: u32,
    /// Downlinks received.
    pub rx_count: u32,
    /// Join attempts.
    pub join_attempts: u32,
}

impl Statistics {
    pub fn record_attempt(&mut self, success: bool) {
        self.tx_count = self.tx_count.wrapping_add(1);
        if success {
            self.tx_success = self.tx_success.wrapping_add(1);
        } else {
            self.tx_fail = self.tx_fail.wrapping_add(1);
        }
    }

    pub fn record_rx(&mut self) {
        self.rx_count = self.rx_count.wrapping_add(1);
    }

    /// Successful attempts as a percentage of all attempts (0 when idle).
    pub fn success_rate_percent(&self) -> f32 {
        if self.tx_count == 0 {
            return 0.0;
        }
        self.tx_success as f32 / self.tx_count as f32 * 100.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time view for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    #[serde(flatten)]
    pub stats: Statistics,
    pub success_rate_pct: f32,
    pub duty_cycle_usage_pct: f32,
    pub state: SessionState,
    pub data_rate: u8,
    pub tx_power_dbm: i8,
    pub adr: bool,
    /// Uplink channels in the region's default plan.
    pub channel_count: u8,
    pub interval_ms: u32,
    pub queued_uplinks: usize,
}

impl Diagnostics {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
