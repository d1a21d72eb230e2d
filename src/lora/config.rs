//! LoRaWAN region configuration and radio parameters.
//!
//! The manager does not know frequency plans. A region only tells it the
//! duty-cycle limit, the channel count, the valid data-rate indices and the
//! allowed transmit power range.

use super::{DutyCycleTracker, LoRaParams};
use serde::{Deserialize, Serialize};

/// Duty-cycle accounting window (1 hour).
pub const DUTY_CYCLE_WINDOW_MS: u64 = 3_600_000;

/// Default transmit power in dBm.
pub const DEFAULT_TX_POWER_DBM: i8 = 14;

/// Default data-rate index (DR5 = SF7/125 kHz in EU868).
pub const DEFAULT_DATA_RATE: u8 = 5;

/// LoRaWAN MAC overhead added to every application payload
/// (MHDR + FHDR + FPort + MIC).
pub const LORAWAN_OVERHEAD_BYTES: usize = 13;

/// Frequency band region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// EU 863-870 MHz band (1% duty cycle)
    Eu868,
    /// US 902-928 MHz band (dwell time limited, no duty cycle)
    Us915,
    /// Australia 915-928 MHz
    Au915,
    /// Asia 920-923 MHz
    As923,
}

impl Region {
    /// Duty cycle limit for this region (percentage).
    pub fn duty_cycle_percent(self) -> f32 {
        match self {
            Self::Eu868 => 1.0,
            Self::Us915 => 100.0,
            Self::Au915 => 100.0,
            Self::As923 => 1.0,
        }
    }

    /// Number of uplink channels in the default channel plan.
    pub fn channel_count(self) -> u8 {
        match self {
            Self::Eu868 => 8,
            Self::Us915 => 72,
            Self::Au915 => 72,
            Self::As923 => 8,
        }
    }

    /// Highest uplink data-rate index.
    pub fn max_data_rate(self) -> u8 {
        match self {
            Self::Us915 => 4,
            Self::Eu868 | Self::Au915 | Self::As923 => 5,
        }
    }

    /// Allowed transmit power in dBm, inclusive.
    pub fn tx_power_range(self) -> (i8, i8) {
        match self {
            Self::Eu868 => (0, 20),
            Self::Us915 | Self::Au915 => (0, 30),
            Self::As923 => (0, 16),
        }
    }

    pub fn is_valid_data_rate(self, data_rate: u8) -> bool {
        data_rate <= self.max_data_rate()
    }

    pub fn is_valid_tx_power(self, dbm: i8) -> bool {
        let (min, max) = self.tx_power_range();
        (min..=max).contains(&dbm)
    }

    /// Modulation parameters for an uplink data-rate index.
    ///
    /// Returns `None` for indices the region does not define.
    pub fn lora_params(self, data_rate: u8) -> Option<LoRaParams> {
        if !self.is_valid_data_rate(data_rate) {
            return None;
        }
        let (spreading_factor, bandwidth_hz) = match self {
            // DR0 = SF10 ... DR3 = SF7 at 125 kHz, DR4 = SF8 at 500 kHz
            Self::Us915 => match data_rate {
                4 => (8, 500_000),
                dr => (10 - dr, 125_000),
            },
            // DR0 = SF12 ... DR5 = SF7 at 125 kHz
            _ => (12 - data_rate, 125_000),
        };
        Some(LoRaParams {
            spreading_factor,
            bandwidth_hz,
            ..LoRaParams::default()
        })
    }

    /// Create a duty-cycle tracker for this region with the standard window.
    pub fn duty_cycle_tracker(self, now_ms: u64) -> DutyCycleTracker {
        DutyCycleTracker::new(self.duty_cycle_percent(), DUTY_CYCLE_WINDOW_MS, now_ms)
    }
}

impl Default for Region {
    fn default() -> Self {
        #[cfg(feature = "region-us915")]
        return Self::Us915;
        #[cfg(feature = "region-au915")]
        return Self::Au915;
        #[cfg(feature = "region-as923")]
        return Self::As923;
        #[cfg(not(any(
            feature = "region-us915",
            feature = "region-au915",
            feature = "region-as923"
        )))]
        Self::Eu868
    }
}

/// Radio parameters the device currently transmits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioParams {
    /// Data-rate index (DR0..DRn for the region).
    pub data_rate: u8,
    /// Transmit power in dBm.
    pub tx_power_dbm: i8,
    /// Adaptive data rate enabled.
    pub adr: bool,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            data_rate: DEFAULT_DATA_RATE,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            adr: true,
        }
    }
}

impl RadioParams {
    /// True if every field is legal for `region`.
    pub fn is_valid_for(&self, region: Region) -> bool {
        region.is_valid_data_rate(self.data_rate) && region.is_valid_tx_power(self.tx_power_dbm)
    }
}
