//! LoRa time-on-air estimation.
//!
//! Uses the formula from the Semtech SX126x datasheet (Section 6.1.4). The
//! manager charges the duty-cycle window with [`uplink_airtime_ms`], which
//! adds the LoRaWAN MAC overhead to the application payload.
//!
//! # Example
//!
//! ```
//! use lpwan_manager::lora::{uplink_airtime_ms, Region};
//!
//! let params = Region::Eu868.lora_params(5).unwrap();
//! let airtime = uplink_airtime_ms(21, &params);
//! println!("21-byte telemetry frame at DR5 takes {} ms", airtime);
//! ```

use super::config::LORAWAN_OVERHEAD_BYTES;

/// LoRa modulation parameters for airtime calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoRaParams {
    /// Spreading factor (7-12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz (125000, 250000 or 500000)
    pub bandwidth_hz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    /// Preamble length in symbols
    pub preamble_symbols: u8,
    /// Whether explicit header mode is used
    pub explicit_header: bool,
    /// Whether CRC is enabled
    pub crc_enabled: bool,
}

impl Default for LoRaParams {
    /// LoRaWAN uplink defaults: SF7/125 kHz, CR 4/5, 8-symbol preamble.
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            preamble_symbols: 8,
            explicit_header: true,
            crc_enabled: true,
        }
    }
}

impl LoRaParams {
    /// Low data rate optimization is mandated when a symbol lasts longer
    /// than 16 ms (SF11/SF12 at 125 kHz).
    pub fn low_data_rate_optimize(&self) -> bool {
        self.symbol_duration_us() > 16_000
    }

    /// Symbol duration in microseconds: 2^SF / BW.
    pub fn symbol_duration_us(&self) -> u64 {
        let bw = self.bandwidth_hz as u64;
        if bw == 0 {
            return 0;
        }
        (1u64 << self.spreading_factor) * 1_000_000 / bw
    }
}

/// Airtime of a PHY payload of `payload_bytes` in microseconds.
pub fn calculate_airtime_us(payload_bytes: usize, params: &LoRaParams) -> u64 {
    let sf = params.spreading_factor as f64;
    let bw = params.bandwidth_hz as f64;
    if bw == 0.0 {
        return 0;
    }

    let t_sym_us = (2.0_f64.powf(sf) / bw) * 1_000_000.0;
    let t_preamble_us = (params.preamble_symbols as f64 + 4.25) * t_sym_us;

    let de = if params.low_data_rate_optimize() { 1.0 } else { 0.0 };
    let h = if params.explicit_header { 0.0 } else { 1.0 };
    let crc_bits = if params.crc_enabled { 16.0 } else { 0.0 };

    // 8*PL - 4*SF + 28 + 16*CRC - 20*H
    let numerator = 8.0 * payload_bytes as f64 - 4.0 * sf + 28.0 + crc_bits - 20.0 * h;
    let denominator = 4.0 * (sf - 2.0 * de);

    let payload_symbols = if denominator > 0.0 {
        8.0 + (numerator / denominator).ceil().max(0.0) * params.coding_rate as f64
    } else {
        8.0
    };

    (t_preamble_us + payload_symbols * t_sym_us) as u64
}

/// Airtime in milliseconds (convenience wrapper).
pub fn calculate_airtime_ms(payload_bytes: usize, params: &LoRaParams) -> f64 {
    calculate_airtime_us(payload_bytes, params) as f64 / 1000.0
}

/// Airtime charged for one uplink of an application payload, rounded up to
/// whole milliseconds.
pub fn uplink_airtime_ms(app_payload_bytes: usize, params: &LoRaParams) -> u32 {
    let us = calculate_airtime_us(app_payload_bytes + LORAWAN_OVERHEAD_BYTES, params);
    us.div_ceil(1000).min(u32::MAX as u64) as u32
}
