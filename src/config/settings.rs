//! Manager configuration.
//!
//! Every field has a default, so a JSON file only needs the values that
//! differ (usually just the activation block).
//!
//! # Example
//!
//! ```
//! use lpwan_manager::config::ManagerConfig;
//!
//! let json = r#"{
//!     "region": "eu868",
//!     "interval_ms": 120000,
//!     "activation": {
//!         "mode": "abp",
//!         "dev_addr": "26011BDA",
//!         "nwk_s_key": "000102030405060708090A0B0C0D0E0F",
//!         "app_s_key": "F0E0D0C0B0A090807060504030201000"
//!     }
//! }"#;
//! let config = ManagerConfig::from_json_str(json).unwrap();
//! assert_eq!(config.interval_ms, 120_000);
//! ```

use super::keys::HexBytes;
use crate::lora::{RadioParams, Region, RetryError, RetryPolicy, DUTY_CYCLE_WINDOW_MS};
use crate::scheduler::{
    IntervalBounds, DEFAULT_INTERVAL_MS, MAX_INTERVAL_MS, MIN_INTERVAL_MS, UPLINK_QUEUE_CAPACITY,
    UPLINK_TTL_MS,
};
use crate::session::{AbpSession, ActivationMode, JoinPolicy, OtaaCredentials};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// When airtime is charged to the duty-cycle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirtimeAccounting {
    /// Only successful transmissions are charged.
    OnSuccess,
    /// Every attempt is charged, failed ones included.
    #[default]
    PerAttempt,
}

/// Activation block of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ActivationConfig {
    Otaa {
        dev_eui: HexBytes<8>,
        join_eui: HexBytes<8>,
        app_key: HexBytes<16>,
    },
    Abp {
        dev_addr: HexBytes<4>,
        nwk_s_key: HexBytes<16>,
        app_s_key: HexBytes<16>,
    },
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Otaa {
            dev_eui: HexBytes::zero(),
            join_eui: HexBytes::zero(),
            app_key: HexBytes::zero(),
        }
    }
}

impl ActivationConfig {
    pub fn to_mode(&self) -> ActivationMode {
        match self {
            Self::Otaa {
                dev_eui,
                join_eui,
                app_key,
            } => ActivationMode::Otaa(OtaaCredentials {
                dev_eui: *dev_eui.as_bytes(),
                join_eui: *join_eui.as_bytes(),
                app_key: *app_key.as_bytes(),
            }),
            Self::Abp {
                dev_addr,
                nwk_s_key,
                app_s_key,
            } => ActivationMode::Abp(AbpSession {
                dev_addr: *dev_addr.as_bytes(),
                nwk_s_key: *nwk_s_key.as_bytes(),
                app_s_key: *app_s_key.as_bytes(),
            }),
        }
    }
}

/// All tunables of the communication manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    pub region: Region,
    /// Duty-cycle limit in percent; the region's limit when unset.
    pub duty_cycle_limit_pct: Option<f32>,
    pub duty_cycle_window_ms: u64,

    pub interval_ms: u32,
    pub min_interval_ms: u32,
    pub max_interval_ms: u32,
    pub uplink_queue_capacity: usize,
    pub uplink_ttl_ms: u64,

    pub max_retries: u8,
    pub initial_backoff_ms: u32,
    pub max_backoff_ms: u32,
    pub airtime_accounting: AirtimeAccounting,
    pub tx_timeout_ms: u32,
    /// Longest wait for a REBOOT acknowledgement before restart is requested anyway.
    pub restart_ack_timeout_ms: u64,

    pub join_retry_delay_ms: u64,
    pub join_max_retries: u8,
    pub join_timeout_ms: u64,

    /// Initial data rate; the region's fastest when unset.
    pub data_rate: Option<u8>,
    pub tx_power_dbm: i8,
    pub adr: bool,

    pub activation: ActivationConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let join = JoinPolicy::default();
        let radio = RadioParams::default();
        Self {
            region: Region::default(),
            duty_cycle_limit_pct: None,
            duty_cycle_window_ms: DUTY_CYCLE_WINDOW_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
            min_interval_ms: MIN_INTERVAL_MS,
            max_interval_ms: MAX_INTERVAL_MS,
            uplink_queue_capacity: UPLINK_QUEUE_CAPACITY,
            uplink_ttl_ms: UPLINK_TTL_MS,
            max_retries: retry.max_retries,
            initial_backoff_ms: retry.initial_delay_ms,
            max_backoff_ms: retry.max_delay_ms,
            airtime_accounting: AirtimeAccounting::default(),
            tx_timeout_ms: 30_000,
            restart_ack_timeout_ms: 30_000,
            join_retry_delay_ms: join.retry_delay_ms,
            join_max_retries: join.max_retries,
            join_timeout_ms: join.timeout_ms,
            data_rate: None,
            tx_power_dbm: radio.tx_power_dbm,
            adr: radio.adr,
            activation: ActivationConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Parse JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = self.duty_cycle_limit_pct();
        if !(limit > 0.0 && limit <= 100.0) {
            return Err(ConfigError::InvalidConfig(
                "duty_cycle_limit_pct must be in (0, 100]",
            ));
        }
        if self.duty_cycle_window_ms == 0 {
            return Err(ConfigError::InvalidConfig("duty_cycle_window_ms must be > 0"));
        }
        if self.min_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig("min_interval_ms must be > 0"));
        }
        if self.max_interval_ms < self.min_interval_ms {
            return Err(ConfigError::InvalidConfig(
                "max_interval_ms must be >= min_interval_ms",
            ));
        }
        if !self.interval_bounds().contains(self.interval_ms) {
            return Err(ConfigError::InvalidConfig(
                "interval_ms must be within [min_interval_ms, max_interval_ms]",
            ));
        }
        if self.uplink_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig("uplink_queue_capacity must be > 0"));
        }
        self.retry_policy().validate().map_err(|e| match e {
            RetryError::InvalidConfig(msg) => ConfigError::InvalidConfig(msg),
        })?;
        if self.tx_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig("tx_timeout_ms must be > 0"));
        }
        if self.join_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig("join_timeout_ms must be > 0"));
        }
        let radio = self.radio_params();
        if !self.region.is_valid_data_rate(radio.data_rate) {
            return Err(ConfigError::InvalidConfig("data_rate not valid for region"));
        }
        if !self.region.is_valid_tx_power(radio.tx_power_dbm) {
            return Err(ConfigError::InvalidConfig("tx_power_dbm not valid for region"));
        }
        match &self.activation {
            ActivationConfig::Otaa { app_key, .. } if app_key.is_zero() => {
                Err(ConfigError::InvalidConfig("app_key must not be all zeros"))
            }
            ActivationConfig::Abp {
                nwk_s_key,
                app_s_key,
                ..
            } if nwk_s_key.is_zero() || app_s_key.is_zero() => Err(ConfigError::InvalidConfig(
                "session keys must not be all zeros",
            )),
            _ => Ok(()),
        }
    }

    pub fn duty_cycle_limit_pct(&self) -> f32 {
        self.duty_cycle_limit_pct
            .unwrap_or_else(|| self.region.duty_cycle_percent())
    }

    pub fn interval_bounds(&self) -> IntervalBounds {
        IntervalBounds {
            min_ms: self.min_interval_ms,
            max_ms: self.max_interval_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_ms: self.initial_backoff_ms,
            max_delay_ms: self.max_backoff_ms,
        }
    }

    pub fn join_policy(&self) -> JoinPolicy {
        JoinPolicy {
            retry_delay_ms: self.join_retry_delay_ms,
            max_retries: self.join_max_retries,
            timeout_ms: self.join_timeout_ms,
        }
    }

    pub fn radio_params(&self) -> RadioParams {
        RadioParams {
            data_rate: self.data_rate.unwrap_or_else(|| self.region.max_data_rate()),
            tx_power_dbm: self.tx_power_dbm,
            adr: self.adr,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Reading the file failed.
    Io(std::io::Error),
    /// Malformed JSON or field value.
    Json(serde_json::Error),
    /// A value is out of range.
    InvalidConfig(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Json(e) => write!(f, "cannot parse config: {}", e),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otaa_json(extra: &str) -> String {
        format!(
            r#"{{
                {}
                "activation": {{
                    "mode": "otaa",
                    "dev_eui": "70B3D57ED0000001",
                    "join_eui": "0000000000000000",
                    "app_key": "2B7E151628AED2A6ABF7158809CF4F3C"
                }}
            }}"#,
            extra
        )
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = ManagerConfig::from_json_str(&otaa_json("")).unwrap();
        assert_eq!(config.region, Region::Eu868);
        assert_eq!(config.duty_cycle_limit_pct(), 1.0);
        assert_eq!(config.interval_ms, 60_000);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.radio_params().data_rate, 5);
        assert_eq!(config.airtime_accounting, AirtimeAccounting::PerAttempt);
        assert!(matches!(config.activation.to_mode(), ActivationMode::Otaa(_)));
    }

    #[test]
    fn test_default_config_needs_keys() {
        assert!(matches!(
            ManagerConfig::default().validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_us915_defaults_to_its_fastest_rate() {
        let config = ManagerConfig::from_json_str(&otaa_json(r#""region": "us915","#)).unwrap();
        assert_eq!(config.radio_params().data_rate, 4);
        assert_eq!(config.duty_cycle_limit_pct(), 100.0);
    }

    #[test]
    fn test_rejects_interval_outside_bounds() {
        let result = ManagerConfig::from_json_str(&otaa_json(r#""interval_ms": 5000,"#));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_retry_policy() {
        let result = ManagerConfig::from_json_str(&otaa_json(
            r#""initial_backoff_ms": 5000, "max_backoff_ms": 1000,"#,
        ));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_hex() {
        let result = ManagerConfig::from_json_str(&otaa_json(r#""intervall_ms": 5000,"#));
        assert!(matches!(result, Err(ConfigError::Json(_))));

        let json = r#"{"activation": {"mode": "abp", "dev_addr": "XYZ", "nwk_s_key": "00", "app_s_key": "00"}}"#;
        assert!(matches!(
            ManagerConfig::from_json_str(json),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_duty_cycle() {
        let result =
            ManagerConfig::from_json_str(&otaa_json(r#""duty_cycle_limit_pct": 0.0,"#));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = ManagerConfig::from_json_str(&otaa_json(r#""adr": false,"#)).unwrap();
        let text = config.to_json_pretty().unwrap();
        let again = ManagerConfig::from_json_str(&text).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ManagerConfig::load("/nonexistent/lpwan-config.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
