//! Manager configuration.
//!
//! # Components
//!
//! - [`settings`] - [`ManagerConfig`], JSON loading and validation
//! - [`keys`] - hex-encoded EUIs and keys, zeroed on drop
//!
//! Region defaults can be chosen at build time with the `region-*` cargo
//! features; everything else comes from the JSON file.

pub mod keys;
pub mod settings;

pub use keys::HexBytes;
pub use settings::{ActivationConfig, AirtimeAccounting, ConfigError, ManagerConfig};
