//! LPWAN communication manager.
//!
//! Joins a battery-powered field device to a LoRaWAN network, encodes
//! telemetry into compact checksummed records, keeps transmissions inside the
//! regional duty-cycle limit, retries failed uplinks with exponential backoff
//! and executes configuration commands received as downlinks.
//!
//! Everything here is platform independent; the radio and the clock are
//! traits, so the whole manager runs on the host against
//! [`lora::SimulatedRadio`] and [`ManualClock`].

pub mod clock;
pub mod config;
pub mod downlink;
pub mod lora;
pub mod manager;
pub mod packet;
pub mod scheduler;
pub mod session;
pub mod stats;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ManagerConfig};
pub use downlink::{BatteryReading, Command, ErrorCode, Response};
pub use lora::{DutyCycleTracker, Radio, RadioError, RadioEvent, Region, RetryEngine, RetryPolicy};
pub use manager::{LpwanManager, ManagerEvent};
pub use packet::{CodecError, Frame};
pub use session::{SessionError, SessionState};
pub use stats::{Diagnostics, Statistics};
