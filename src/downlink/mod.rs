//! Remote configuration over downlinks.
//!
//! - [`commands`]: command and response wire formats, error codes
//! - [`processor`]: validation, execution and the pending-command queue

pub mod commands;
mod processor;

pub use commands::{Command, ErrorCode, Response, StatusReport, MAX_COMMAND_PARAMS};
pub use processor::{
    BatteryReading, CommandLimits, CommandOutcome, CommandProcessor, CommandQueue, DeviceConfig,
    Effect, COMMAND_QUEUE_CAPACITY,
};
