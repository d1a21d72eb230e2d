//! Uplink packet codec.
//!
//! This module contains:
//! - [`frame`]: fixed-layout telemetry, event and status records
//! - [`flags`]: status bit flags and event classes carried in the records
//!
//! Every record starts with the magic `0xA5A5` and a type byte and ends with
//! a little-endian CRC-16/MODBUS over all preceding bytes.

mod flags;
mod frame;

pub use flags::{EventKind, StatusFlags};
pub use frame::{
    crc16, validate_frame, CodecError, EventRecord, Frame, FrameType, StatusRecord,
    TelemetryRecord, EVENT_FRAME_LEN, FRAME_MAGIC, STATUS_FRAME_LEN, TELEMETRY_FRAME_LEN,
};

/// Application port for telemetry uplinks.
pub const PORT_TELEMETRY: u8 = 1;
/// Application port for status uplinks.
pub const PORT_STATUS: u8 = 2;
/// Application port for commands (downlink) and their responses (uplink).
pub const PORT_COMMAND: u8 = 3;
/// Application port for detection events.
pub const PORT_EVENT: u8 = 4;
