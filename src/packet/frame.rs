//! Fixed-layout uplink records.
//!
//! # Frame Formats
//!
//! All multi-byte fields are little-endian.
//!
//! ```text
//! Telemetry (21 bytes)
//! [magic:2][0x01][timestamp:4][temp*100:i16][hum*100:2][press*10:2]
//! [gas:2][iaq:2][status:1][battery:1][crc:2]
//!
//! Event (13 bytes)
//! [magic:2][0x02][timestamp:4][kind:1][confidence:1][duration_s:2][crc:2]
//!
//! Status (19 bytes)
//! [magic:2][0x03][uptime_s:4][tx_count:4][rx_count:4][dr:1][battery:1][crc:2]
//! ```
//!
//! # Example
//!
//! ```
//! use lpwan_manager::packet::{EventKind, EventRecord, Frame};
//!
//! let frame = Frame::Event(EventRecord {
//!     timestamp: 1_700_000_000,
//!     kind: EventKind::Person,
//!     confidence_pct: 87,
//!     duration_s: 12,
//! });
//! let bytes = frame.encode();
//! assert_eq!(bytes.len(), 13);
//! assert_eq!(Frame::decode(&bytes).unwrap(), frame);
//! ```

use super::{EventKind, StatusFlags, PORT_EVENT, PORT_STATUS, PORT_TELEMETRY};
use crc::{Crc, CRC_16_MODBUS};
use std::fmt;

/// CRC-16/MODBUS: reflected polynomial 0xA001, init 0xFFFF.
const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Magic number opening every record.
pub const FRAME_MAGIC: u16 = 0xA5A5;

/// Magic + type byte.
const HEADER_LEN: usize = 3;

/// Trailing checksum.
const CRC_LEN: usize = 2;

pub const TELEMETRY_FRAME_LEN: usize = 21;
pub const EVENT_FRAME_LEN: usize = 13;
pub const STATUS_FRAME_LEN: usize = 19;

/// Checksum used by the uplink records.
pub fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Telemetry = 0x01,
    Event = 0x02,
    Status = 0x03,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Telemetry),
            0x02 => Some(Self::Event),
            0x03 => Some(Self::Status),
            _ => None,
        }
    }

    /// Encoded length of a record of this type.
    pub fn frame_len(self) -> usize {
        match self {
            Self::Telemetry => TELEMETRY_FRAME_LEN,
            Self::Event => EVENT_FRAME_LEN,
            Self::Status => STATUS_FRAME_LEN,
        }
    }
}

/// Environmental reading in fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Seconds since epoch (or device boot, if unsynchronised).
    pub timestamp: u32,
    /// Temperature in hundredths of a degree Celsius.
    pub temperature_centi_c: i16,
    /// Relative humidity in hundredths of a percent.
    pub humidity_centi_pct: u16,
    /// Pressure in tenths of a hectopascal.
    pub pressure_deci_hpa: u16,
    /// Gas sensor resistance (sensor units).
    pub gas_resistance: u16,
    /// Air quality index.
    pub air_quality_index: u16,
    pub status: StatusFlags,
    pub battery_pct: u8,
}

impl TelemetryRecord {
    /// Build a record from floating-point readings.
    ///
    /// Values are rounded to the wire resolution and saturate at the integer
    /// bounds; NaN encodes as zero.
    #[allow(clippy::too_many_arguments)]
    pub fn from_readings(
        timestamp: u32,
        temperature_c: f32,
        humidity_pct: f32,
        pressure_hpa: f32,
        gas_resistance: u16,
        air_quality_index: u16,
        status: StatusFlags,
        battery_pct: u8,
    ) -> Self {
        Self {
            timestamp,
            temperature_centi_c: (temperature_c * 100.0).round() as i16,
            humidity_centi_pct: (humidity_pct * 100.0).round() as u16,
            pressure_deci_hpa: (pressure_hpa * 10.0).round() as u16,
            gas_resistance,
            air_quality_index,
            status,
            battery_pct: battery_pct.min(100),
        }
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_centi_c as f32 / 100.0
    }

    pub fn humidity_pct(&self) -> f32 {
        self.humidity_centi_pct as f32 / 100.0
    }

    pub fn pressure_hpa(&self) -> f32 {
        self.pressure_deci_hpa as f32 / 10.0
    }
}

/// Detection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub timestamp: u32,
    pub kind: EventKind,
    /// Classifier confidence, 0..=100.
    pub confidence_pct: u8,
    pub duration_s: u16,
}

/// Periodic device status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    pub uptime_s: u32,
    pub tx_count: u32,
    pub rx_count: u32,
    pub data_rate: u8,
    pub battery_pct: u8,
}

/// One uplink record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Telemetry(TelemetryRecord),
    Event(EventRecord),
    Status(StatusRecord),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Telemetry(_) => FrameType::Telemetry,
            Self::Event(_) => FrameType::Event,
            Self::Status(_) => FrameType::Status,
        }
    }

    /// Application port this record is sent on.
    pub fn port(&self) -> u8 {
        match self {
            Self::Telemetry(_) => PORT_TELEMETRY,
            Self::Event(_) => PORT_EVENT,
            Self::Status(_) => PORT_STATUS,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.frame_type().frame_len()
    }

    /// Serialize with header and checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.push(self.frame_type() as u8);
        match self {
            Self::Telemetry(t) => {
                buf.extend_from_slice(&t.timestamp.to_le_bytes());
                buf.extend_from_slice(&t.temperature_centi_c.to_le_bytes());
                buf.extend_from_slice(&t.humidity_centi_pct.to_le_bytes());
                buf.extend_from_slice(&t.pressure_deci_hpa.to_le_bytes());
                buf.extend_from_slice(&t.gas_resistance.to_le_bytes());
                buf.extend_from_slice(&t.air_quality_index.to_le_bytes());
                buf.push(t.status.bits());
                buf.push(t.battery_pct);
            }
            Self::Event(e) => {
                buf.extend_from_slice(&e.timestamp.to_le_bytes());
                buf.push(e.kind.as_u8());
                buf.push(e.confidence_pct);
                buf.extend_from_slice(&e.duration_s.to_le_bytes());
            }
            Self::Status(s) => {
                buf.extend_from_slice(&s.uptime_s.to_le_bytes());
                buf.extend_from_slice(&s.tx_count.to_le_bytes());
                buf.extend_from_slice(&s.rx_count.to_le_bytes());
                buf.push(s.data_rate);
                buf.push(s.battery_pct);
            }
        }
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and verify a record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let frame_type = check_envelope(bytes)?;
        let body = &bytes[HEADER_LEN..bytes.len() - CRC_LEN];
        let frame = match frame_type {
            FrameType::Telemetry => Self::Telemetry(TelemetryRecord {
                timestamp: u32_at(body, 0),
                temperature_centi_c: u16_at(body, 4) as i16,
                humidity_centi_pct: u16_at(body, 6),
                pressure_deci_hpa: u16_at(body, 8),
                gas_resistance: u16_at(body, 10),
                air_quality_index: u16_at(body, 12),
                status: StatusFlags::from_bits(body[14]),
                battery_pct: body[15],
            }),
            FrameType::Event => Self::Event(EventRecord {
                timestamp: u32_at(body, 0),
                kind: EventKind::from_u8(body[4]),
                confidence_pct: body[5],
                duration_s: u16_at(body, 6),
            }),
            FrameType::Status => Self::Status(StatusRecord {
                uptime_s: u32_at(body, 0),
                tx_count: u32_at(body, 4),
                rx_count: u32_at(body, 8),
                data_rate: body[12],
                battery_pct: body[13],
            }),
        };
        Ok(frame)
    }
}

/// Check magic, type, length and checksum without parsing fields.
pub fn validate_frame(bytes: &[u8]) -> Result<FrameType, CodecError> {
    check_envelope(bytes)
}

fn check_envelope(bytes: &[u8]) -> Result<FrameType, CodecError> {
    if bytes.len() < HEADER_LEN + CRC_LEN {
        return Err(CodecError::TooShort {
            len: bytes.len(),
            min: HEADER_LEN + CRC_LEN,
        });
    }
    let magic = u16_at(bytes, 0);
    if magic != FRAME_MAGIC {
        return Err(CodecError::MagicMismatch(magic));
    }
    let frame_type = FrameType::from_u8(bytes[2]).ok_or(CodecError::UnknownType(bytes[2]))?;
    let expected = frame_type.frame_len();
    if bytes.len() != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    let split = bytes.len() - CRC_LEN;
    let received = u16_at(bytes, split);
    let computed = crc16(&bytes[..split]);
    if received != computed {
        return Err(CodecError::ChecksumMismatch { received, computed });
    }
    Ok(frame_type)
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Errors that can occur while decoding a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer shorter than header plus checksum.
    TooShort { len: usize, min: usize },
    /// First two bytes are not `0xA5A5`.
    MagicMismatch(u16),
    /// Type byte is not a known record type.
    UnknownType(u8),
    /// Buffer length does not match the record type.
    LengthMismatch { expected: usize, actual: usize },
    /// Trailing CRC does not match the content.
    ChecksumMismatch { received: u16, computed: u16 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len, min } => {
                write!(f, "frame too short: {} bytes (min {})", len, min)
            }
            Self::MagicMismatch(magic) => write!(f, "bad magic: {:#06x}", magic),
            Self::UnknownType(t) => write!(f, "unknown frame type: {:#04x}", t),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "frame length {} (expected {})", actual, expected)
            }
            Self::ChecksumMismatch { received, computed } => write!(
                f,
                "checksum mismatch: received {:#06x}, computed {:#06x}",
                received, computed
            ),
        }
    }
}

impl std::error::Error for CodecError {}
