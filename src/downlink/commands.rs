//! Downlink command and uplink response wire formats.
//!
//! ```text
//! Command:  [command_id:1][params:0..16]
//! Response: [response_id:1][payload:0..16]
//! ```

use std::fmt;

/// Largest parameter block a command may carry.
pub const MAX_COMMAND_PARAMS: usize = 16;

/// Command identifiers.
pub mod id {
    pub const PING: u8 = 0x00;
    pub const SET_INTERVAL: u8 = 0x01;
    pub const SET_DATA_RATE: u8 = 0x02;
    pub const SET_TX_POWER: u8 = 0x03;
    pub const REBOOT: u8 = 0x04;
    pub const GET_STATUS: u8 = 0x05;
    pub const SET_LED: u8 = 0x06;
    pub const SET_ALARM: u8 = 0x07;
    pub const GET_BATTERY: u8 = 0x08;
    pub const SET_ADR: u8 = 0x09;
    pub const CLEAR_STATS: u8 = 0x0A;
}

/// Response identifiers.
pub mod response_id {
    pub const ACK: u8 = 0x80;
    pub const NACK: u8 = 0x81;
    pub const STATUS: u8 = 0x82;
    pub const BATTERY: u8 = 0x83;
    pub const ERROR: u8 = 0xFF;
}

/// Error codes carried in `[0xFF, code]` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownCommand = 0x01,
    InvalidParameter = 0x02,
    NotImplemented = 0x03,
    BufferOverflow = 0x04,
    ChecksumFail = 0x05,
    NotJoined = 0x06,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::UnknownCommand),
            0x02 => Some(Self::InvalidParameter),
            0x03 => Some(Self::NotImplemented),
            0x04 => Some(Self::BufferOverflow),
            0x05 => Some(Self::ChecksumFail),
            0x06 => Some(Self::NotJoined),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnknownCommand => "unknown command",
            Self::InvalidParameter => "invalid parameter",
            Self::NotImplemented => "not implemented",
            Self::BufferOverflow => "buffer overflow",
            Self::ChecksumFail => "checksum failure",
            Self::NotJoined => "not joined",
        };
        write!(f, "{}", text)
    }
}

impl std::error::Error for ErrorCode {}

/// A parsed downlink command.
///
/// Range checks that depend on device configuration (interval bounds, region
/// limits) happen in the processor, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    SetInterval(u32),
    SetDataRate(u8),
    SetTxPower(i8),
    Reboot,
    GetStatus,
    SetLed(bool),
    SetAlarm(bool),
    GetBattery,
    SetAdr(bool),
    ClearStats,
}

impl Command {
    /// Parse a raw downlink frame.
    ///
    /// Parameterless commands ignore trailing bytes.
    pub fn parse(frame: &[u8]) -> Result<Self, ErrorCode> {
        let (&command_id, params) = frame.split_first().ok_or(ErrorCode::InvalidParameter)?;
        if command_id > id::CLEAR_STATS {
            return Err(ErrorCode::UnknownCommand);
        }
        if params.len() > MAX_COMMAND_PARAMS {
            return Err(ErrorCode::BufferOverflow);
        }
        let command = match command_id {
            id::PING => Self::Ping,
            id::SET_INTERVAL => {
                let bytes: [u8; 4] = params
                    .try_into()
                    .map_err(|_| ErrorCode::InvalidParameter)?;
                Self::SetInterval(u32::from_le_bytes(bytes))
            }
            id::SET_DATA_RATE => Self::SetDataRate(single_byte(params)?),
            id::SET_TX_POWER => Self::SetTxPower(single_byte(params)? as i8),
            id::REBOOT => Self::Reboot,
            id::GET_STATUS => Self::GetStatus,
            id::SET_LED => Self::SetLed(single_byte(params)? != 0),
            id::SET_ALARM => Self::SetAlarm(single_byte(params)? != 0),
            id::GET_BATTERY => Self::GetBattery,
            id::SET_ADR => Self::SetAdr(single_byte(params)? != 0),
            id::CLEAR_STATS => Self::ClearStats,
            _ => return Err(ErrorCode::UnknownCommand),
        };
        Ok(command)
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Ping => id::PING,
            Self::SetInterval(_) => id::SET_INTERVAL,
            Self::SetDataRate(_) => id::SET_DATA_RATE,
            Self::SetTxPower(_) => id::SET_TX_POWER,
            Self::Reboot => id::REBOOT,
            Self::GetStatus => id::GET_STATUS,
            Self::SetLed(_) => id::SET_LED,
            Self::SetAlarm(_) => id::SET_ALARM,
            Self::GetBattery => id::GET_BATTERY,
            Self::SetAdr(_) => id::SET_ADR,
            Self::ClearStats => id::CLEAR_STATS,
        }
    }

    /// Serialize as a downlink frame (network-server side and tests).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.id()];
        match *self {
            Self::SetInterval(ms) => buf.extend_from_slice(&ms.to_le_bytes()),
            Self::SetDataRate(dr) => buf.push(dr),
            Self::SetTxPower(dbm) => buf.push(dbm as u8),
            Self::SetLed(on) | Self::SetAlarm(on) | Self::SetAdr(on) => buf.push(on as u8),
            _ => {}
        }
        buf
    }
}

fn single_byte(params: &[u8]) -> Result<u8, ErrorCode> {
    match params {
        [value] => Ok(*value),
        _ => Err(ErrorCode::InvalidParameter),
    }
}

/// Device state reported by GET_STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub interval_ms: u32,
    pub data_rate: u8,
    pub tx_power_dbm: i8,
    pub adr: bool,
    pub led: bool,
    pub alarm: bool,
    pub tx_count: u32,
    pub rx_count: u32,
}

/// Uplink answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nack,
    Status(StatusReport),
    Battery { percent: u8, decivolts: u8 },
    Error(ErrorCode),
}

/// Encoded length of a status response.
pub const STATUS_RESPONSE_LEN: usize = 18;

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ack => vec![response_id::ACK],
            Self::Nack => vec![response_id::NACK],
            Self::Status(s) => {
                let mut buf = Vec::with_capacity(STATUS_RESPONSE_LEN);
                buf.push(response_id::STATUS);
                buf.extend_from_slice(&s.interval_ms.to_le_bytes());
                buf.push(s.data_rate);
                buf.push(s.tx_power_dbm as u8);
                buf.push(s.adr as u8);
                buf.push(s.led as u8);
                buf.push(s.alarm as u8);
                buf.extend_from_slice(&s.tx_count.to_le_bytes());
                buf.extend_from_slice(&s.rx_count.to_le_bytes());
                buf
            }
            Self::Battery { percent, decivolts } => {
                vec![response_id::BATTERY, *percent, *decivolts]
            }
            Self::Error(code) => vec![response_id::ERROR, code.as_u8()],
        }
    }

    /// Parse an uplink response (network-server side and tests).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&rid, rest) = bytes.split_first()?;
        match (rid, rest.len()) {
            (response_id::ACK, 0) => Some(Self::Ack),
            (response_id::NACK, 0) => Some(Self::Nack),
            (response_id::STATUS, 17) => Some(Self::Status(StatusReport {
                interval_ms: u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]),
                data_rate: rest[4],
                tx_power_dbm: rest[5] as i8,
                adr: rest[6] != 0,
                led: rest[7] != 0,
                alarm: rest[8] != 0,
                tx_count: u32::from_le_bytes([rest[9], rest[10], rest[11], rest[12]]),
                rx_count: u32::from_le_bytes([rest[13], rest[14], rest[15], rest[16]]),
            })),
            (response_id::BATTERY, 2) => Some(Self::Battery {
                percent: rest[0],
                decivolts: rest[1],
            }),
            (response_id::ERROR, 1) => ErrorCode::from_u8(rest[0]).map(Self::Error),
            _ => None,
        }
    }
}
