//! Status bits and event classes.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Device status bitmask carried in telemetry frames.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// Environmental sensor responding.
    pub const SENSOR_OK: Self = Self(0x01);
    /// PIR or camera motion detected since the last report.
    pub const MOTION_DETECTED: Self = Self(0x02);
    /// Object classifier fired since the last report.
    pub const OBJECT_DETECTED: Self = Self(0x04);
    /// Local alarm output active.
    pub const ALARM_ACTIVE: Self = Self(0x08);
    /// Battery below the low threshold.
    pub const LOW_BATTERY: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusFlags({:#04x})", self.0)
    }
}

/// Detection class reported in event frames.
///
/// Values the firmware does not know are kept as `Unknown` so that decoding
/// never fails on the class byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Person,
    Vehicle,
    Animal,
    Motion,
    Alarm,
    Unknown(u8),
}

impl EventKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Person => 0,
            Self::Vehicle => 1,
            Self::Animal => 2,
            Self::Motion => 3,
            Self::Alarm => 4,
            Self::Unknown(value) => value,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Person,
            1 => Self::Vehicle,
            2 => Self::Animal,
            3 => Self::Motion,
            4 => Self::Alarm,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Vehicle => write!(f, "vehicle"),
            Self::Animal => write!(f, "animal"),
            Self::Motion => write!(f, "motion"),
            Self::Alarm => write!(f, "alarm"),
            Self::Unknown(value) => write!(f, "unknown({})", value),
        }
    }
}
