//! Hex-encoded identifiers and keys in configuration files.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// `N` bytes written as `2N` hex digits (separators `:`, `-` and spaces allowed).
///
/// Contents are zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct HexBytes<const N: usize>([u8; N]);

impl<const N: usize> HexBytes<N> {
    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0; N])
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Parse a hex string of exactly `N` bytes.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut digits: Vec<u8> = text
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-' | b' '))
            .collect();
        if digits.len() != N * 2 {
            let len = digits.len();
            digits.zeroize();
            return Err(format!("expected {} hex digits, got {}", N * 2, len));
        }
        let mut out = Self::zero();
        let decoded = hex::decode_to_slice(&digits, &mut out.0);
        digits.zeroize();
        decoded.map_err(|e| format!("invalid hex: {}", e))?;
        Ok(out)
    }

    /// Upper-case hex, no separators.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl<const N: usize> Drop for HexBytes<N> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Default for HexBytes<N> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const N: usize> fmt::Debug for HexBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes<{}>(..)", N)
    }
}

impl<const N: usize> Serialize for HexBytes<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for HexBytes<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut text = String::deserialize(deserializer)?;
        let parsed = Self::parse(&text).map_err(serde::de::Error::custom);
        text.zeroize();
        parsed
    }
}
