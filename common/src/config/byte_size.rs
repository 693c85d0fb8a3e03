use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// A byte count that accepts plain integers (`65_536`) or human readable
/// sizes (`64 KiB`, `2MiB`, `10 kb`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ByteSizeRepr", into = "u64")]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "0 B"),
            n if n % MIB == 0 => write!(f, "{} MiB", n / MIB),
            n if n % KIB == 0 => write!(f, "{} KiB", n / KIB),
            n => write!(f, "{} B", n),
        }
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidByteSize(raw.to_string());
        let trimmed = raw.trim();

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '_'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let digits: String = number.chars().filter(|c| *c != '_').collect();
        if digits.is_empty() {
            return Err(invalid());
        }
        let number: u64 = digits.parse().map_err(|_| invalid())?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" => 1,
            "kb" => 1000,
            "mb" => 1000 * 1000,
            "gb" => 1000 * 1000 * 1000,
            "tb" => 1000 * 1000 * 1000 * 1000,
            "kib" => KIB,
            "mib" => MIB,
            "gib" => 1024 * MIB,
            "tib" => 1024 * 1024 * MIB,
            _ => return Err(invalid()),
        };

        number.checked_mul(multiplier).map(ByteSize).ok_or_else(invalid)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Int(u64),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = ConfigError;

    fn try_from(repr: ByteSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            ByteSizeRepr::Int(n) => Ok(ByteSize(n)),
            ByteSizeRepr::Text(raw) => raw.parse(),
        }
    }
}
