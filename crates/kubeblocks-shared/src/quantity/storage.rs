use std::{fmt::Display, num::ParseFloatError, str::FromStr};

use snafu::{ResultExt as _, Snafu, ensure};

use crate::quantity::BinaryMultiple;

#[derive(Debug, PartialEq, Snafu)]
pub enum ParseStorageSizeError {
    #[snafu(display("input is either empty or contains non-ascii characters"))]
    InvalidInput,

    #[snafu(display("failed to parse storage size value"))]
    InvalidValue { source: ParseFloatError },

    #[snafu(display("unknown storage unit {unit:?}"))]
    UnknownUnit { unit: String },

    #[snafu(display("storage size must not be negative"))]
    Negative,
}

/// Units used by database engines when writing memory and disk sizes, e.g. MySQL's
/// `innodb_buffer_pool_size=128M` or PostgreSQL's `shared_buffers = 1GB`.
///
/// Databases use powers of 2 for these units, so unlike Kubernetes quantities `1M` and `1MB`
/// both mean 1024 * 1024 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum StorageUnit {
    #[strum(serialize = "B")]
    Bytes,

    #[strum(serialize = "KB")]
    Kilobytes,

    #[strum(serialize = "MB")]
    Megabytes,

    #[strum(serialize = "GB")]
    Gigabytes,

    #[strum(serialize = "TB")]
    Terabytes,
}

impl StorageUnit {
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::Kilobytes => 1 << 10,
            Self::Megabytes => 1 << 20,
            Self::Gigabytes => 1 << 30,
            Self::Terabytes => 1 << 40,
        }
    }
}

impl FromStr for StorageUnit {
    type Err = ParseStorageSizeError;

    fn from_str(unit: &str) -> Result<Self, Self::Err> {
        if let Ok(binary) = BinaryMultiple::from_str(unit) {
            return match binary {
                BinaryMultiple::Kibi => Ok(Self::Kilobytes),
                BinaryMultiple::Mebi => Ok(Self::Megabytes),
                BinaryMultiple::Gibi => Ok(Self::Gigabytes),
                BinaryMultiple::Tebi => Ok(Self::Terabytes),
                BinaryMultiple::Pebi | BinaryMultiple::Exbi => UnknownUnitSnafu { unit }.fail(),
            };
        }

        match unit {
            "" | "B" | "b" => Ok(Self::Bytes),
            "K" | "k" | "KB" | "kB" | "kb" => Ok(Self::Kilobytes),
            "M" | "m" | "MB" | "mb" => Ok(Self::Megabytes),
            "G" | "g" | "GB" | "gb" => Ok(Self::Gigabytes),
            "T" | "t" | "TB" | "tb" => Ok(Self::Terabytes),
            _ => UnknownUnitSnafu { unit }.fail(),
        }
    }
}

/// A size in bytes, parsed from strings like `512MB`, `1G`, `64Ki` or `4096`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorageSize {
    bytes: u64,
}

impl FromStr for StorageSize {
    type Err = ParseStorageSizeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty() && input.is_ascii(), InvalidInputSnafu);
        ensure!(!input.starts_with('-'), NegativeSnafu);

        let unit_index = input
            .find(|c: char| c != '.' && c != '+' && !c.is_ascii_digit())
            .unwrap_or(input.len());
        let (value, unit) = input.split_at(unit_index);

        // A bare unit like `GB` is one of that unit
        let value = if value.is_empty() {
            1.0
        } else {
            f64::from_str(value).context(InvalidValueSnafu)?
        };
        let unit = StorageUnit::from_str(unit.trim())?;

        Ok(Self {
            bytes: (value * unit.bytes() as f64).round() as u64,
        })
    }
}

impl Display for StorageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for unit in [
            StorageUnit::Terabytes,
            StorageUnit::Gigabytes,
            StorageUnit::Megabytes,
            StorageUnit::Kilobytes,
        ] {
            if self.bytes != 0 && self.bytes % unit.bytes() == 0 {
                return write!(f, "{}{unit}", self.bytes / unit.bytes());
            }
        }

        write!(f, "{}{}", self.bytes, StorageUnit::Bytes)
    }
}

impl StorageSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn from_value_with_unit(value: u64, unit: StorageUnit) -> Self {
        Self {
            bytes: value.saturating_mul(unit.bytes()),
        }
    }

    pub const fn as_bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns the size expressed as a (possibly fractional) count of `unit`.
    pub fn as_unit(&self, unit: StorageUnit) -> f64 {
        self.bytes as f64 / unit.bytes() as f64
    }
}
