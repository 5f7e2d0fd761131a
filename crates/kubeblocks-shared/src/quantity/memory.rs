use std::{fmt::Display, str::FromStr};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;

use crate::quantity::{ParseQuantityError, Quantity};

pub const KIBI: u64 = 1 << 10;
pub const MEBI: u64 = 1 << 20;
pub const GIBI: u64 = 1 << 30;

/// A memory quantity, normalized to bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryQuantity {
    bytes: u64,
}

impl MemoryQuantity {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub const fn from_mebi(mebi: u64) -> Self {
        Self {
            bytes: mebi * MEBI,
        }
    }

    pub const fn from_gibi(gibi: u64) -> Self {
        Self {
            bytes: gibi * GIBI,
        }
    }

    pub const fn as_bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns the size in whole mebibytes, rounding down.
    pub const fn as_mebi(&self) -> u64 {
        self.bytes / MEBI
    }
}

impl FromStr for MemoryQuantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Quantity::from_str(input)?.into())
    }
}

impl From<Quantity> for MemoryQuantity {
    fn from(quantity: Quantity) -> Self {
        // Negative or fractional byte counts make no sense for memory, clamp them away
        Self {
            bytes: quantity.as_base_value().max(0.0).ceil() as u64,
        }
    }
}

impl TryFrom<&K8sQuantity> for MemoryQuantity {
    type Error = ParseQuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl From<MemoryQuantity> for K8sQuantity {
    fn from(value: MemoryQuantity) -> Self {
        K8sQuantity(value.to_string())
    }
}

impl Display for MemoryQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bytes {
            0 => f.write_str("0"),
            b if b % GIBI == 0 => write!(f, "{}Gi", b / GIBI),
            b if b % MEBI == 0 => write!(f, "{}Mi", b / MEBI),
            b if b % KIBI == 0 => write!(f, "{}Ki", b / KIBI),
            b => write!(f, "{b}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("8Gi", 8 * GIBI)]
    #[case("512Mi", 512 * MEBI)]
    #[case("1G", 1_000_000_000)]
    #[case("1024", 1024)]
    #[case("0", 0)]
    fn memory_from_str(#[case] input: &str, #[case] bytes: u64) {
        assert_eq!(MemoryQuantity::from_str(input).unwrap().as_bytes(), bytes);
    }

    #[rstest]
    #[case(MemoryQuantity::from_gibi(2), "2Gi")]
    #[case(MemoryQuantity::from_mebi(1536), "1536Mi")]
    #[case(MemoryQuantity::from_bytes(2048), "2Ki")]
    #[case(MemoryQuantity::from_bytes(1000), "1000")]
    fn memory_display(#[case] memory: MemoryQuantity, #[case] expected: &str) {
        assert_eq!(memory.to_string(), expected);
    }
}
