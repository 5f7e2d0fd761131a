//! Parsing of Kubernetes resource quantities and of the storage sizes used inside database
//! configuration files.
//!
//! Quantities follow the [Kubernetes serialization format][k8s-serialization-format]:
//! `<signedNumber><suffix>`, where the suffix is either a binary multiple (`Ki`, `Mi`, ...), a
//! decimal multiple (`m`, `k`, `M`, ...) or a decimal exponent (`e3`, `E-2`).
//!
//! [k8s-serialization-format]: https://github.com/kubernetes/apimachinery/blob/8c60292e48e46c4faa1e92acb232ce6adb37512c/pkg/api/resource/quantity.go#L37-L59

use std::{fmt::Display, num::ParseFloatError, str::FromStr};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use snafu::{ResultExt as _, Snafu, ensure};

mod cpu;
mod memory;
mod storage;
mod suffix;

pub use cpu::*;
pub use memory::*;
pub use storage::*;
pub use suffix::*;

#[derive(Debug, PartialEq, Snafu)]
pub enum ParseQuantityError {
    #[snafu(display("input is either empty or contains non-ascii characters"))]
    InvalidFormat,

    #[snafu(display("failed to parse floating point number"))]
    InvalidFloat { source: ParseFloatError },

    #[snafu(display("failed to parse suffix"))]
    InvalidSuffix { source: ParseSuffixError },
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Quantity {
    /// The numeric value of the quantity, parsed from `<signedNumber>`.
    ///
    /// We don't use arbitrary-precision arithmetic like the Go implementation, resource limits
    /// of a database container never get close to the limits of a `f64`.
    value: f64,

    /// The optional suffix of the quantity.
    suffix: Option<Suffix>,
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty() && input.is_ascii(), InvalidFormatSnafu);

        // The sign is part of the number, skip it when looking for the suffix
        let number_start = usize::from(input.starts_with(['+', '-']));

        match input[number_start..]
            .find(|c: char| c != '.' && !c.is_ascii_digit())
            .map(|index| index + number_start)
        {
            Some(suffix_index) => {
                let (value, suffix) = input.split_at(suffix_index);
                let value = f64::from_str(value).context(InvalidFloatSnafu)?;
                let suffix = Suffix::from_str(suffix).context(InvalidSuffixSnafu)?;

                Ok(Self {
                    value,
                    suffix: Some(suffix),
                })
            }
            None => {
                let value = f64::from_str(input).context(InvalidFloatSnafu)?;
                Ok(Self {
                    value,
                    suffix: None,
                })
            }
        }
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value == 0.0 {
            return f.write_str("0");
        }

        match &self.suffix {
            Some(suffix) => write!(f, "{value}{suffix}", value = self.value),
            None => write!(f, "{value}", value = self.value),
        }
    }
}

impl TryFrom<&K8sQuantity> for Quantity {
    type Error = ParseQuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl TryFrom<K8sQuantity> for Quantity {
    type Error = ParseQuantityError;

    fn try_from(value: K8sQuantity) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl Quantity {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn suffix(&self) -> Option<Suffix> {
        self.suffix
    }

    /// Returns the value scaled to the base unit, e.g. `1Ki` returns `1024.0` and `500m`
    /// returns `0.5`.
    pub fn as_base_value(&self) -> f64 {
        match &self.suffix {
            Some(suffix) => self.value * suffix.factor(),
            None => self.value,
        }
    }
}
