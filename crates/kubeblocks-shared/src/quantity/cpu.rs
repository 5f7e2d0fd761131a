use std::{fmt::Display, str::FromStr};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;

use crate::quantity::{ParseQuantityError, Quantity};

/// A representation of CPU quantities with milli precision.
///
/// A CPU quantity cannot have a precision finer than 'm' (millis) in Kubernetes, so we use that
/// as our internal representation (see:
/// <https://kubernetes.io/docs/concepts/configuration/manage-resources-containers/#meaning-of-cpu>).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuQuantity {
    millis: u64,
}

impl CpuQuantity {
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_milli_cpus(&self) -> u64 {
        self.millis
    }

    pub fn as_cpu_count(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    /// Returns the number of whole cores, rounding partial cores up.
    pub const fn as_cores_ceil(&self) -> u64 {
        self.millis.div_ceil(1000)
    }
}

impl FromStr for CpuQuantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Quantity::from_str(input)?.into())
    }
}

impl From<Quantity> for CpuQuantity {
    fn from(quantity: Quantity) -> Self {
        Self {
            millis: (quantity.as_base_value() * 1000.0).max(0.0).round() as u64,
        }
    }
}

impl TryFrom<&K8sQuantity> for CpuQuantity {
    type Error = ParseQuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl Display for CpuQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.millis % 1000 {
            0 => write!(f, "{}", self.millis / 1000),
            _ => write!(f, "{}m", self.millis),
        }
    }
}
