use std::{fmt::Display, ops::Deref, str::FromStr};

use snafu::Snafu;

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("failed to parse {input:?} as quantity suffix"))]
pub struct ParseSuffixError {
    input: String,
}

/// The `<suffix>` part of a Kubernetes quantity.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum Suffix {
    DecimalMultiple(DecimalMultiple),
    BinaryMultiple(BinaryMultiple),
    DecimalExponent(DecimalExponent),
}

impl FromStr for Suffix {
    type Err = ParseSuffixError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(binary) = BinaryMultiple::from_str(input) {
            return Ok(Self::BinaryMultiple(binary));
        }

        if let Ok(decimal) = DecimalMultiple::from_str(input) {
            return Ok(Self::DecimalMultiple(decimal));
        }

        if let Some(exponent) = input.strip_prefix(['e', 'E']) {
            if let Ok(exponent) = f64::from_str(exponent) {
                return Ok(Self::DecimalExponent(DecimalExponent(exponent)));
            }
        }

        ParseSuffixSnafu { input }.fail()
    }
}

impl Display for Suffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecimalMultiple(decimal) => write!(f, "{decimal}"),
            Self::BinaryMultiple(binary) => write!(f, "{binary}"),
            Self::DecimalExponent(exponent) => write!(f, "e{exponent}"),
        }
    }
}

impl Suffix {
    /// Returns the factor which needs to be applied to the numeric value to get the value in the
    /// base unit (bytes for memory, cores for CPU).
    pub fn factor(&self) -> f64 {
        match self {
            Self::DecimalMultiple(decimal) => decimal.factor(),
            Self::BinaryMultiple(binary) => binary.factor(),
            Self::DecimalExponent(exponent) => exponent.factor(),
        }
    }
}

/// Supported byte-multiples based on powers of 2.
///
/// ```plain
/// - 1024^1, KiB (Ki), Kibibyte
/// - 1024^2, MiB (Mi), Mebibyte
/// - 1024^3, GiB (Gi), Gibibyte
/// - 1024^4, TiB (Ti), Tebibyte
/// - 1024^5, PiB (Pi), Pebibyte
/// - 1024^6, EiB (Ei), Exbibyte
/// ```
///
/// All units bigger than Exbibyte are not a valid suffix according to the [Kubernetes serialization
/// format][k8s-serialization-format].
///
/// [k8s-serialization-format]: https://github.com/kubernetes/apimachinery/blob/8c60292e48e46c4faa1e92acb232ce6adb37512c/pkg/api/resource/quantity.go#L37-L59
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, strum::Display, strum::EnumString)]
pub enum BinaryMultiple {
    #[strum(serialize = "Ki")]
    Kibi,

    #[strum(serialize = "Mi")]
    Mebi,

    #[strum(serialize = "Gi")]
    Gibi,

    #[strum(serialize = "Ti")]
    Tebi,

    #[strum(serialize = "Pi")]
    Pebi,

    #[strum(serialize = "Ei")]
    Exbi,
}

impl BinaryMultiple {
    /// Returns the factor based on powers of 2.
    pub fn factor(&self) -> f64 {
        match self {
            Self::Kibi => 2f64.powi(10),
            Self::Mebi => 2f64.powi(20),
            Self::Gibi => 2f64.powi(30),
            Self::Tebi => 2f64.powi(40),
            Self::Pebi => 2f64.powi(50),
            Self::Exbi => 2f64.powi(60),
        }
    }
}

/// Supported multiples based on powers of 10.
///
/// It should be noted that Kubernetes uses `k` instead of `K` for kilo.
///
/// ```plain
/// - 1000^-3, (n): nano
/// - 1000^-2, (u): micro
/// - 1000^-1, (m): milli
/// - 1000^ 0, ( ): no suffix
/// - 1000^ 1, (k): kilo
/// - 1000^ 2, (M): Mega
/// - 1000^ 3, (G): Giga
/// - 1000^ 4, (T): Tera
/// - 1000^ 5, (P): Peta
/// - 1000^ 6, (E): Exa
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, strum::Display, strum::EnumString)]
pub enum DecimalMultiple {
    #[strum(serialize = "n")]
    Nano,

    #[strum(serialize = "u")]
    Micro,

    #[strum(serialize = "m")]
    Milli,

    #[strum(serialize = "k")]
    Kilo,

    #[strum(serialize = "M")]
    Mega,

    #[strum(serialize = "G")]
    Giga,

    #[strum(serialize = "T")]
    Tera,

    #[strum(serialize = "P")]
    Peta,

    #[strum(serialize = "E")]
    Exa,
}

impl DecimalMultiple {
    pub fn factor(&self) -> f64 {
        match self {
            Self::Nano => 10f64.powi(-9),
            Self::Micro => 10f64.powi(-6),
            Self::Milli => 10f64.powi(-3),
            Self::Kilo => 10f64.powi(3),
            Self::Mega => 10f64.powi(6),
            Self::Giga => 10f64.powi(9),
            Self::Tera => 10f64.powi(12),
            Self::Peta => 10f64.powi(15),
            Self::Exa => 10f64.powi(18),
        }
    }
}

/// Scientific (also known as E) notation of numbers.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct DecimalExponent(f64);

impl Deref for DecimalExponent {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DecimalExponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecimalExponent {
    pub fn factor(&self) -> f64 {
        10f64.powf(self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Ki", Suffix::BinaryMultiple(BinaryMultiple::Kibi))]
    #[case("Gi", Suffix::BinaryMultiple(BinaryMultiple::Gibi))]
    #[case("Ei", Suffix::BinaryMultiple(BinaryMultiple::Exbi))]
    #[case("m", Suffix::DecimalMultiple(DecimalMultiple::Milli))]
    #[case("k", Suffix::DecimalMultiple(DecimalMultiple::Kilo))]
    #[case("G", Suffix::DecimalMultiple(DecimalMultiple::Giga))]
    #[case("e3", Suffix::DecimalExponent(DecimalExponent(3.0)))]
    #[case("E-2", Suffix::DecimalExponent(DecimalExponent(-2.0)))]
    fn suffix_from_str_pass(#[case] input: &str, #[case] expected: Suffix) {
        let parsed = Suffix::from_str(input).unwrap();
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("K")]
    #[case("KB")]
    #[case("ki")]
    #[case("e")]
    fn suffix_from_str_fail(#[case] input: &str) {
        assert!(Suffix::from_str(input).is_err());
    }

    #[test]
    fn binary_factor() {
        assert_eq!(
            Suffix::BinaryMultiple(BinaryMultiple::Mebi).factor(),
            1024.0 * 1024.0
        );
    }
}
