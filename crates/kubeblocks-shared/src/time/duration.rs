//! A [`Duration`] which is able to parse the human-readable durations found in database
//! configuration files, like `5s`, `15min`, `2h30m` or `1d12h`.
//!
//! Databases are not consistent in how they spell minutes, so both `m` and `min` are accepted.
//! A plain number without any unit is rejected here, callers which know the base unit of a
//! parameter use [`Duration::from_value_with_unit`] instead.

use std::{cmp::Ordering, fmt::Display, num::ParseIntError, ops::Deref, str::FromStr};

use serde::{Deserialize, Serialize, de::Error as _};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use strum::IntoEnumIterator as _;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(module)]
pub enum DurationParseError {
    #[snafu(display("invalid input, either empty or contains non-ascii characters"))]
    InvalidInput,

    #[snafu(display("unexpected character {chr:?}"))]
    UnexpectedCharacter { chr: char },

    #[snafu(display("fragment with value {value:?} has no unit"))]
    NoUnit { value: u128 },

    #[snafu(display("invalid fragment order, {current} must be before {previous}"))]
    InvalidUnitOrdering {
        previous: DurationUnit,
        current: DurationUnit,
    },

    #[snafu(display("fragment unit {unit} was specified multiple times"))]
    DuplicateUnit { unit: DurationUnit },

    #[snafu(display("failed to parse fragment unit {unit:?}"))]
    ParseUnitError { unit: String },

    #[snafu(display("failed to parse fragment value as integer"))]
    ParseIntError { source: ParseIntError },

    #[snafu(display("duration {input:?} overflows"))]
    Overflow { input: String },
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use duration_parse_error::*;
        let input = s.trim();

        if input.is_empty() || !input.is_ascii() {
            return Err(DurationParseError::InvalidInput);
        }

        let mut chars = input.char_indices().peekable();
        let mut millis: u128 = 0;
        let mut last_unit = None;

        let mut take_group = |f: fn(char) -> bool| {
            let &(from, _) = chars.peek()?;
            let mut to = from;

            while let Some((i, _)) = chars.next_if(|(_, c)| f(*c)) {
                to = i;
            }

            // The first char did not match, nothing was taken
            if to == from && !f(input[from..].chars().next()?) {
                return None;
            }

            Some(&input[from..=to])
        };

        while let Some(value) = take_group(|c| c.is_ascii_digit()) {
            let value = value.parse::<u128>().context(ParseIntSnafu)?;

            let Some(unit) = take_group(|c| c.is_ascii_alphabetic()) else {
                if let Some(&(_, chr)) = chars.peek() {
                    return UnexpectedCharacterSnafu { chr }.fail();
                }
                return NoUnitSnafu { value }.fail();
            };

            let unit = unit.parse::<DurationUnit>().ok().context(ParseUnitSnafu {
                unit: unit.to_owned(),
            })?;

            // Units must be specified from the largest to the smallest, each at most once
            if let Some(last_unit) = last_unit {
                match unit.cmp(&last_unit) {
                    Ordering::Less => {
                        return InvalidUnitOrderingSnafu {
                            previous: last_unit,
                            current: unit,
                        }
                        .fail();
                    }
                    Ordering::Equal => return DuplicateUnitSnafu { unit }.fail(),
                    Ordering::Greater => (),
                }
            }

            millis = value
                .checked_mul(unit.millis())
                .and_then(|fragment| millis.checked_add(fragment))
                .context(OverflowSnafu { input })?;
            last_unit = Some(unit);
        }

        if let Some(&(_, chr)) = chars.peek() {
            return UnexpectedCharacterSnafu { chr }.fail();
        }

        let millis = u64::try_from(millis)
            .ok()
            .context(OverflowSnafu { input })?;
        Ok(Self(std::time::Duration::from_millis(millis)))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_zero() {
            return write!(f, "0{}", DurationUnit::Seconds);
        }

        let mut millis = self.0.as_millis();

        for unit in DurationUnit::iter() {
            let whole = millis / unit.millis();
            let rest = millis % unit.millis();

            if whole > 0 {
                write!(f, "{whole}{unit}")?;
            }

            millis = rest;
        }

        Ok(())
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;
        Self::from_str(&input).map_err(D::Error::custom)
    }
}

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    /// Interprets a unit-less number as a count of `unit`, e.g. `wait_timeout=28800` where the
    /// parameter is declared in seconds.
    pub fn from_value_with_unit(value: u64, unit: DurationUnit) -> Self {
        let millis = u128::from(value).saturating_mul(unit.millis());
        Self::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns the duration expressed as a (possibly fractional) count of `unit`.
    pub fn as_unit(&self, unit: DurationUnit) -> f64 {
        self.0.as_millis() as f64 / unit.millis() as f64
    }
}

/// Supported [`DurationUnit`]s, ordered from the largest to the smallest. The order of the
/// variants is the basis of the [`Display`] implementation of [`Duration`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum DurationUnit {
    #[strum(serialize = "d")]
    Days,

    #[strum(serialize = "h")]
    Hours,

    #[strum(to_string = "m", serialize = "min")]
    Minutes,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "ms")]
    Milliseconds,
}

impl DurationUnit {
    /// Returns the number of whole milliseconds in each supported [`DurationUnit`].
    pub fn millis(&self) -> u128 {
        match self {
            Self::Days => 24 * Self::Hours.millis(),
            Self::Hours => 60 * Self::Minutes.millis(),
            Self::Minutes => 60 * Self::Seconds.millis(),
            Self::Seconds => 1000,
            Self::Milliseconds => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("15d2m2s1000ms", 1_296_123)]
    #[case("15min", 900)]
    #[case("70m", 4200)]
    #[case("1h30min", 5400)]
    #[case("1h", 3600)]
    #[case("1s", 1)]
    fn parse_as_secs(#[case] input: &str, #[case] output: u64) {
        let dur: Duration = input.parse().unwrap();
        assert_eq!(dur.as_secs(), output);
    }

    #[rstest]
    #[case("1D", DurationParseError::ParseUnitError { unit: "D".into() })]
    #[case("2d2", DurationParseError::NoUnit { value: 2 })]
    #[case("1ä", DurationParseError::InvalidInput)]
    #[case(" ", DurationParseError::InvalidInput)]
    #[case("s", DurationParseError::UnexpectedCharacter { chr: 's' })]
    #[case("15d2h1d", DurationParseError::InvalidUnitOrdering { previous: DurationUnit::Hours, current: DurationUnit::Days })]
    #[case("2m15min", DurationParseError::DuplicateUnit { unit: DurationUnit::Minutes })]
    fn parse_invalid(#[case] input: &str, #[case] expected_err: DurationParseError) {
        let err = Duration::from_str(input).unwrap_err();
        assert_eq!(err, expected_err);
    }

    #[rstest]
    #[case("70m", "1h10m")]
    #[case("15min", "15m")]
    #[case("1h20m", "1h20m")]
    #[case("0s", "0s")]
    fn to_string(#[case] input: &str, #[case] expected: &str) {
        let dur: Duration = input.parse().unwrap();
        assert_eq!(dur.to_string(), expected);
    }

    #[rstest]
    #[case("15min", DurationUnit::Seconds, 900.0)]
    #[case("1500ms", DurationUnit::Seconds, 1.5)]
    #[case("2h", DurationUnit::Minutes, 120.0)]
    fn as_unit(#[case] input: &str, #[case] unit: DurationUnit, #[case] expected: f64) {
        let dur: Duration = input.parse().unwrap();
        assert_eq!(dur.as_unit(unit), expected);
    }

    #[test]
    fn from_value_with_unit() {
        let dur = Duration::from_value_with_unit(28800, DurationUnit::Seconds);
        assert_eq!(dur.to_string(), "8h");
    }
}
