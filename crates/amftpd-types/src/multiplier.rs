//! Fixed-point credit multipliers.
//!
//! A multiplier is stored as an integer count of thousandths, so applying it
//! to a kilobyte count is exact integer arithmetic. Repeated small transfers
//! never accumulate rounding drift.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Thousandths per whole unit.
const SCALE: u32 = 1000;

/// A non-negative fixed-point factor with three decimal places.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

/// Error parsing a multiplier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiplierError {
    #[error("multiplier is empty")]
    Empty,
    #[error("multiplier must not be negative: {0}")]
    Negative(String),
    #[error("multiplier has more than three decimal places: {0}")]
    TooPrecise(String),
    #[error("multiplier is out of range: {0}")]
    OutOfRange(String),
    #[error("not a number: {0}")]
    Invalid(String),
}

impl Multiplier {
    /// The free multiplier (`0`).
    pub const ZERO: Multiplier = Multiplier(0);

    /// The identity multiplier (`1`).
    pub const ONE: Multiplier = Multiplier(SCALE);

    /// Construct from thousandths (`1500` = 1.5).
    pub const fn from_milli(milli: u32) -> Self {
        Self(milli)
    }

    /// Construct a whole-number multiplier.
    pub fn whole(n: u32) -> Result<Self, MultiplierError> {
        n.checked_mul(SCALE)
            .map(Self)
            .ok_or_else(|| MultiplierError::OutOfRange(n.to_string()))
    }

    /// Convert a float, rounding to the nearest thousandth.
    ///
    /// Only used at the configuration boundary where scripts may hand us
    /// floating point literals.
    pub fn from_f64(value: f64) -> Result<Self, MultiplierError> {
        if value.is_nan() {
            return Err(MultiplierError::Invalid(value.to_string()));
        }
        if value < 0.0 {
            return Err(MultiplierError::Negative(value.to_string()));
        }
        let milli = (value * f64::from(SCALE)).round();
        if milli > f64::from(u32::MAX) {
            return Err(MultiplierError::OutOfRange(value.to_string()));
        }
        Ok(Self(milli as u32))
    }

    /// The raw thousandths value.
    pub const fn milli(&self) -> u32 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiply a kilobyte count, flooring the fractional part.
    ///
    /// Computed in 128 bits and saturated, so huge transfers cannot wrap.
    pub fn apply(&self, kb: u64) -> u64 {
        let scaled = u128::from(kb) * u128::from(self.0) / u128::from(SCALE);
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl FromStr for Multiplier {
    type Err = MultiplierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MultiplierError::Empty);
        }
        if s.starts_with('-') {
            return Err(MultiplierError::Negative(s.to_string()));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if frac.len() > 3 {
            return Err(MultiplierError::TooPrecise(s.to_string()));
        }
        let digits_ok = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
            return Err(MultiplierError::Invalid(s.to_string()));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| MultiplierError::OutOfRange(s.to_string()))?
        };
        // Right-pad the fraction to thousandths: ".5" -> 500
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<3}")
                .parse()
                .map_err(|_| MultiplierError::Invalid(s.to_string()))?
        };

        whole
            .checked_mul(u64::from(SCALE))
            .and_then(|w| w.checked_add(frac))
            .and_then(|milli| u32::try_from(milli).ok())
            .map(Self)
            .ok_or_else(|| MultiplierError::OutOfRange(s.to_string()))
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / SCALE;
        let frac = self.0 % SCALE;
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let frac = format!("{frac:03}");
            write!(f, "{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl fmt::Debug for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{self}")
    }
}
