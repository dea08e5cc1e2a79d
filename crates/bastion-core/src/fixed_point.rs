//! Six-decimal fixed-point numbers
//!
//! Prices, rates, ratios and percentages all travel as `FixedPoint`: a signed
//! integer scaled by [`UNIT`]. Multiplication and division floor toward
//! negative infinity, matching the ledger validator's integer `divide`.
//! Only [`FixedPoint::ceil`] rounds up.
//!
//! Percentages use the same scale, so `100% == 100 * UNIT`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Scale of one whole unit
pub const UNIT: i64 = 1_000_000;

/// 100% expressed as a raw percentage value
pub const ONE_HUNDRED_PERCENT_RAW: i64 = 100 * UNIT;

/// Integer division rounding toward negative infinity.
///
/// Panics on a zero divisor like the primitive operator; callers guard.
pub fn floor_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 && (numerator < 0) != (denominator < 0) {
        quotient - 1
    } else {
        quotient
    }
}

/// Integer division rounding toward positive infinity
pub fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    -floor_div(-numerator, denominator)
}

/// Narrow an intermediate back to `i64`, saturating at the bounds
pub fn saturate_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Fee charged on `amount` at percentage `pct`.
///
/// Never negative: a negative amount or percentage yields zero.
pub fn fee_from_percentage(pct: FixedPoint, amount: i64) -> i64 {
    if amount < 0 || pct.0 < 0 {
        return 0;
    }
    saturate_i64(floor_div(
        amount as i128 * pct.0 as i128,
        ONE_HUNDRED_PERCENT_RAW as i128,
    ))
}

/// Signed decimal with six fractional digits
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FixedPoint(i64);

impl FixedPoint {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(UNIT);
    pub const ONE_HUNDRED_PERCENT: Self = Self(ONE_HUNDRED_PERCENT_RAW);

    /// Wrap an already-scaled integer
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Whole number `n` (saturating)
    pub const fn from_int(n: i64) -> Self {
        Self(n.saturating_mul(UNIT))
    }

    /// Percentage `n`%, e.g. `percent(150)` for a 150% ratio
    pub const fn percent(n: i64) -> Self {
        Self::from_int(n)
    }

    /// The scaled integer
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `floor(a * b / UNIT)`
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let v = floor_div(self.0 as i128 * rhs.0 as i128, UNIT as i128);
        i64::try_from(v).ok().map(Self)
    }

    /// `floor(a * UNIT / b)`, `None` on a zero divisor or overflow
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let v = floor_div(self.0 as i128 * UNIT as i128, rhs.0 as i128);
        i64::try_from(v).ok().map(Self)
    }

    /// Smallest integer not below this value
    pub fn ceil(self) -> i64 {
        ceil_div(self.0 as i128, UNIT as i128) as i64
    }

    /// Largest integer not above this value
    pub fn floor(self) -> i64 {
        floor_div(self.0 as i128, UNIT as i128) as i64
    }

    /// `floor(amount * self)` for an integer amount, e.g. asset units times price
    pub fn mul_int(self, amount: i64) -> i64 {
        saturate_i64(floor_div(amount as i128 * self.0 as i128, UNIT as i128))
    }

    /// `floor(amount / self)` for an integer amount, `None` on a zero divisor
    pub fn div_int(self, amount: i64) -> Option<i64> {
        if self.0 == 0 {
            return None;
        }
        Some(saturate_i64(floor_div(
            amount as i128 * UNIT as i128,
            self.0 as i128,
        )))
    }

    /// Convert a percentage (`150%`) to its fraction (`1.5`)
    pub fn percent_to_fraction(self) -> Self {
        Self(saturate_i64(floor_div(self.0 as i128, 100)))
    }
}

impl Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for FixedPoint {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul for FixedPoint {
    type Output = Self;

    /// Floored product, saturating on overflow
    fn mul(self, rhs: Self) -> Self {
        Self(saturate_i64(floor_div(
            self.0 as i128 * rhs.0 as i128,
            UNIT as i128,
        )))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = (self.0 as i128).abs();
        write!(
            f,
            "{}{}.{:06}",
            sign,
            abs / UNIT as i128,
            abs % UNIT as i128
        )
    }
}
