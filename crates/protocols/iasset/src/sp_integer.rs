//! 18-decimal integers for stability pool accounting
//!
//! Products of two pool values reach ~10^45, beyond `i128`, so multiplication
//! and division go through `BigInt` and are narrowed back afterwards.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use crate::constants::stability_pool::SP_PRECISION;

/// Signed integer scaled by 10^18
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SpInteger(i128);

/// `floor(a / b)` on big integers (`BigInt` division truncates)
fn big_floor_div(a: BigInt, b: &BigInt) -> BigInt {
    let quotient = &a / b;
    let remainder = &a % b;
    if !remainder.is_zero() && (a.is_negative() != b.is_negative()) {
        quotient - 1
    } else {
        quotient
    }
}

fn narrow(value: BigInt) -> i128 {
    value.to_i128().unwrap_or(if value.is_negative() {
        i128::MIN
    } else {
        i128::MAX
    })
}

impl SpInteger {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SP_PRECISION);

    pub const fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    /// Whole amount `n`
    pub const fn from_int(n: i64) -> Self {
        Self(n as i128 * SP_PRECISION)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    /// Floor back to a whole amount
    pub fn to_int(self) -> i64 {
        let whole = self.0.div_euclid(SP_PRECISION);
        whole.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// `floor(a * b / 10^18)`
    pub fn mul(self, rhs: Self) -> Self {
        let product = BigInt::from(self.0) * BigInt::from(rhs.0);
        Self(narrow(big_floor_div(product, &BigInt::from(SP_PRECISION))))
    }

    /// `floor(a * 10^18 / b)`, `None` on a zero divisor
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let scaled = BigInt::from(self.0) * BigInt::from(SP_PRECISION);
        Some(Self(narrow(big_floor_div(scaled, &BigInt::from(rhs.0)))))
    }

    /// Multiply by a plain integer factor
    pub fn mul_scalar(self, factor: i128) -> Self {
        Self(narrow(BigInt::from(self.0) * BigInt::from(factor)))
    }

    /// Divide by a plain integer, flooring. `None` on a zero divisor.
    pub fn div_scalar(self, divisor: i128) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        Some(Self(narrow(big_floor_div(
            BigInt::from(self.0),
            &BigInt::from(divisor),
        ))))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for SpInteger {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SpInteger {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SpInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
