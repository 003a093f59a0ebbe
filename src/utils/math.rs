//! Fixed-point arithmetic and mathematical utilities.
//!
//! All protocol amounts, prices and ratios are unsigned 18-decimal fixed point.
//! Products of two such values are taken in 256 bits before being divided back
//! down, so `a * b / c` never loses intermediate precision or overflows while the
//! final result fits in `u128`.

use num_traits::{CheckedAdd, CheckedSub, ToPrimitive, Zero};
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::constants::{
    DECIMAL_PRECISION, EXP_SERIES_MAX_TERMS, LN_2, NICR_PRECISION, PERMILLE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point number with 18 decimal places precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
pub struct FixedPoint(u128);

impl FixedPoint {
    /// Scale factor: 10^18
    pub const SCALE: u128 = DECIMAL_PRECISION;

    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(Self::SCALE);

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Create from an integer (scales up)
    pub const fn from_integer(value: u64) -> Self {
        Self(value as u128 * Self::SCALE)
    }

    /// Create from percentage (100 = 100%)
    pub const fn from_percent(pct: u64) -> Self {
        Self(pct as u128 * Self::SCALE / 100)
    }

    /// Create from per-mille (1000 = 100%)
    pub const fn from_permille(permille: u64) -> Self {
        Self(permille as u128 * PERMILLE)
    }

    /// Parse a decimal string such as `"1.07"` or `"2500"`
    pub fn from_decimal_str(value: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameter {
            name: "decimal".into(),
            reason: format!("{:?}: {}", value, reason),
        };
        let parsed = Decimal::from_str(value.trim()).map_err(|e| invalid(&e.to_string()))?;
        if parsed.is_sign_negative() {
            return Err(invalid("negative values are not representable"));
        }
        let scaled = parsed
            .checked_mul(Decimal::from(Self::SCALE as u64))
            .ok_or_else(|| invalid("out of range"))?;
        scaled
            .trunc()
            .to_u128()
            .map(Self)
            .ok_or_else(|| invalid("out of range"))
    }

    /// Get the raw underlying value
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Whole units, rounding down
    pub const fn to_integer_floor(&self) -> u128 {
        self.0 / Self::SCALE
    }

    /// Check if value is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Fixed-point multiplication, rounding down
    pub fn checked_mul(&self, other: Self) -> Result<Self> {
        mul_div(self.0, other.0, Self::SCALE).map(Self)
    }

    /// Fixed-point division, rounding down
    pub fn checked_div(&self, other: Self) -> Result<Self> {
        mul_div(self.0, Self::SCALE, other.0).map(Self)
    }

    /// Scale a raw token amount by this factor, rounding down
    pub fn apply_to(&self, amount: u128) -> Result<u128> {
        mul_div(amount, self.0, Self::SCALE)
    }

    /// Saturating subtraction
    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Minimum of two values
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Maximum of two values
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Lossless conversion for display, when the value fits a `Decimal`
    pub fn to_decimal(&self) -> Option<Decimal> {
        i128::try_from(self.0)
            .ok()
            .and_then(|mantissa| Decimal::try_from_i128_with_scale(mantissa, 18).ok())
            .map(|d| d.normalize())
    }
}

impl Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Zero for FixedPoint {
    fn zero() -> Self {
        Self::ZERO
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl CheckedAdd for FixedPoint {
    fn checked_add(&self, v: &Self) -> Option<Self> {
        self.0.checked_add(v.0).map(Self)
    }
}

impl CheckedSub for FixedPoint {
    fn checked_sub(&self, v: &Self) -> Option<Self> {
        self.0.checked_sub(v.0).map(Self)
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(d) => write!(f, "{}", d),
            None => write!(f, "{}.{:018}", self.0 / Self::SCALE, self.0 % Self::SCALE),
        }
    }
}

/// Render a raw 18-decimal token amount for logs and terminal output
pub fn format_amount(raw: u128) -> String {
    FixedPoint::from_raw(raw).to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

/// Safe division with zero check
pub fn safe_div(a: u128, b: u128) -> Result<u128> {
    if b == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("{} / 0", a),
        });
    }
    Ok(a / b)
}

fn narrow(value: U256, operation: impl FnOnce() -> String) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: operation(),
        });
    }
    Ok(value.low_u128())
}

/// Computes `(a * b) / c` with a 256-bit intermediate, rounding down
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * {}) / 0", a, b),
        });
    }
    let result = U256::from(a) * U256::from(b) / U256::from(c);
    narrow(result, || format!("({} * {}) / {}", a, b, c))
}

/// Computes `(a * b) / c` with a 256-bit intermediate, rounding up
pub fn mul_div_up(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("ceil(({} * {}) / 0)", a, b),
        });
    }
    let divisor = U256::from(c);
    let numerator = U256::from(a) * U256::from(b);
    let mut result = numerator / divisor;
    if !(numerator % divisor).is_zero() {
        result = result + U256::one();
    }
    narrow(result, || format!("ceil(({} * {}) / {})", a, b, c))
}

/// Per-unit share `(amount * 1e18 + carry) / divisor`, rounding down.
///
/// Returns the quotient and the remainder to carry into the next division.
pub fn per_unit_with_carry(amount: u128, carry: u128, divisor: u128) -> Result<(u128, u128)> {
    if divisor == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * 1e18 + {}) / 0", amount, carry),
        });
    }
    let divisor_wide = U256::from(divisor);
    let numerator = U256::from(amount) * U256::from(DECIMAL_PRECISION) + U256::from(carry);
    let quotient = numerator / divisor_wide;
    let remainder = numerator - quotient * divisor_wide;
    let quotient = narrow(quotient, || format!("({} * 1e18 + {}) / {}", amount, carry, divisor))?;
    Ok((quotient, remainder.low_u128()))
}

/// Computes `a * b / c / d` with a 256-bit intermediate, each division rounding down
pub fn mul_div_div(a: u128, b: u128, c: u128, d: u128) -> Result<u128> {
    if c == 0 || d == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("{} * {} / {} / {}", a, b, c, d),
        });
    }
    let result = U256::from(a) * U256::from(b) / U256::from(c) / U256::from(d);
    narrow(result, || format!("{} * {} / {} / {}", a, b, c, d))
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateralization ratio `coll * price / debt` in fixed point.
///
/// Zero debt is treated as an infinitely safe position and returns `u128::MAX`;
/// ratios too large to represent saturate the same way.
pub fn compute_cr(coll: u128, debt: u128, price: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div(coll, price, debt).unwrap_or(u128::MAX)
}

/// Price-independent ratio `coll * 1e20 / debt` used to order troves
pub fn compute_nominal_cr(coll: u128, debt: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div(coll, NICR_PRECISION, debt).unwrap_or(u128::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPONENTIAL DECAY
// ═══════════════════════════════════════════════════════════════════════════════

/// `e^(-x)` for `0 <= x <= 1`, from a bounded alternating Taylor series.
///
/// Odd and even terms are summed separately so the computation stays unsigned.
/// Each term is floored, so the error is at most one unit per evaluated term.
pub fn exp_neg(x: FixedPoint) -> Result<FixedPoint> {
    if x > FixedPoint::ONE {
        return Err(Error::InvalidParameter {
            name: "x".into(),
            reason: format!("exp(-x) series requires x <= 1, got {}", x),
        });
    }

    let mut positive = FixedPoint::SCALE;
    let mut negative = 0u128;
    let mut term = FixedPoint::SCALE;

    for k in 1..=EXP_SERIES_MAX_TERMS {
        term = mul_div(term, x.raw(), FixedPoint::SCALE)? / k as u128;
        if term == 0 {
            break;
        }
        if k % 2 == 1 {
            negative = safe_add(negative, term)?;
        } else {
            positive = safe_add(positive, term)?;
        }
    }

    safe_sub(positive, negative)
        .map(FixedPoint::from_raw)
        .map_err(|_| Error::InvariantViolation("exp(-x) series went negative".into()))
}

/// `2^(-numerator / denominator)` in fixed point.
///
/// Whole halvings are exact right shifts of one; the fractional remainder
/// `2^(-r/d) = e^(-r*ln2/d)` comes from [`exp_neg`] with an argument below ln 2.
pub fn pow2_neg(numerator: u64, denominator: u64) -> Result<FixedPoint> {
    if denominator == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("2^(-{} / 0)", numerator),
        });
    }

    let halvings = numerator / denominator;
    let remainder = numerator % denominator;
    if halvings >= 128 {
        return Ok(FixedPoint::ZERO);
    }

    let whole = FixedPoint::SCALE >> halvings;
    let exponent = mul_div(remainder as u128, LN_2, denominator as u128)?;
    let fractional = exp_neg(FixedPoint::from_raw(exponent))?;

    mul_div(whole, fractional.raw(), FixedPoint::SCALE).map(FixedPoint::from_raw)
}
