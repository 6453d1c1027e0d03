//! Fixed-point decimal arithmetic
//!
//! All amounts, prices and fees are `Decimal`s held at 18 decimal places.
//! Multiplication and division round half away from zero at the last place,
//! so repeated fee and payout calculations do not drift in one direction.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Number of decimal places carried by every fixed-point value
pub const DECIMALS: u32 = 18;

/// Arithmetic errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    /// Result does not fit the decimal representation
    #[error("Arithmetic overflow")]
    Overflow,
    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,
    /// A floating-point intermediate was NaN or infinite
    #[error("Value is not finite")]
    NotFinite,
}

/// Smallest representable amount (1e-18)
pub fn smallest_unit() -> Decimal {
    Decimal::new(1, DECIMALS)
}

/// Round a value to 18 places, half away from zero
pub fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Add two fixed-point values
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// Multiply two fixed-point values with round-half-up
pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_mul(b).map(round).ok_or(MathError::Overflow)
}

/// Divide two fixed-point values with round-half-up
pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    if b.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    a.checked_div(b).map(round).ok_or(MathError::Overflow)
}

/// Convert a float intermediate back to an 18-place decimal
pub fn from_f64(value: f64) -> Result<Decimal, MathError> {
    if !value.is_finite() {
        return Err(MathError::NotFinite);
    }
    Decimal::try_from(value)
        .map(round)
        .map_err(|_| MathError::Overflow)
}

/// Lossy conversion for float-based models
pub fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

/// `1 - value`
pub fn complement(value: Decimal) -> Decimal {
    Decimal::ONE - value
}

/// Subtract, flooring at zero
pub fn saturating_sub(a: Decimal, b: Decimal) -> Decimal {
    if a > b {
        a - b
    } else {
        Decimal::ZERO
    }
}

/// Clamp a value to `[lo, hi]`
pub fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}
