//! Token amounts.
//!
//! Amounts cross the API as [`Decimal`] and are persisted as `i64` minor
//! units (hundredths of a token) so that balance arithmetic in SQL is exact.

use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Number of decimal places a token amount may carry.
pub const TOKEN_SCALE: u32 = 2;

/// Converts a decimal amount into minor units.
///
/// Amounts with more than two significant decimal places are rejected, not rounded.
pub fn to_minor(amount: Decimal) -> Result<i64> {
    let normalized = amount.normalize();
    if normalized.scale() > TOKEN_SCALE {
        return Err(Error::InvalidAmount { amount });
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or(Error::InvalidAmount { amount })
}

/// Converts minor units back into a decimal with scale 2.
#[must_use]
pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, TOKEN_SCALE)
}

/// Validates that an amount is strictly positive and returns it in minor units.
pub fn positive_minor(amount: Decimal) -> Result<i64> {
    let minor = to_minor(amount)?;
    if minor <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(minor)
}
