//! Input validation utilities.
//!
//! Validation runs before any state is touched, so a failed check never leaves
//! a partial write behind.

use crate::error::{Error, Result};
use crate::utils::math::format_amount;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: u128) -> Result<()> {
    if amount == 0 {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

/// Validate that an account balance covers a transfer
pub fn validate_balance(required: u128, available: u128) -> Result<()> {
    if available < required {
        return Err(Error::InsufficientBalance { required, available });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate a fixed-point parameter against inclusive bounds
pub fn validate_in_bounds(name: &str, value: u128, min: u128, max: u128) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!(
                "value {} outside bounds [{}, {}]",
                format_amount(value),
                format_amount(min),
                format_amount(max)
            ),
        });
    }
    Ok(())
}

/// Validate a plain integer parameter against inclusive bounds
pub fn validate_integer_in_bounds(name: &str, value: u128, min: u128, max: u128) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!("value {} outside bounds [{}, {}]", value, min, max),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate price freshness against the injected clock
pub fn validate_price_freshness(updated_at: u64, now: u64, max_age: u64) -> Result<()> {
    let age = now.saturating_sub(updated_at);
    if age > max_age {
        return Err(Error::StalePrice { age, max_age });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DECIMAL_PRECISION;

    #[test]
    fn test_validate_non_zero() {
        assert!(validate_non_zero(1).is_ok());
        assert_eq!(validate_non_zero(0), Err(Error::ZeroAmount));
    }

    #[test]
    fn test_validate_balance() {
        assert!(validate_balance(5, 5).is_ok());
        assert_eq!(
            validate_balance(6, 5),
            Err(Error::InsufficientBalance { required: 6, available: 5 })
        );
    }

    #[test]
    fn test_validate_in_bounds_message() {
        let err = validate_in_bounds("mcr", DECIMAL_PRECISION, 2 * DECIMAL_PRECISION, 3 * DECIMAL_PRECISION)
            .unwrap_err();
        assert!(err.to_string().contains("outside bounds [2, 3]"));
        assert!(validate_integer_in_bounds("divisor", 2, 2, 200).is_ok());
        assert!(validate_integer_in_bounds("divisor", 201, 2, 200).is_err());
    }

    #[test]
    fn test_price_freshness() {
        assert!(validate_price_freshness(100, 150, 60).is_ok());
        assert!(matches!(
            validate_price_freshness(100, 200, 60),
            Err(Error::StalePrice { age: 100, max_age: 60 })
        ));
        // A reading from the future is not stale
        assert!(validate_price_freshness(300, 200, 60).is_ok());
    }
}
