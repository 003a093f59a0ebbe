//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.
//! Amounts and ratios are 18-decimal fixed point unless stated otherwise.

// ═══════════════════════════════════════════════════════════════════════════════
// PRECISION
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point unit (1.0 = 10^18)
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// 100% expressed in fixed point
pub const ONE_HUNDRED_PCT: u128 = DECIMAL_PRECISION;

/// One per-mille step (0.1%) in fixed point
pub const PERMILLE: u128 = DECIMAL_PRECISION / 1000;

/// Nominal ICR precision used for the price-independent ordering key
pub const NICR_PRECISION: u128 = 100 * DECIMAL_PRECISION;

/// ln(2) in fixed point
pub const LN_2: u128 = 693_147_180_559_945_309;

/// Hard limit on terms evaluated by the exponential series
pub const EXP_SERIES_MAX_TERMS: u32 = 48;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Running product P starts at one
pub const SP_INITIAL_P: u128 = DECIMAL_PRECISION;

/// P is multiplied by this when it would drop below it (one scale step)
pub const SP_SCALE_FACTOR: u128 = 1_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD ISSUANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Issuance advances in whole minutes
pub const SECONDS_PER_MINUTE: u64 = 60;

/// Minutes in a 365-day year
pub const MINUTES_PER_YEAR: u64 = 525_600;

/// Default half-life of the emission curve: one year
pub const DEFAULT_HALVING_MINUTES: u64 = MINUTES_PER_YEAR;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL PARAMETER DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum collateral ratio - 110%
pub const MCR_DEFAULT: u128 = 1_100_000_000_000_000_000;

/// Critical system collateral ratio - 150%
pub const CCR_DEFAULT: u128 = 1_500_000_000_000_000_000;

/// Flat gas compensation floor - 30 VST
pub const GAS_COMPENSATION_DEFAULT: u128 = 30 * DECIMAL_PRECISION;

/// Minimum net debt of a trove - 300 VST
pub const MIN_NET_DEBT_DEFAULT: u128 = 300 * DECIMAL_PRECISION;

/// Collateral gas compensation divisor - 1%
pub const PERCENT_DIVISOR_DEFAULT: u128 = 100;

/// Borrowing fee floor - 0.5%
pub const BORROWING_FEE_FLOOR_DEFAULT: u128 = 5 * PERMILLE;

/// Maximum borrowing fee - 5%
pub const MAX_BORROWING_FEE_DEFAULT: u128 = 50 * PERMILLE;

/// Redemption fee floor - 0.5%
pub const REDEMPTION_FEE_FLOOR_DEFAULT: u128 = 5 * PERMILLE;

/// Liquidation margin kept by the protocol before any owner surplus - 10%
pub const BONUS_DEFAULT: u128 = 100 * PERMILLE;

/// Margin applied to the stability pool share - 10%
pub const BONUS_TO_SP_DEFAULT: u128 = 100 * PERMILLE;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL PARAMETER BOUNDS
// ═══════════════════════════════════════════════════════════════════════════════

/// MCR lower bound - 101%
pub const MCR_MIN: u128 = 1_010_000_000_000_000_000;
/// MCR upper bound - 10000%
pub const MCR_MAX: u128 = 100 * DECIMAL_PRECISION;

/// CCR lower bound - 120%
pub const CCR_MIN: u128 = 1_200_000_000_000_000_000;
/// CCR upper bound - 10000%
pub const CCR_MAX: u128 = 100 * DECIMAL_PRECISION;

/// Gas compensation lower bound - 1 VST
pub const GAS_COMPENSATION_MIN: u128 = DECIMAL_PRECISION;
/// Gas compensation upper bound - 200 VST
pub const GAS_COMPENSATION_MAX: u128 = 200 * DECIMAL_PRECISION;

/// Minimum net debt upper bound - 1800 VST
pub const MIN_NET_DEBT_MAX: u128 = 1800 * DECIMAL_PRECISION;

/// Percent divisor lower bound
pub const PERCENT_DIVISOR_MIN: u128 = 2;
/// Percent divisor upper bound
pub const PERCENT_DIVISOR_MAX: u128 = 200;

/// Borrowing fee floor upper bound, per-mille
pub const BORROWING_FEE_FLOOR_MAX_PERMILLE: u128 = 50;

/// Maximum borrowing fee upper bound, per-mille
pub const MAX_BORROWING_FEE_MAX_PERMILLE: u128 = 200;

/// Redemption fee floor lower bound, per-mille
pub const REDEMPTION_FEE_FLOOR_MIN_PERMILLE: u128 = 3;
/// Redemption fee floor upper bound, per-mille
pub const REDEMPTION_FEE_FLOOR_MAX_PERMILLE: u128 = 100;

/// Liquidation margin upper bound - 20%
pub const BONUS_MAX: u128 = 200 * PERMILLE;

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum accepted price age in seconds
pub const MAX_PRICE_AGE_SECS: u64 = 3600;

/// Upper bound on troves liquidated in one batch
pub const MAX_BATCH_SIZE: usize = 100;

/// Events kept in memory before the oldest are pruned
pub const MAX_EVENT_LOG_SIZE: usize = 10_000;

/// Address length in bytes
pub const ADDRESS_LENGTH: usize = 20;

/// Hash length in bytes
pub const HASH_LENGTH: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_within_bounds() {
        assert!(MCR_DEFAULT >= MCR_MIN && MCR_DEFAULT <= MCR_MAX);
        assert!(CCR_DEFAULT >= CCR_MIN && CCR_DEFAULT <= CCR_MAX);
        assert!(CCR_DEFAULT >= MCR_DEFAULT);
        assert!(GAS_COMPENSATION_DEFAULT >= GAS_COMPENSATION_MIN);
        assert!(GAS_COMPENSATION_DEFAULT <= GAS_COMPENSATION_MAX);
        assert!(MIN_NET_DEBT_DEFAULT <= MIN_NET_DEBT_MAX);
        assert!(PERCENT_DIVISOR_DEFAULT >= PERCENT_DIVISOR_MIN);
        assert!(PERCENT_DIVISOR_DEFAULT <= PERCENT_DIVISOR_MAX);
        assert!(BORROWING_FEE_FLOOR_DEFAULT <= BORROWING_FEE_FLOOR_MAX_PERMILLE * PERMILLE);
        assert!(MAX_BORROWING_FEE_DEFAULT <= MAX_BORROWING_FEE_MAX_PERMILLE * PERMILLE);
        assert!(REDEMPTION_FEE_FLOOR_DEFAULT >= REDEMPTION_FEE_FLOOR_MIN_PERMILLE * PERMILLE);
        assert!(BONUS_DEFAULT <= BONUS_MAX);
        assert!(BONUS_TO_SP_DEFAULT <= BONUS_MAX);
    }

    #[test]
    fn test_precision_relationships() {
        assert_eq!(PERMILLE * 1000, DECIMAL_PRECISION);
        assert_eq!(SP_SCALE_FACTOR * SP_SCALE_FACTOR, DECIMAL_PRECISION);
        assert_eq!(MINUTES_PER_YEAR, 365 * 24 * 60);
    }
}
