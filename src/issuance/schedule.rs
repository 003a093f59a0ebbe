//! Time-decaying emission schedule of a single pool.
//!
//! The cumulative share of a pool's supply cap emitted after `t` whole minutes is
//!
//! ```text
//! f(t) = 1 - 2^(-t / H)
//! ```
//!
//! where `H` is the half-life in minutes. `f` starts at zero, never decreases,
//! reaches one half after `H` minutes and approaches one.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::SECONDS_PER_MINUTE;
use crate::utils::math::{format_amount, mul_div, pow2_neg, safe_add, FixedPoint};

/// Cumulative fraction of the cap emitted after `elapsed_minutes`
pub fn issuance_fraction(elapsed_minutes: u64, halving_minutes: u64) -> Result<FixedPoint> {
    let remaining = pow2_neg(elapsed_minutes, halving_minutes)?;
    Ok(FixedPoint::ONE.saturating_sub(remaining))
}

/// Supply cap, anchor and cumulative issuance of one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceSchedule {
    /// Maximum the pool may ever emit
    pub supply_cap: u128,
    /// Timestamp emission is measured from
    pub anchor: u64,
    /// Emitted so far
    pub total_issued: u128,
}

impl IssuanceSchedule {
    /// Start a schedule at `now`
    pub fn start(supply_cap: u128, now: u64) -> Self {
        Self {
            supply_cap,
            anchor: now,
            total_issued: 0,
        }
    }

    /// Check if anything remains to be emitted or has been funded
    pub fn is_active(&self) -> bool {
        self.supply_cap > 0
    }

    /// Cap not yet emitted
    pub fn unissued(&self) -> u128 {
        self.supply_cap.saturating_sub(self.total_issued)
    }

    /// Whole minutes since the anchor; a clock behind the anchor counts as zero
    pub fn elapsed_minutes(&self, now: u64) -> u64 {
        now.saturating_sub(self.anchor) / SECONDS_PER_MINUTE
    }

    /// Cumulative fraction emitted at `now`
    pub fn cumulative_fraction(&self, now: u64, halving_minutes: u64) -> Result<FixedPoint> {
        if !self.is_active() {
            return Ok(FixedPoint::ZERO);
        }
        issuance_fraction(self.elapsed_minutes(now), halving_minutes)
    }

    /// Amount due at `now` but not yet issued. Never exceeds `unissued()`.
    pub fn pending(&self, now: u64, halving_minutes: u64) -> Result<u128> {
        let fraction = self.cumulative_fraction(now, halving_minutes)?;
        let target = mul_div(self.supply_cap, fraction.raw(), FixedPoint::SCALE)?.min(self.supply_cap);
        Ok(target.saturating_sub(self.total_issued))
    }

    /// Record `amount` as issued
    pub fn record_issued(&mut self, amount: u128) -> Result<()> {
        let issued = safe_add(self.total_issued, amount)?;
        if issued > self.supply_cap {
            return Err(Error::InvariantViolation(format!(
                "issued {} exceeds supply cap {}",
                format_amount(issued),
                format_amount(self.supply_cap)
            )));
        }
        self.total_issued = issued;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::{DECIMAL_PRECISION, MINUTES_PER_YEAR};

    const E18: u128 = DECIMAL_PRECISION;

    fn fraction(minutes: u64) -> u128 {
        issuance_fraction(minutes, MINUTES_PER_YEAR).unwrap().raw()
    }

    #[test]
    fn test_fraction_starts_at_zero() {
        assert_eq!(fraction(0), 0);
    }

    #[test]
    fn test_fraction_half_lives() {
        assert_eq!(fraction(MINUTES_PER_YEAR), E18 / 2);
        assert_eq!(fraction(2 * MINUTES_PER_YEAR), 3 * E18 / 4);
        assert_eq!(fraction(3 * MINUTES_PER_YEAR), 7 * E18 / 8);
    }

    #[test]
    fn test_fraction_saturates() {
        assert_eq!(fraction(200 * MINUTES_PER_YEAR), E18);
        assert!(fraction(u64::MAX) <= E18);
    }

    #[test]
    fn test_pending_capped_and_clock_skew() {
        let schedule = IssuanceSchedule::start(1_000 * E18, 10_000);
        // Clock behind the anchor emits nothing
        assert_eq!(schedule.pending(5_000, MINUTES_PER_YEAR).unwrap(), 0);
        // Far future emits at most the cap
        let far = 10_000 + 500 * MINUTES_PER_YEAR * SECONDS_PER_MINUTE;
        assert_eq!(schedule.pending(far, MINUTES_PER_YEAR).unwrap(), 1_000 * E18);
    }

    #[test]
    fn test_no_emission_within_first_minute() {
        let schedule = IssuanceSchedule::start(1_000 * E18, 0);
        assert_eq!(schedule.pending(59, MINUTES_PER_YEAR).unwrap(), 0);
        assert!(schedule.pending(60, MINUTES_PER_YEAR).unwrap() > 0);
    }

    #[test]
    fn test_record_issued_beyond_cap() {
        let mut schedule = IssuanceSchedule::start(10, 0);
        schedule.record_issued(10).unwrap();
        assert!(matches!(schedule.record_issued(1), Err(Error::InvariantViolation(_))));
        assert_eq!(schedule.unissued(), 0);
    }
}
