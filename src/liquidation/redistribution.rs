//! Redistribution of unabsorbed debt and collateral to active troves.
//!
//! When the stability pool cannot absorb a liquidated trove's whole debt, the
//! shortfall is spread over every remaining trove in proportion to its stake.
//! Rather than touching each trove, the per-unit-stake rewards accumulate in
//! `L_coll` and `L_debt`; a trove reconciles lazily the next time it is read or
//! mutated, using the difference between the current accumulators and the
//! snapshot it took on its last touch.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::DECIMAL_PRECISION;
use crate::utils::math::{mul_div, per_unit_with_carry, safe_add, safe_sub};

/// Accumulator values recorded by a trove on its last touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    /// `L_coll` at snapshot time
    pub coll: u128,
    /// `L_debt` at snapshot time
    pub debt: u128,
}

/// Redistributed collateral and debt owed to a trove but not yet applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingGains {
    /// Pending collateral reward
    pub coll: u128,
    /// Pending debt reward
    pub debt: u128,
}

impl PendingGains {
    /// True when nothing is owed
    pub fn is_empty(&self) -> bool {
        self.coll == 0 && self.debt == 0
    }
}

/// Per-asset reward-per-unit-stake accumulators with error feedback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionAccumulator {
    l_coll: u128,
    l_debt: u128,
    coll_error: u128,
    debt_error: u128,
}

impl RedistributionAccumulator {
    /// Create zeroed accumulators
    pub fn new() -> Self {
        Self::default()
    }

    /// Current collateral reward per unit stake
    pub fn l_coll(&self) -> u128 {
        self.l_coll
    }

    /// Current debt reward per unit stake
    pub fn l_debt(&self) -> u128 {
        self.l_debt
    }

    /// Snapshot for a trove being touched now
    pub fn snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            coll: self.l_coll,
            debt: self.l_debt,
        }
    }

    /// Spread `coll` and `debt` over `total_stakes`.
    ///
    /// The division remainder of each numerator is carried into the next call so
    /// no dust is lost across repeated redistributions.
    pub fn redistribute(&mut self, coll: u128, debt: u128, total_stakes: u128) -> Result<()> {
        if debt == 0 && coll == 0 {
            return Ok(());
        }
        if total_stakes == 0 {
            return Err(Error::InvariantViolation(
                "redistribution with no remaining stake".into(),
            ));
        }

        let (coll_per_stake, coll_error) = per_unit_with_carry(coll, self.coll_error, total_stakes)?;
        let (debt_per_stake, debt_error) = per_unit_with_carry(debt, self.debt_error, total_stakes)?;

        let next = Self {
            l_coll: safe_add(self.l_coll, coll_per_stake)?,
            l_debt: safe_add(self.l_debt, debt_per_stake)?,
            coll_error,
            debt_error,
        };
        *self = next;

        tracing::debug!(
            l_coll = self.l_coll,
            l_debt = self.l_debt,
            total_stakes,
            "redistribution accumulators updated"
        );
        Ok(())
    }
}

/// Gains owed to a trove with `stake` that last snapshotted at `snapshot`.
///
/// Pure: reconciliation is a function of (position, snapshot, accumulators).
pub fn pending_gains(
    stake: u128,
    snapshot: &RewardSnapshot,
    accumulator: &RedistributionAccumulator,
) -> Result<PendingGains> {
    if stake == 0 {
        return Ok(PendingGains::default());
    }
    let coll_delta = safe_sub(accumulator.l_coll, snapshot.coll)?;
    let debt_delta = safe_sub(accumulator.l_debt, snapshot.debt)?;
    Ok(PendingGains {
        coll: mul_div(stake, coll_delta, DECIMAL_PRECISION)?,
        debt: mul_div(stake, debt_delta, DECIMAL_PRECISION)?,
    })
}
