//! Per-asset collateral and debt pools.
//!
//! Plain balance holders with no logic of their own:
//! - Active pool: collateral and debt of open troves
//! - Default pool: redistributed collateral and debt not yet applied to troves
//! - Collateral surplus pool: owner claims left over after liquidation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;
use crate::utils::math::{safe_add, safe_sub};

/// Collateral and debt held by one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBalance {
    /// Collateral held
    pub coll: u128,
    /// Debt recorded
    pub debt: u128,
}

/// The ledgers of a single collateral asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralPools {
    active: PoolBalance,
    default: PoolBalance,
    surplus_total: u128,
    surplus_claims: HashMap<Address, u128>,
}

impl CollateralPools {
    /// Create empty pools
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Active pool balances
    pub fn active(&self) -> PoolBalance {
        self.active
    }

    /// Default pool balances
    pub fn default_pool(&self) -> PoolBalance {
        self.default
    }

    /// Active plus default collateral
    pub fn entire_system_coll(&self) -> u128 {
        self.active.coll.saturating_add(self.default.coll)
    }

    /// Active plus default debt
    pub fn entire_system_debt(&self) -> u128 {
        self.active.debt.saturating_add(self.default.debt)
    }

    /// Total collateral waiting to be claimed by liquidated owners
    pub fn surplus_total(&self) -> u128 {
        self.surplus_total
    }

    /// Collateral claimable by `owner`
    pub fn surplus_of(&self, owner: &Address) -> u128 {
        self.surplus_claims.get(owner).copied().unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACTIVE POOL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Collateral deposited by a borrower
    pub fn receive_collateral(&mut self, amount: u128) -> Result<()> {
        self.active.coll = safe_add(self.active.coll, amount)?;
        Ok(())
    }

    /// Collateral leaving the system (payouts, repayments)
    pub fn send_collateral(&mut self, amount: u128) -> Result<()> {
        self.active.coll = safe_sub(self.active.coll, amount)?;
        Ok(())
    }

    /// Debt minted against a trove
    pub fn increase_debt(&mut self, amount: u128) -> Result<()> {
        self.active.debt = safe_add(self.active.debt, amount)?;
        Ok(())
    }

    /// Debt repaid or absorbed by the stability pool
    pub fn decrease_debt(&mut self, amount: u128) -> Result<()> {
        self.active.debt = safe_sub(self.active.debt, amount)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEFAULT POOL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move redistributed collateral and debt out of the active pool
    pub fn move_to_default(&mut self, coll: u128, debt: u128) -> Result<()> {
        let active = PoolBalance {
            coll: safe_sub(self.active.coll, coll)?,
            debt: safe_sub(self.active.debt, debt)?,
        };
        let default = PoolBalance {
            coll: safe_add(self.default.coll, coll)?,
            debt: safe_add(self.default.debt, debt)?,
        };
        self.active = active;
        self.default = default;
        Ok(())
    }

    /// Move a trove's pending rewards back into the active pool
    pub fn move_to_active(&mut self, coll: u128, debt: u128) -> Result<()> {
        let default = PoolBalance {
            coll: safe_sub(self.default.coll, coll).map_err(|_| {
                Error::InvariantViolation("pending collateral exceeds default pool".into())
            })?,
            debt: safe_sub(self.default.debt, debt).map_err(|_| {
                Error::InvariantViolation("pending debt exceeds default pool".into())
            })?,
        };
        let active = PoolBalance {
            coll: safe_add(self.active.coll, coll)?,
            debt: safe_add(self.active.debt, debt)?,
        };
        self.default = default;
        self.active = active;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COLLATERAL SURPLUS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move surplus collateral from the active pool into `owner`'s claim
    pub fn credit_surplus(&mut self, owner: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let active_coll = safe_sub(self.active.coll, amount)?;
        let claim = safe_add(self.surplus_of(owner), amount)?;
        self.surplus_total = safe_add(self.surplus_total, amount)?;
        self.active.coll = active_coll;
        self.surplus_claims.insert(*owner, claim);
        Ok(())
    }

    /// Remove and return `owner`'s whole claim
    pub fn take_surplus(&mut self, owner: &Address) -> Result<u128> {
        let claim = self.surplus_claims.remove(owner).unwrap_or(0);
        if claim == 0 {
            return Err(Error::InvalidParameter {
                name: "owner".into(),
                reason: format!("no collateral surplus to claim for {}", owner),
            });
        }
        self.surplus_total = safe_sub(self.surplus_total, claim)?;
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_default_moves() {
        let mut pools = CollateralPools::new();
        pools.receive_collateral(100).unwrap();
        pools.increase_debt(50).unwrap();

        pools.move_to_default(40, 20).unwrap();
        assert_eq!(pools.active(), PoolBalance { coll: 60, debt: 30 });
        assert_eq!(pools.default_pool(), PoolBalance { coll: 40, debt: 20 });
        assert_eq!(pools.entire_system_coll(), 100);
        assert_eq!(pools.entire_system_debt(), 50);

        pools.move_to_active(10, 5).unwrap();
        assert_eq!(pools.default_pool(), PoolBalance { coll: 30, debt: 15 });
    }

    #[test]
    fn test_move_to_active_beyond_default_is_invariant_violation() {
        let mut pools = CollateralPools::new();
        assert!(matches!(pools.move_to_active(1, 0), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_failed_move_leaves_state_untouched() {
        let mut pools = CollateralPools::new();
        pools.receive_collateral(10).unwrap();
        assert!(pools.move_to_default(5, 1).is_err());
        assert_eq!(pools.active(), PoolBalance { coll: 10, debt: 0 });
        assert_eq!(pools.default_pool(), PoolBalance::default());
    }

    #[test]
    fn test_surplus_claims() {
        let owner = Address::from_label("alice");
        let mut pools = CollateralPools::new();
        pools.receive_collateral(100).unwrap();
        pools.credit_surplus(&owner, 30).unwrap();
        pools.credit_surplus(&owner, 5).unwrap();

        assert_eq!(pools.surplus_of(&owner), 35);
        assert_eq!(pools.active().coll, 65);
        assert_eq!(pools.take_surplus(&owner).unwrap(), 35);
        assert_eq!(pools.surplus_total(), 0);
        assert!(pools.take_surplus(&owner).is_err());
    }
}
