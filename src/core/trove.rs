//! Trove (collateralized debt position) ledger for one collateral asset.
//!
//! A trove is keyed by its owner within an asset market. The ledger holds:
//! - Trove records and their lifecycle status
//! - Stakes used to weight redistributions
//! - The redistribution accumulator and per-trove reward snapshots
//! - A nominal-ICR ordering index over active troves

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::core::pools::CollateralPools;
use crate::error::{Error, Result};
use crate::liquidation::redistribution::{
    pending_gains, PendingGains, RedistributionAccumulator, RewardSnapshot,
};
use crate::utils::crypto::Address;
use crate::utils::math::{compute_cr, compute_nominal_cr, mul_div, safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum TroveStatus {
    /// Never opened
    #[default]
    NonExistent = 0,
    /// Open, carrying collateral and debt
    Active = 1,
    /// Repaid and closed by its owner
    ClosedByOwner = 2,
    /// Closed by liquidation
    ClosedByLiquidation = 3,
    /// Closed by redemption
    ClosedByRedemption = 4,
}

impl TroveStatus {
    /// Numeric code of the status
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Check if the trove is open
    pub fn is_active(&self) -> bool {
        matches!(self, TroveStatus::Active)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE
// ═══════════════════════════════════════════════════════════════════════════════

/// A single trove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trove {
    /// Owner of the trove
    pub owner: Address,
    /// Collateral, excluding pending redistribution gains
    pub coll: u128,
    /// Debt, excluding pending redistribution gains
    pub debt: u128,
    /// Weight of the trove in redistributions
    pub stake: u128,
    /// Lifecycle status
    pub status: TroveStatus,
    /// Accumulator values at the last touch
    pub reward_snapshot: RewardSnapshot,
}

/// A trove's collateral and debt with pending redistribution gains folded in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntirePosition {
    /// Stored plus pending collateral
    pub coll: u128,
    /// Stored plus pending debt
    pub debt: u128,
    /// The pending portion
    pub pending: PendingGains,
}

impl EntirePosition {
    /// ICR at `price`
    pub fn icr(&self, price: u128) -> u128 {
        compute_cr(self.coll, self.debt, price)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDERING INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Active troves ordered by nominal ICR, lowest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortedTroves {
    ordered: BTreeSet<(u128, Address)>,
    keys: HashMap<Address, u128>,
}

impl SortedTroves {
    /// Insert or move `owner` to `nicr`
    pub fn insert(&mut self, owner: Address, nicr: u128) {
        self.remove(&owner);
        self.ordered.insert((nicr, owner));
        self.keys.insert(owner, nicr);
    }

    /// Remove `owner`, returning whether it was present
    pub fn remove(&mut self, owner: &Address) -> bool {
        match self.keys.remove(owner) {
            Some(nicr) => self.ordered.remove(&(nicr, *owner)),
            None => false,
        }
    }

    /// Check membership
    pub fn contains(&self, owner: &Address) -> bool {
        self.keys.contains_key(owner)
    }

    /// Lowest-ratio trove
    pub fn first(&self) -> Option<Address> {
        self.ordered.iter().next().map(|(_, owner)| *owner)
    }

    /// Owners from lowest to highest nominal ICR
    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        self.ordered.iter().map(|(_, owner)| *owner)
    }

    /// Number of indexed troves
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TROVE MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// All troves of one collateral asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TroveManager {
    troves: HashMap<Address, Trove>,
    sorted: SortedTroves,
    total_stakes: u128,
    total_stakes_snapshot: u128,
    total_collateral_snapshot: u128,
    accumulator: RedistributionAccumulator,
}

impl TroveManager {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get a trove record
    pub fn get(&self, owner: &Address) -> Option<&Trove> {
        self.troves.get(owner)
    }

    /// Status of `owner`'s trove
    pub fn status(&self, owner: &Address) -> TroveStatus {
        self.troves.get(owner).map(|t| t.status).unwrap_or_default()
    }

    /// Number of active troves
    pub fn active_count(&self) -> usize {
        self.sorted.len()
    }

    /// Sum of active stakes
    pub fn total_stakes(&self) -> u128 {
        self.total_stakes
    }

    /// Redistribution accumulators
    pub fn accumulator(&self) -> &RedistributionAccumulator {
        &self.accumulator
    }

    /// Ordering index
    pub fn sorted(&self) -> &SortedTroves {
        &self.sorted
    }

    fn active_trove(&self, owner: &Address) -> Result<&Trove> {
        let trove = self
            .troves
            .get(owner)
            .ok_or_else(|| Error::TroveNotFound(owner.to_string()))?;
        if !trove.status.is_active() {
            return Err(Error::TroveNotActive(owner.to_string()));
        }
        Ok(trove)
    }

    /// Redistribution gains owed to an active trove
    pub fn pending_rewards(&self, owner: &Address) -> Result<PendingGains> {
        let trove = self.active_trove(owner)?;
        pending_gains(trove.stake, &trove.reward_snapshot, &self.accumulator)
    }

    /// Collateral and debt including pending gains, without mutating anything
    pub fn entire_position(&self, owner: &Address) -> Result<EntirePosition> {
        let trove = self.active_trove(owner)?;
        let pending = pending_gains(trove.stake, &trove.reward_snapshot, &self.accumulator)?;
        Ok(EntirePosition {
            coll: safe_add(trove.coll, pending.coll)?,
            debt: safe_add(trove.debt, pending.debt)?,
            pending,
        })
    }

    /// Stake for a trove holding `coll`, relative to the last system snapshot
    pub fn compute_stake(&self, coll: u128) -> Result<u128> {
        if self.total_collateral_snapshot == 0 {
            return Ok(coll);
        }
        if self.total_stakes_snapshot == 0 {
            return Err(Error::InvariantViolation(
                "collateral snapshot without stake snapshot".into(),
            ));
        }
        mul_div(coll, self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a newly opened trove. Pools are updated by the caller.
    pub fn open(&mut self, owner: Address, coll: u128, debt: u128) -> Result<()> {
        if self.status(&owner).is_active() {
            return Err(Error::TroveAlreadyExists(owner.to_string()));
        }
        let stake = self.compute_stake(coll)?;
        let total_stakes = safe_add(self.total_stakes, stake)?;

        self.troves.insert(
            owner,
            Trove {
                owner,
                coll,
                debt,
                stake,
                status: TroveStatus::Active,
                reward_snapshot: self.accumulator.snapshot(),
            },
        );
        self.total_stakes = total_stakes;
        self.sorted.insert(owner, compute_nominal_cr(coll, debt));
        tracing::debug!(owner = %owner, coll, debt, stake, "trove opened");
        Ok(())
    }

    /// Fold pending redistribution gains into the trove and move them from the
    /// default pool to the active pool. Must run before any trove mutation.
    pub fn apply_pending_rewards(
        &mut self,
        owner: &Address,
        pools: &mut CollateralPools,
    ) -> Result<PendingGains> {
        let position = self.entire_position(owner)?;
        let snapshot = self.accumulator.snapshot();

        if !position.pending.is_empty() {
            pools.move_to_active(position.pending.coll, position.pending.debt)?;
        }
        if let Some(trove) = self.troves.get_mut(owner) {
            trove.coll = position.coll;
            trove.debt = position.debt;
            trove.reward_snapshot = snapshot;
        }
        Ok(position.pending)
    }

    /// Replace an active trove's collateral and debt, re-stake and re-index it.
    ///
    /// Callers apply pending rewards first.
    pub fn update_position(&mut self, owner: &Address, coll: u128, debt: u128) -> Result<()> {
        let old_stake = self.active_trove(owner)?.stake;
        let new_stake = self.compute_stake(coll)?;
        let total_stakes = safe_add(safe_sub(self.total_stakes, old_stake)?, new_stake)?;

        if let Some(trove) = self.troves.get_mut(owner) {
            trove.coll = coll;
            trove.debt = debt;
            trove.stake = new_stake;
        }
        self.total_stakes = total_stakes;
        self.sorted.insert(*owner, compute_nominal_cr(coll, debt));
        Ok(())
    }

    /// Close an active trove, dropping its stake and index entry
    pub fn close(&mut self, owner: &Address, status: TroveStatus) -> Result<Trove> {
        if status.is_active() || status == TroveStatus::NonExistent {
            return Err(Error::InvalidParameter {
                name: "status".into(),
                reason: format!("{:?} is not a closed status", status),
            });
        }
        let stake = self.active_trove(owner)?.stake;
        let total_stakes = safe_sub(self.total_stakes, stake)?;

        let closed = match self.troves.get_mut(owner) {
            Some(trove) => {
                let before = trove.clone();
                trove.coll = 0;
                trove.debt = 0;
                trove.stake = 0;
                trove.status = status;
                trove.reward_snapshot = RewardSnapshot::default();
                before
            }
            None => return Err(Error::TroveNotFound(owner.to_string())),
        };
        self.total_stakes = total_stakes;
        self.sorted.remove(owner);
        tracing::debug!(owner = %owner, status = ?status, "trove closed");
        Ok(closed)
    }

    /// Spread an unabsorbed shortfall over the remaining stakes
    pub fn redistribute(&mut self, coll: u128, debt: u128) -> Result<()> {
        self.accumulator.redistribute(coll, debt, self.total_stakes)
    }

    /// Refresh the stake snapshots after a liquidation changed system totals
    pub fn update_system_snapshots(&mut self, pools: &CollateralPools) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = pools.entire_system_coll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DECIMAL_PRECISION;

    const E18: u128 = DECIMAL_PRECISION;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn open(manager: &mut TroveManager, pools: &mut CollateralPools, who: &str, coll: u128, debt: u128) {
        manager.open(addr(who), coll, debt).unwrap();
        pools.receive_collateral(coll).unwrap();
        pools.increase_debt(debt).unwrap();
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TroveStatus::NonExistent.code(), 0);
        assert_eq!(TroveStatus::Active.code(), 1);
        assert_eq!(TroveStatus::ClosedByLiquidation.code(), 3);
    }

    #[test]
    fn test_open_and_duplicate() {
        let mut manager = TroveManager::new();
        manager.open(addr("alice"), 10 * E18, 1_000 * E18).unwrap();
        assert_eq!(manager.status(&addr("alice")), TroveStatus::Active);
        assert_eq!(manager.total_stakes(), 10 * E18);
        assert!(matches!(
            manager.open(addr("alice"), E18, E18),
            Err(Error::TroveAlreadyExists(_))
        ));
    }

    #[test]
    fn test_sorted_by_nominal_icr() {
        let mut manager = TroveManager::new();
        manager.open(addr("safe"), 30 * E18, 1_000 * E18).unwrap();
        manager.open(addr("risky"), 10 * E18, 1_000 * E18).unwrap();
        manager.open(addr("mid"), 20 * E18, 1_000 * E18).unwrap();

        let order: Vec<_> = manager.sorted().iter().collect();
        assert_eq!(order, vec![addr("risky"), addr("mid"), addr("safe")]);
        assert_eq!(manager.sorted().first(), Some(addr("risky")));
    }

    #[test]
    fn test_close_removes_stake_and_index() {
        let mut manager = TroveManager::new();
        manager.open(addr("alice"), 10 * E18, 1_000 * E18).unwrap();
        manager.open(addr("bob"), 5 * E18, 500 * E18).unwrap();

        let closed = manager.close(&addr("alice"), TroveStatus::ClosedByLiquidation).unwrap();
        assert_eq!(closed.coll, 10 * E18);
        assert_eq!(manager.total_stakes(), 5 * E18);
        assert_eq!(manager.active_count(), 1);

        let trove = manager.get(&addr("alice")).unwrap();
        assert_eq!((trove.coll, trove.debt, trove.stake), (0, 0, 0));
        assert_eq!(trove.status, TroveStatus::ClosedByLiquidation);
        assert!(manager.close(&addr("alice"), TroveStatus::ClosedByOwner).is_err());
    }

    #[test]
    fn test_pending_rewards_applied_lazily() {
        let mut manager = TroveManager::new();
        let mut pools = CollateralPools::new();
        open(&mut manager, &mut pools, "alice", 10 * E18, 1_000 * E18);
        open(&mut manager, &mut pools, "bob", 30 * E18, 1_000 * E18);

        // Redistribute 4 coll / 200 debt over 40 stake
        pools.move_to_default(4 * E18, 200 * E18).unwrap();
        manager.redistribute(4 * E18, 200 * E18).unwrap();

        let position = manager.entire_position(&addr("alice")).unwrap();
        assert_eq!(position.pending.coll, E18);
        assert_eq!(position.pending.debt, 50 * E18);
        // Reading does not mutate
        assert_eq!(manager.get(&addr("alice")).unwrap().coll, 10 * E18);

        let applied = manager.apply_pending_rewards(&addr("alice"), &mut pools).unwrap();
        assert_eq!(applied, position.pending);
        assert_eq!(manager.get(&addr("alice")).unwrap().coll, 11 * E18);
        assert_eq!(pools.default_pool().coll, 3 * E18);
        assert!(manager.pending_rewards(&addr("alice")).unwrap().is_empty());
    }

    #[test]
    fn test_stake_follows_snapshot_ratio() {
        let mut manager = TroveManager::new();
        let mut pools = CollateralPools::new();
        open(&mut manager, &mut pools, "alice", 10 * E18, 1_000 * E18);
        open(&mut manager, &mut pools, "bob", 10 * E18, 1_000 * E18);

        // Liquidating bob redistributes his collateral: 10 stake now backs 20 coll
        manager.apply_pending_rewards(&addr("bob"), &mut pools).unwrap();
        manager.close(&addr("bob"), TroveStatus::ClosedByLiquidation).unwrap();
        pools.move_to_default(10 * E18, 1_000 * E18).unwrap();
        manager.redistribute(10 * E18, 1_000 * E18).unwrap();
        manager.update_system_snapshots(&pools);

        assert_eq!(manager.compute_stake(20 * E18).unwrap(), 10 * E18);
    }
}
