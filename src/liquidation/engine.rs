//! Liquidation engine.
//!
//! Decides which troves of an asset are unsafe, splits their collateral
//! between the caller, the owner, the stability pool and the remaining
//! troves, and applies the result to the market ledgers:
//! - Eligibility under normal and recovery mode
//! - Gas compensation and owner surplus
//! - Offset against the stability pool
//! - Redistribution of the shortfall
//!
//! Every candidate is evaluated before anything is mutated. Batches apply a
//! single offset and a single redistribution for all liquidated troves.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::collateral::{CollateralParams, CollateralRegistry};
use crate::core::pools::CollateralPools;
use crate::core::token::TokenLedger;
use crate::core::trove::{TroveManager, TroveStatus};
use crate::error::{Error, Result};
use crate::issuance::RewardSource;
use crate::liquidation::redistribution::PendingGains;
use crate::liquidation::stability_pool::{ProductUpdate, StabilityPool};
use crate::utils::constants::{DECIMAL_PRECISION, ONE_HUNDRED_PCT};
use crate::utils::crypto::Address;
use crate::utils::math::{compute_cr, format_amount, mul_div, safe_add, safe_div, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION SPLIT
// ═══════════════════════════════════════════════════════════════════════════════

/// How one trove's collateral and debt are divided on liquidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationSplit {
    /// ICR at the liquidation price
    pub icr: u128,
    /// Collateral paid to the caller
    pub gas_compensation: u128,
    /// Collateral returned to the owner through the surplus ledger
    pub surplus: u128,
    /// Debt cancelled against stability deposits
    pub debt_to_offset: u128,
    /// Collateral sent to the stability pool
    pub coll_to_sp: u128,
    /// Debt spread over remaining troves
    pub debt_to_redistribute: u128,
    /// Collateral spread over remaining troves
    pub coll_to_redistribute: u128,
}

/// Split `coll` and `debt` at `price` with `sp_available` VST left to absorb debt.
///
/// `gas_compensation + surplus + coll_to_sp + coll_to_redistribute == coll` and
/// `debt_to_offset + debt_to_redistribute == debt` hold exactly.
pub fn compute_liquidation_split(
    coll: u128,
    debt: u128,
    price: u128,
    params: &CollateralParams,
    sp_available: u128,
) -> Result<LiquidationSplit> {
    if debt == 0 {
        return Err(Error::InvalidParameter {
            name: "debt".into(),
            reason: "cannot split a position without debt".into(),
        });
    }
    let icr = compute_cr(coll, debt, price);

    let proportional = safe_div(coll, params.percent_divisor)?;
    let floor_in_coll = mul_div(params.gas_compensation, DECIMAL_PRECISION, price)?;
    let gas_compensation = proportional.max(floor_in_coll).min(coll);
    let coll_to_liquidate = coll - gas_compensation;

    let debt_to_offset = debt.min(sp_available);

    let threshold = safe_add(ONE_HUNDRED_PCT, params.liquidation_margin())?;
    let surplus = if icr > threshold {
        mul_div(coll_to_liquidate, icr - threshold, icr)?
    } else {
        0
    };
    let remaining = coll_to_liquidate - surplus;

    let coll_to_sp = if debt_to_offset == debt {
        remaining
    } else {
        mul_div(remaining, debt_to_offset, debt)?
    };

    Ok(LiquidationSplit {
        icr,
        gas_compensation,
        surplus,
        debt_to_offset,
        coll_to_sp,
        debt_to_redistribute: debt - debt_to_offset,
        coll_to_redistribute: remaining - coll_to_sp,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Terminal state of a liquidated trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationOutcome {
    /// Whole debt absorbed by the stability pool
    FullyOffset,
    /// Part absorbed, the rest redistributed
    PartiallyOffset,
    /// Stability pool absorbed nothing
    FullyRedistributed,
}

impl LiquidationOutcome {
    fn of(split: &LiquidationSplit) -> Self {
        if split.debt_to_redistribute == 0 {
            Self::FullyOffset
        } else if split.debt_to_offset == 0 {
            Self::FullyRedistributed
        } else {
            Self::PartiallyOffset
        }
    }
}

/// One liquidated trove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationValues {
    /// Trove owner
    pub owner: Address,
    /// Collateral including pending redistribution gains
    pub entire_coll: u128,
    /// Debt including pending redistribution gains
    pub entire_debt: u128,
    /// Pending gains folded in before closing
    pub pending: PendingGains,
    /// Recovery mode in force when this trove was evaluated
    pub recovery_mode: bool,
    /// Split of collateral and debt
    pub split: LiquidationSplit,
    /// Terminal state
    pub outcome: LiquidationOutcome,
}

/// Sums over all troves of a liquidation call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationTotals {
    /// Collateral of the liquidated troves, pending gains included
    pub entire_coll: u128,
    /// Debt of the liquidated troves, pending gains included
    pub entire_debt: u128,
    /// Collateral paid to the caller
    pub gas_compensation: u128,
    /// Collateral set aside for owners to claim
    pub surplus: u128,
    /// Debt cancelled against stability deposits
    pub debt_to_offset: u128,
    /// Collateral sent to the stability pool
    pub coll_to_sp: u128,
    /// Debt spread over remaining troves
    pub debt_to_redistribute: u128,
    /// Collateral spread over remaining troves
    pub coll_to_redistribute: u128,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) -> Result<()> {
        let split = &values.split;
        *self = Self {
            entire_coll: safe_add(self.entire_coll, values.entire_coll)?,
            entire_debt: safe_add(self.entire_debt, values.entire_debt)?,
            gas_compensation: safe_add(self.gas_compensation, split.gas_compensation)?,
            surplus: safe_add(self.surplus, split.surplus)?,
            debt_to_offset: safe_add(self.debt_to_offset, split.debt_to_offset)?,
            coll_to_sp: safe_add(self.coll_to_sp, split.coll_to_sp)?,
            debt_to_redistribute: safe_add(self.debt_to_redistribute, split.debt_to_redistribute)?,
            coll_to_redistribute: safe_add(self.coll_to_redistribute, split.coll_to_redistribute)?,
        };
        Ok(())
    }
}

/// Result of a liquidation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationReport {
    /// Collateral asset
    pub asset: Address,
    /// Price used for every computation
    pub price: u128,
    /// Liquidated troves, in processing order
    pub liquidated: Vec<LiquidationValues>,
    /// Candidates left untouched
    pub skipped: Vec<Address>,
    /// Sums over `liquidated`
    pub totals: LiquidationTotals,
    /// Effect of the offset on the stability pool, if any
    pub product_update: Option<ProductUpdate>,
}

/// Mutable view of one asset's ledgers for the engine
pub struct MarketLedgers<'m> {
    /// Troves of the asset
    pub troves: &'m mut TroveManager,
    /// Active, default and surplus pools of the asset
    pub pools: &'m mut CollateralPools,
    /// Stability pool of the asset
    pub stability_pool: &'m mut StabilityPool,
    /// VST ledger
    pub debt_token: &'m mut TokenLedger,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Liquidation logic for one asset. Holds no state of its own.
pub struct LiquidationEngine<'a> {
    asset: Address,
    params: &'a CollateralParams,
}

impl<'a> LiquidationEngine<'a> {
    /// Engine for `asset` using its registered parameters
    pub fn new(registry: &'a CollateralRegistry, asset: Address) -> Result<Self> {
        Ok(Self {
            asset,
            params: registry.params(&asset)?,
        })
    }

    /// Liquidate one trove
    pub fn liquidate<R: RewardSource + ?Sized>(
        &self,
        ledgers: &mut MarketLedgers<'_>,
        rewards: &mut R,
        owner: &Address,
        price: u128,
        now: u64,
    ) -> Result<LiquidationReport> {
        if !ledgers.troves.status(owner).is_active() {
            return Err(Error::TroveNotActive(owner.to_string()));
        }
        if ledgers.troves.active_count() <= 1 {
            return Err(Error::NothingToLiquidate(format!(
                "{} is the last active trove of {}",
                owner, self.asset
            )));
        }

        let recovery_mode = self.recovery_mode(ledgers.pools.entire_system_coll(), ledgers.pools.entire_system_debt(), price);
        let position = ledgers.troves.entire_position(owner)?;
        if position.debt == 0 {
            return Err(Error::NothingToLiquidate(format!("{} has no debt", owner)));
        }
        let icr = position.icr(price);
        let threshold = self.threshold(recovery_mode);
        if icr >= threshold {
            return Err(Error::NotLiquidatable {
                owner: owner.to_string(),
                icr,
                threshold,
            });
        }

        let split = compute_liquidation_split(
            position.coll,
            position.debt,
            price,
            self.params,
            ledgers.stability_pool.total_deposits(),
        )?;
        let values = LiquidationValues {
            owner: *owner,
            entire_coll: position.coll,
            entire_debt: position.debt,
            pending: position.pending,
            recovery_mode,
            split,
            outcome: LiquidationOutcome::of(&split),
        };
        self.apply(ledgers, rewards, vec![values], Vec::new(), price, now)
    }

    /// Liquidate every eligible trove among `owners`, in order.
    ///
    /// Ineligible, inactive and repeated candidates are skipped. Recovery mode
    /// is re-evaluated after each liquidation, and the last active trove is
    /// never liquidated.
    pub fn liquidate_batch<R: RewardSource + ?Sized>(
        &self,
        ledgers: &mut MarketLedgers<'_>,
        rewards: &mut R,
        owners: &[Address],
        price: u128,
        now: u64,
    ) -> Result<LiquidationReport> {
        let mut system_coll = ledgers.pools.entire_system_coll();
        let mut system_debt = ledgers.pools.entire_system_debt();
        let mut sp_available = ledgers.stability_pool.total_deposits();
        let mut remaining_troves = ledgers.troves.active_count();

        let mut seen = HashSet::new();
        let mut liquidated = Vec::new();
        let mut skipped = Vec::new();

        for owner in owners {
            if !seen.insert(*owner) || !ledgers.troves.status(owner).is_active() {
                skipped.push(*owner);
                continue;
            }
            if remaining_troves <= 1 {
                tracing::warn!(asset = %self.asset, owner = %owner, "skipping last active trove");
                skipped.push(*owner);
                continue;
            }

            let recovery_mode = self.recovery_mode(system_coll, system_debt, price);
            let position = ledgers.troves.entire_position(owner)?;
            let icr = position.icr(price);
            if position.debt == 0 || icr >= self.threshold(recovery_mode) {
                tracing::debug!(asset = %self.asset, owner = %owner, icr, recovery_mode, "candidate not liquidatable");
                skipped.push(*owner);
                continue;
            }

            let split = compute_liquidation_split(position.coll, position.debt, price, self.params, sp_available)?;
            sp_available -= split.debt_to_offset;
            system_debt = safe_sub(system_debt, split.debt_to_offset)?;
            system_coll = safe_sub(
                system_coll,
                split.gas_compensation + split.surplus + split.coll_to_sp,
            )?;
            remaining_troves -= 1;

            tracing::debug!(
                asset = %self.asset,
                owner = %owner,
                icr,
                recovery_mode,
                offset = %format_amount(split.debt_to_offset),
                redistributed = %format_amount(split.debt_to_redistribute),
                "trove selected for liquidation"
            );
            liquidated.push(LiquidationValues {
                owner: *owner,
                entire_coll: position.coll,
                entire_debt: position.debt,
                pending: position.pending,
                recovery_mode,
                split,
                outcome: LiquidationOutcome::of(&split),
            });
        }

        if liquidated.is_empty() {
            return Err(Error::NothingToLiquidate(format!(
                "no liquidatable trove among {} candidates for {}",
                owners.len(),
                self.asset
            )));
        }
        self.apply(ledgers, rewards, liquidated, skipped, price, now)
    }

    fn threshold(&self, recovery_mode: bool) -> u128 {
        if recovery_mode {
            self.params.ccr
        } else {
            self.params.mcr
        }
    }

    fn recovery_mode(&self, system_coll: u128, system_debt: u128, price: u128) -> bool {
        compute_cr(system_coll, system_debt, price) < self.params.ccr
    }

    /// Commit the evaluated liquidations to the ledgers
    fn apply<R: RewardSource + ?Sized>(
        &self,
        ledgers: &mut MarketLedgers<'_>,
        rewards: &mut R,
        liquidated: Vec<LiquidationValues>,
        skipped: Vec<Address>,
        price: u128,
        now: u64,
    ) -> Result<LiquidationReport> {
        let mut totals = LiquidationTotals::default();
        for values in &liquidated {
            totals.add(values)?;
        }
        let remaining_stakes = liquidated.iter().try_fold(ledgers.troves.total_stakes(), |acc, v| {
            let stake = ledgers.troves.get(&v.owner).map_or(0, |t| t.stake);
            safe_sub(acc, stake)
        })?;
        if (totals.coll_to_redistribute > 0 || totals.debt_to_redistribute > 0) && remaining_stakes == 0 {
            return Err(Error::NothingToLiquidate(
                "no remaining stake to redistribute to".into(),
            ));
        }

        for values in &liquidated {
            ledgers.troves.apply_pending_rewards(&values.owner, ledgers.pools)?;
            ledgers.troves.close(&values.owner, TroveStatus::ClosedByLiquidation)?;
            ledgers.pools.credit_surplus(&values.owner, values.split.surplus)?;
        }

        ledgers.pools.send_collateral(totals.gas_compensation)?;

        ledgers.pools.send_collateral(totals.coll_to_sp)?;
        ledgers.pools.decrease_debt(totals.debt_to_offset)?;
        let product_update = ledgers.stability_pool.offset(
            totals.debt_to_offset,
            totals.coll_to_sp,
            ledgers.debt_token,
            rewards,
            now,
        )?;

        ledgers.troves.redistribute(totals.coll_to_redistribute, totals.debt_to_redistribute)?;
        ledgers
            .pools
            .move_to_default(totals.coll_to_redistribute, totals.debt_to_redistribute)?;
        ledgers.troves.update_system_snapshots(ledgers.pools);

        tracing::info!(
            asset = %self.asset,
            troves = liquidated.len(),
            debt = %format_amount(totals.entire_debt),
            coll = %format_amount(totals.entire_coll),
            offset = %format_amount(totals.debt_to_offset),
            redistributed = %format_amount(totals.debt_to_redistribute),
            "liquidation completed"
        );

        Ok(LiquidationReport {
            asset: self.asset,
            price,
            liquidated,
            skipped,
            totals,
            product_update,
        })
    }
}
