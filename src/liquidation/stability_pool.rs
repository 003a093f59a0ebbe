//! Stability pool (Liquity-style product-sum accounting).
//!
//! Depositors park VST in the pool of one collateral asset. When a trove is
//! liquidated the pool burns part of its VST against the trove's debt and
//! receives the trove's collateral in exchange. Each deposit's share of losses
//! and gains is tracked with running accumulators instead of per-depositor
//! updates:
//!
//! - `P`: running product; a deposit made when the product was `P_0` is worth
//!   `initial * P / P_0` now
//! - `S`: running sum of collateral gained per unit deposited, scaled by `P`
//! - `G`: running sum of reward tokens earned per unit deposited, scaled by `P`
//!
//! `S` and `G` are kept per (epoch, scale). A scale shift multiplies `P` by
//! `1e9` when it grows too small; an epoch reset starts over after the pool is
//! fully emptied by a single offset.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::issuance::RewardSource;
use crate::utils::constants::{DECIMAL_PRECISION, SP_INITIAL_P, SP_SCALE_FACTOR};
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{
    format_amount, mul_div, mul_div_div, mul_div_up, per_unit_with_carry, safe_add, safe_mul,
    safe_sub,
};
use crate::utils::validation::{validate_balance, validate_non_zero};

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSITS AND SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulator values recorded when a deposit last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSnapshot {
    /// Running product
    pub p: u128,
    /// Collateral sum at the snapshot's (epoch, scale)
    pub s: u128,
    /// Reward sum at the snapshot's (epoch, scale)
    pub g: u128,
    /// Scale
    pub scale: u64,
    /// Epoch
    pub epoch: u64,
}

/// One depositor's principal and snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Value deposited at the last snapshot
    pub initial: u128,
    /// Accumulators at the last snapshot
    pub snapshot: DepositSnapshot,
}

/// Relation of a snapshot to the pool's current (epoch, scale)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStanding {
    /// Same epoch and scale
    Current,
    /// Same epoch, one scale shift since
    OneScaleBehind,
    /// Epoch reset or more than one scale shift since; the deposit is spent
    Expired,
}

/// Effect of an offset on the running product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductUpdate {
    /// `P` shrank in place
    Compounded,
    /// `P` dropped below the precision floor and was rescaled
    ScaleShifted,
    /// The pool was emptied; epoch advanced and `P` reset
    EpochReset,
}

/// Result of a deposit-changing interaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositChange {
    /// Compounded deposit before the change
    pub previous: u128,
    /// Deposit after the change
    pub current: u128,
    /// Collateral paid out
    pub collateral_gain: u128,
    /// Reward tokens paid out
    pub reward_gain: u128,
    /// Reward emission pulled from the issuer during the call
    pub issued: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Stability pool of one collateral asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    address: Address,
    asset: Address,
    total_deposits: u128,
    collateral_balance: u128,
    p: u128,
    current_scale: u64,
    current_epoch: u64,
    epoch_to_scale_to_sum: BTreeMap<(u64, u64), u128>,
    epoch_to_scale_to_g: BTreeMap<(u64, u64), u128>,
    last_coll_error_offset: u128,
    last_reward_error: u128,
    deposits: HashMap<Address, Deposit>,
    total_offsets: u64,
    total_debt_absorbed: u128,
}

impl StabilityPool {
    /// Create an empty pool with its own account address
    pub fn new(address: Address, asset: Address) -> Self {
        Self {
            address,
            asset,
            total_deposits: 0,
            collateral_balance: 0,
            p: SP_INITIAL_P,
            current_scale: 0,
            current_epoch: 0,
            epoch_to_scale_to_sum: BTreeMap::new(),
            epoch_to_scale_to_g: BTreeMap::new(),
            last_coll_error_offset: 0,
            last_reward_error: 0,
            deposits: HashMap::new(),
            total_offsets: 0,
            total_debt_absorbed: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITOR OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit `amount` VST from `depositor`'s balance.
    ///
    /// Pays out pending collateral and reward gains and resets the principal
    /// to the compounded deposit plus `amount`.
    pub fn provide<R: RewardSource + ?Sized>(
        &mut self,
        depositor: &Address,
        amount: u128,
        debt_token: &mut TokenLedger,
        rewards: &mut R,
        now: u64,
    ) -> Result<DepositChange> {
        validate_non_zero(amount)?;
        validate_balance(amount, debt_token.balance_of(depositor))?;

        let issued = self.trigger_issuance(rewards, now)?;
        let mut change = self.settle(depositor)?;
        let current = safe_add(change.previous, amount)?;
        let total = safe_add(self.total_deposits, amount)?;

        debt_token.transfer(depositor, &self.address, amount)?;
        self.total_deposits = total;
        self.record_deposit(depositor, current);

        change.current = current;
        change.issued = issued;
        tracing::info!(
            asset = %self.asset,
            depositor = %depositor,
            amount = %format_amount(amount),
            deposit = %format_amount(current),
            "stability deposit provided"
        );
        Ok(change)
    }

    /// Withdraw `amount` VST of `depositor`'s compounded deposit.
    ///
    /// Withdrawing the whole compounded deposit removes the entry.
    pub fn withdraw<R: RewardSource + ?Sized>(
        &mut self,
        depositor: &Address,
        amount: u128,
        debt_token: &mut TokenLedger,
        rewards: &mut R,
        now: u64,
    ) -> Result<DepositChange> {
        validate_non_zero(amount)?;
        let compounded = self.compounded_deposit(depositor)?;
        if !self.deposits.contains_key(depositor) {
            return Err(Error::NoDeposit(depositor.to_string()));
        }
        if amount > compounded {
            return Err(Error::WithdrawalExceedsDeposit {
                requested: amount,
                available: compounded,
            });
        }
        validate_balance(amount, debt_token.balance_of(&self.address))?;

        let issued = self.trigger_issuance(rewards, now)?;
        let mut change = self.settle(depositor)?;
        let current = safe_sub(change.previous, amount)?;
        let total = safe_sub(self.total_deposits, amount)?;

        debt_token.transfer(&self.address, depositor, amount)?;
        self.total_deposits = total;
        self.record_deposit(depositor, current);

        change.current = current;
        change.issued = issued;
        tracing::info!(
            asset = %self.asset,
            depositor = %depositor,
            amount = %format_amount(amount),
            deposit = %format_amount(current),
            "stability deposit withdrawn"
        );
        Ok(change)
    }

    /// Pay out pending gains and re-snapshot without changing the principal
    pub fn claim<R: RewardSource + ?Sized>(
        &mut self,
        depositor: &Address,
        rewards: &mut R,
        now: u64,
    ) -> Result<DepositChange> {
        if !self.deposits.contains_key(depositor) {
            return Err(Error::NoDeposit(depositor.to_string()));
        }

        let issued = self.trigger_issuance(rewards, now)?;
        let mut change = self.settle(depositor)?;
        self.record_deposit(depositor, change.previous);

        change.current = change.previous;
        change.issued = issued;
        tracing::debug!(
            asset = %self.asset,
            depositor = %depositor,
            collateral = %format_amount(change.collateral_gain),
            reward = %format_amount(change.reward_gain),
            "stability gains claimed"
        );
        Ok(change)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION INTERFACE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cancel `debt` against deposits and take `coll` in exchange.
    ///
    /// Burns the absorbed VST held by the pool. Returns `None` when the pool
    /// is empty or there is no debt to offset.
    pub(crate) fn offset<R: RewardSource + ?Sized>(
        &mut self,
        debt: u128,
        coll: u128,
        debt_token: &mut TokenLedger,
        rewards: &mut R,
        now: u64,
    ) -> Result<Option<ProductUpdate>> {
        let total = self.total_deposits;
        if total == 0 || debt == 0 {
            return Ok(None);
        }
        if debt > total {
            return Err(Error::InvariantViolation(format!(
                "offset of {} exceeds deposits of {}",
                format_amount(debt),
                format_amount(total)
            )));
        }
        validate_balance(debt, debt_token.balance_of(&self.address))
            .map_err(|_| Error::InvariantViolation("pool VST balance below deposits".into()))?;

        self.trigger_issuance(rewards, now)?;

        let (coll_gain_per_unit, loss_per_unit) = self.rewards_per_unit(coll, debt, total)?;
        let update = self.update_sum_and_product(coll_gain_per_unit, loss_per_unit)?;

        debt_token.burn(&self.address, debt)?;
        self.total_deposits = total - debt;
        self.collateral_balance = safe_add(self.collateral_balance, coll)?;
        self.total_offsets += 1;
        self.total_debt_absorbed = safe_add(self.total_debt_absorbed, debt)?;

        tracing::debug!(
            asset = %self.asset,
            debt = %format_amount(debt),
            coll = %format_amount(coll),
            p = self.p,
            scale = self.current_scale,
            epoch = self.current_epoch,
            update = ?update,
            "offset applied"
        );
        Ok(Some(update))
    }

    /// Credit emission the issuer released outside a pool interaction
    /// (on funding changes) to current depositors
    pub(crate) fn accrue_rewards(&mut self, issued: u128) -> Result<()> {
        self.update_g(issued)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pool account address in the VST ledger
    pub fn address(&self) -> Address {
        self.address
    }

    /// Collateral asset served by this pool
    pub fn asset(&self) -> Address {
        self.asset
    }

    /// Sum of all deposits net of absorbed debt
    pub fn total_deposits(&self) -> u128 {
        self.total_deposits
    }

    /// Collateral held for depositors
    pub fn collateral_balance(&self) -> u128 {
        self.collateral_balance
    }

    /// Current running product
    pub fn p(&self) -> u128 {
        self.p
    }

    /// Current scale
    pub fn current_scale(&self) -> u64 {
        self.current_scale
    }

    /// Current epoch
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Collateral sum at (epoch, scale)
    pub fn sum_at(&self, epoch: u64, scale: u64) -> u128 {
        self.epoch_to_scale_to_sum.get(&(epoch, scale)).copied().unwrap_or(0)
    }

    /// Reward sum at (epoch, scale)
    pub fn g_at(&self, epoch: u64, scale: u64) -> u128 {
        self.epoch_to_scale_to_g.get(&(epoch, scale)).copied().unwrap_or(0)
    }

    /// Deposit record of `depositor`
    pub fn deposit_of(&self, depositor: &Address) -> Option<&Deposit> {
        self.deposits.get(depositor)
    }

    /// Number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Relation of a snapshot to the current (epoch, scale)
    pub fn standing(&self, snapshot: &DepositSnapshot) -> SnapshotStanding {
        if snapshot.epoch != self.current_epoch {
            return SnapshotStanding::Expired;
        }
        match self.current_scale.checked_sub(snapshot.scale) {
            Some(0) => SnapshotStanding::Current,
            Some(1) => SnapshotStanding::OneScaleBehind,
            _ => SnapshotStanding::Expired,
        }
    }

    /// Deposit of `depositor` after all offsets since its snapshot
    pub fn compounded_deposit(&self, depositor: &Address) -> Result<u128> {
        match self.deposits.get(depositor) {
            Some(deposit) => self.compound(deposit),
            None => Ok(0),
        }
    }

    /// Collateral earned by `depositor` since its snapshot
    pub fn collateral_gain(&self, depositor: &Address) -> Result<u128> {
        match self.deposits.get(depositor) {
            Some(deposit) => gain_from(&self.epoch_to_scale_to_sum, deposit, deposit.snapshot.s),
            None => Ok(0),
        }
    }

    /// Reward tokens earned by `depositor` since its snapshot
    pub fn reward_gain(&self, depositor: &Address) -> Result<u128> {
        match self.deposits.get(depositor) {
            Some(deposit) => gain_from(&self.epoch_to_scale_to_g, deposit, deposit.snapshot.g),
            None => Ok(0),
        }
    }

    /// Pool statistics
    pub fn statistics(&self) -> StabilityPoolStats {
        StabilityPoolStats {
            total_deposits: self.total_deposits,
            collateral_balance: self.collateral_balance,
            depositor_count: self.deposits.len() as u64,
            total_offsets: self.total_offsets,
            total_debt_absorbed: self.total_debt_absorbed,
            current_epoch: self.current_epoch,
            current_scale: self.current_scale,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Compute state hash
    pub fn state_hash(&self) -> Hash {
        let mut data = Vec::new();
        data.extend_from_slice(self.address.as_bytes());
        data.extend_from_slice(&self.total_deposits.to_be_bytes());
        data.extend_from_slice(&self.collateral_balance.to_be_bytes());
        data.extend_from_slice(&self.p.to_be_bytes());
        data.extend_from_slice(&self.current_scale.to_be_bytes());
        data.extend_from_slice(&self.current_epoch.to_be_bytes());
        for ((epoch, scale), sum) in &self.epoch_to_scale_to_sum {
            data.extend_from_slice(&epoch.to_be_bytes());
            data.extend_from_slice(&scale.to_be_bytes());
            data.extend_from_slice(&sum.to_be_bytes());
        }
        for ((epoch, scale), g) in &self.epoch_to_scale_to_g {
            data.extend_from_slice(&epoch.to_be_bytes());
            data.extend_from_slice(&scale.to_be_bytes());
            data.extend_from_slice(&g.to_be_bytes());
        }
        Hash::sha256(&data)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn current_snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            p: self.p,
            s: self.sum_at(self.current_epoch, self.current_scale),
            g: self.g_at(self.current_epoch, self.current_scale),
            scale: self.current_scale,
            epoch: self.current_epoch,
        }
    }

    fn compound(&self, deposit: &Deposit) -> Result<u128> {
        let snapshot = &deposit.snapshot;
        let compounded = match self.standing(snapshot) {
            SnapshotStanding::Expired => return Ok(0),
            SnapshotStanding::Current => mul_div(deposit.initial, self.p, snapshot.p)?,
            SnapshotStanding::OneScaleBehind => {
                mul_div_div(deposit.initial, self.p, snapshot.p, SP_SCALE_FACTOR)?
            }
        };
        // Below a billionth of the principal the value is rounding dust
        if compounded < deposit.initial / SP_SCALE_FACTOR {
            return Ok(0);
        }
        Ok(compounded.min(self.total_deposits))
    }

    /// Compute and release gains for `depositor`, returning the compounded
    /// deposit they settle against
    fn settle(&mut self, depositor: &Address) -> Result<DepositChange> {
        let previous = self.compounded_deposit(depositor)?;
        let collateral_gain = self.collateral_gain(depositor)?;
        let reward_gain = self.reward_gain(depositor)?;

        if collateral_gain > self.collateral_balance {
            return Err(Error::InvariantViolation(format!(
                "collateral gain {} exceeds pool balance {}",
                format_amount(collateral_gain),
                format_amount(self.collateral_balance)
            )));
        }
        self.collateral_balance -= collateral_gain;

        Ok(DepositChange {
            previous,
            current: previous,
            collateral_gain,
            reward_gain,
            issued: 0,
        })
    }

    fn record_deposit(&mut self, depositor: &Address, value: u128) {
        if value == 0 {
            self.deposits.remove(depositor);
            return;
        }
        let snapshot = self.current_snapshot();
        self.deposits.insert(
            *depositor,
            Deposit {
                initial: value,
                snapshot,
            },
        );
        tracing::debug!(depositor = %depositor, p = snapshot.p, scale = snapshot.scale, epoch = snapshot.epoch, "deposit snapshot updated");
    }

    fn trigger_issuance<R: RewardSource + ?Sized>(&mut self, rewards: &mut R, now: u64) -> Result<u128> {
        let issued = rewards.issue(&self.address, now)?;
        self.update_g(issued)?;
        Ok(issued)
    }

    fn update_g(&mut self, issued: u128) -> Result<()> {
        // Emission while the pool is empty has no one to accrue to
        if self.total_deposits == 0 || issued == 0 {
            return Ok(());
        }
        let (per_unit, error) = per_unit_with_carry(issued, self.last_reward_error, self.total_deposits)?;
        let marginal = safe_mul(per_unit, self.p)?;
        let key = (self.current_epoch, self.current_scale);
        let g = safe_add(self.g_at(key.0, key.1), marginal)?;

        self.last_reward_error = error;
        self.epoch_to_scale_to_g.insert(key, g);
        Ok(())
    }

    fn rewards_per_unit(&mut self, coll: u128, debt: u128, total: u128) -> Result<(u128, u128)> {
        let (coll_gain, coll_error) = per_unit_with_carry(coll, self.last_coll_error_offset, total)?;
        // Rounded up on every offset with no carry: each factor stays at or
        // below its exact value, so compounded deposits never sum above the total
        let loss = if debt == total {
            DECIMAL_PRECISION
        } else {
            mul_div_up(debt, DECIMAL_PRECISION, total)?
        };
        if loss > DECIMAL_PRECISION {
            return Err(Error::InvariantViolation("loss per unit exceeds one".into()));
        }
        self.last_coll_error_offset = coll_error;
        Ok((coll_gain, loss))
    }

    fn update_sum_and_product(&mut self, coll_gain_per_unit: u128, loss_per_unit: u128) -> Result<ProductUpdate> {
        let current_p = self.p;
        let factor = DECIMAL_PRECISION - loss_per_unit;
        let key = (self.current_epoch, self.current_scale);
        let marginal = safe_mul(coll_gain_per_unit, current_p)?;
        let sum = safe_add(self.sum_at(key.0, key.1), marginal)?;

        let (new_p, update) = if factor == 0 {
            (SP_INITIAL_P, ProductUpdate::EpochReset)
        } else {
            let compounded = mul_div(current_p, factor, DECIMAL_PRECISION)?;
            if compounded < SP_SCALE_FACTOR {
                (mul_div(current_p, factor, SP_SCALE_FACTOR)?, ProductUpdate::ScaleShifted)
            } else {
                (compounded, ProductUpdate::Compounded)
            }
        };
        if new_p == 0 {
            return Err(Error::InvariantViolation("running product reached zero".into()));
        }

        self.epoch_to_scale_to_sum.insert(key, sum);
        self.p = new_p;
        match update {
            ProductUpdate::EpochReset => {
                self.current_epoch += 1;
                self.current_scale = 0;
                tracing::debug!(asset = %self.asset, epoch = self.current_epoch, "stability pool epoch reset");
            }
            ProductUpdate::ScaleShifted => {
                self.current_scale += 1;
                tracing::debug!(asset = %self.asset, scale = self.current_scale, "stability pool scale shifted");
            }
            ProductUpdate::Compounded => {}
        }
        Ok(update)
    }
}

/// `initial * ((sum[e][s] - snap) + sum[e][s+1] / 1e9) / P_snap / 1e18`
fn gain_from(table: &BTreeMap<(u64, u64), u128>, deposit: &Deposit, snapshot_value: u128) -> Result<u128> {
    let snapshot = &deposit.snapshot;
    let at = |scale: u64| table.get(&(snapshot.epoch, scale)).copied().unwrap_or(0);

    let first = safe_sub(at(snapshot.scale), snapshot_value)?;
    let second = at(snapshot.scale + 1) / SP_SCALE_FACTOR;
    let portion = U256::from(first) + U256::from(second);
    let gain = U256::from(deposit.initial) * portion / U256::from(snapshot.p) / U256::from(DECIMAL_PRECISION);
    if gain > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: "stability pool gain".into(),
        });
    }
    Ok(gain.low_u128())
}

/// Stability pool statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPoolStats {
    /// VST deposited net of absorbed debt
    pub total_deposits: u128,
    /// Collateral held for depositors
    pub collateral_balance: u128,
    /// Number of open deposits
    pub depositor_count: u64,
    /// Offsets applied since creation
    pub total_offsets: u64,
    /// Debt absorbed since creation
    pub total_debt_absorbed: u128,
    /// Current epoch
    pub current_epoch: u64,
    /// Current scale
    pub current_scale: u64,
}
