//! Reward (VSTA) issuer for all stability pools.
//!
//! The issuer custodies the reward supply funded by the treasury and keeps one
//! [`IssuanceSchedule`] per stability pool. Pools pull their due emission by
//! calling [`RewardSource::issue`] on every deposit-changing interaction;
//! emission is never time-driven.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::issuance::schedule::IssuanceSchedule;
use crate::issuance::RewardSource;
use crate::liquidation::registry::StabilityPoolRegistry;
use crate::utils::crypto::Address;
use crate::utils::math::{format_amount, safe_add, FixedPoint};
use crate::utils::validation::{validate_balance, validate_non_zero};

/// Issuance due to a pool at the moment its schedule was changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleChange {
    /// Pool whose schedule changed
    pub pool: Address,
    /// Emission issued right before the change, to be credited to depositors
    pub issued_before: u128,
}

/// Per-pool decaying reward schedules with capped supply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardIssuer {
    address: Address,
    halving_minutes: u64,
    schedules: HashMap<Address, IssuanceSchedule>,
}

impl RewardIssuer {
    /// Create an issuer custodying tokens at `address`
    pub fn new(address: Address, halving_minutes: u64) -> Result<Self> {
        if halving_minutes == 0 {
            return Err(Error::InvalidParameter {
                name: "halving_minutes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(Self {
            address,
            halving_minutes,
            schedules: HashMap::new(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Custody account in the reward token ledger
    pub fn address(&self) -> Address {
        self.address
    }

    /// Half-life of emission in minutes
    pub fn halving_minutes(&self) -> u64 {
        self.halving_minutes
    }

    /// Schedule of `pool`, if funded
    pub fn schedule(&self, pool: &Address) -> Option<&IssuanceSchedule> {
        self.schedules.get(pool)
    }

    /// Supply cap of `pool`
    pub fn supply_cap(&self, pool: &Address) -> u128 {
        self.schedule(pool).map_or(0, |s| s.supply_cap)
    }

    /// Cumulative issuance of `pool`
    pub fn total_issued(&self, pool: &Address) -> u128 {
        self.schedule(pool).map_or(0, |s| s.total_issued)
    }

    /// Emission anchor of `pool` (0 when inactive)
    pub fn anchor(&self, pool: &Address) -> u64 {
        self.schedule(pool).map_or(0, |s| s.anchor)
    }

    /// Cumulative emitted fraction of `pool` at `now`
    pub fn cumulative_fraction(&self, pool: &Address, now: u64) -> Result<FixedPoint> {
        match self.schedule(pool) {
            Some(schedule) => schedule.cumulative_fraction(now, self.halving_minutes),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Unissued cap of `pool` after catching up to `now`
    pub fn available(&self, pool: &Address, now: u64) -> Result<u128> {
        match self.schedule(pool) {
            Some(schedule) => {
                let pending = schedule.pending(now, self.halving_minutes)?;
                Ok(schedule.unissued().saturating_sub(pending))
            }
            None => Ok(0),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREASURY OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move `amount` reward tokens from `funder` into custody and add them to
    /// `pool`'s cap. Starts the schedule at `now` if the pool is inactive;
    /// otherwise issues what is due first and keeps the anchor.
    pub fn fund(
        &mut self,
        pools: &StabilityPoolRegistry,
        reward_token: &mut TokenLedger,
        funder: &Address,
        pool: &Address,
        amount: u128,
        now: u64,
    ) -> Result<ScheduleChange> {
        validate_non_zero(amount)?;
        pools.ensure_pool(pool)?;
        validate_balance(amount, reward_token.balance_of(funder))?;
        self.check_cap_growth(pool, amount)?;

        reward_token.transfer(funder, &self.address, amount)?;
        let change = self.add_cap(pool, amount, now)?;
        tracing::info!(pool = %pool, amount = %format_amount(amount), cap = %format_amount(self.supply_cap(pool)), "pool funded");
        Ok(change)
    }

    /// Withdraw `amount` of `pool`'s unissued cap back to `recipient`.
    /// Withdrawing everything that is left clears the schedule.
    pub fn defund(
        &mut self,
        pools: &StabilityPoolRegistry,
        reward_token: &mut TokenLedger,
        recipient: &Address,
        pool: &Address,
        amount: u128,
        now: u64,
    ) -> Result<ScheduleChange> {
        validate_non_zero(amount)?;
        pools.ensure_pool(pool)?;
        self.check_available(pool, amount, now)?;
        validate_balance(amount, reward_token.balance_of(&self.address))?;

        let change = self.remove_cap(pool, amount, now)?;
        reward_token.transfer(&self.address, recipient, amount)?;
        tracing::info!(pool = %pool, amount = %format_amount(amount), "pool defunded");
        Ok(change)
    }

    /// Move `amount` of unissued cap from one pool to another.
    /// The destination keeps its anchor when already active.
    pub fn transfer(
        &mut self,
        pools: &StabilityPoolRegistry,
        from: &Address,
        to: &Address,
        amount: u128,
        now: u64,
    ) -> Result<(ScheduleChange, ScheduleChange)> {
        validate_non_zero(amount)?;
        pools.ensure_pool(from)?;
        pools.ensure_pool(to)?;
        if from == to {
            return Err(Error::InvalidParameter {
                name: "to".into(),
                reason: "source and destination pools are the same".into(),
            });
        }
        self.check_available(from, amount, now)?;
        self.check_cap_growth(to, amount)?;

        let source = self.remove_cap(from, amount, now)?;
        let destination = self.add_cap(to, amount, now)?;
        tracing::info!(from = %from, to = %to, amount = %format_amount(amount), "pool supply transferred");
        Ok((source, destination))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAYOUTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pay an already-issued reward out of custody
    pub fn send_reward(&self, reward_token: &mut TokenLedger, to: &Address, amount: u128) -> Result<()> {
        reward_token.transfer(&self.address, to, amount)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn check_available(&self, pool: &Address, amount: u128, now: u64) -> Result<()> {
        let available = self.available(pool, now)?;
        if amount > available {
            return Err(Error::InsufficientUnissuedSupply {
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    fn check_cap_growth(&self, pool: &Address, amount: u128) -> Result<()> {
        safe_add(self.supply_cap(pool), amount).map(|_| ())
    }

    fn add_cap(&mut self, pool: &Address, amount: u128, now: u64) -> Result<ScheduleChange> {
        let issued_before = self.issue_due(pool, now)?;
        match self.schedules.get_mut(pool) {
            Some(schedule) if schedule.is_active() => {
                schedule.supply_cap = safe_add(schedule.supply_cap, amount)?;
            }
            _ => {
                self.schedules.insert(*pool, IssuanceSchedule::start(amount, now));
            }
        }
        Ok(ScheduleChange {
            pool: *pool,
            issued_before,
        })
    }

    fn remove_cap(&mut self, pool: &Address, amount: u128, now: u64) -> Result<ScheduleChange> {
        let issued_before = self.issue_due(pool, now)?;
        let schedule = self
            .schedules
            .get_mut(pool)
            .ok_or_else(|| Error::InvariantViolation(format!("no schedule for {}", pool)))?;

        let unissued = schedule.unissued();
        if amount > unissued {
            return Err(Error::InvariantViolation(
                "cap withdrawal exceeds unissued supply after check".into(),
            ));
        }
        if amount == unissued {
            *schedule = IssuanceSchedule::default();
            tracing::debug!(pool = %pool, "issuance schedule cleared");
        } else {
            schedule.supply_cap -= amount;
        }
        Ok(ScheduleChange {
            pool: *pool,
            issued_before,
        })
    }

    fn issue_due(&mut self, pool: &Address, now: u64) -> Result<u128> {
        let halving = self.halving_minutes;
        let Some(schedule) = self.schedules.get_mut(pool) else {
            return Ok(0);
        };
        let due = schedule.pending(now, halving)?;
        if due > 0 {
            schedule.record_issued(due)?;
            tracing::debug!(pool = %pool, issued = %format_amount(due), total = %format_amount(schedule.total_issued), "reward issued");
        }
        Ok(due)
    }
}

impl RewardSource for RewardIssuer {
    fn issue(&mut self, pool: &Address, now: u64) -> Result<u128> {
        self.issue_due(pool, now)
    }
}
