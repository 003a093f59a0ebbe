//! Protocol State Machine - Core orchestration engine.
//!
//! The state machine owns every ledger of the protocol and is the only entry
//! point that mutates them. Each operation validates its inputs, reads the
//! oracle and clock once, then commits. Errors flagged as critical halt the
//! affected market.

use std::collections::HashMap;

use crate::core::access::{AccessControl, Role};
use crate::core::collateral::{CollateralParameter, CollateralParams, CollateralRegistry};
use crate::core::config::ProtocolConfig;
use crate::core::token::TokenLedger;
use crate::core::trove::{Trove, TroveStatus};
use crate::error::{Error, Result};
use crate::issuance::issuer::{RewardIssuer, ScheduleChange};
use crate::liquidation::engine::{LiquidationEngine, LiquidationReport, MarketLedgers};
use crate::liquidation::registry::StabilityPoolRegistry;
use crate::liquidation::stability_pool::DepositChange;
use crate::oracle::price_feed::PriceFeed;
use crate::protocol::events::{EventLog, ProtocolEvent};
use crate::protocol::market::{AssetMarket, MarketStatus};
use crate::utils::clock::Clock;
use crate::utils::crypto::Address;
use crate::utils::math::{compute_cr, format_amount, safe_add, safe_sub, FixedPoint};
use crate::utils::validation::{validate_balance, validate_non_zero};

/// Label of the reward custody account
const ISSUER_LABEL: &str = "reward-issuer";
/// Domain used to derive stability pool addresses from asset addresses
const STABILITY_POOL_DOMAIN: &str = "stability-pool";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol state machine - orchestrates all operations
pub struct ProtocolStateMachine<C: Clock, F: PriceFeed> {
    /// Protocol configuration
    config: ProtocolConfig,
    /// Role holders
    access: AccessControl,
    /// Per-asset risk parameters
    collaterals: CollateralRegistry,
    /// Asset to stability pool mapping
    pool_registry: StabilityPoolRegistry,
    /// One market per registered asset
    markets: HashMap<Address, AssetMarket>,
    /// Reward schedules and custody
    issuer: RewardIssuer,
    /// VST ledger
    debt_token: TokenLedger,
    /// VSTA ledger
    reward_token: TokenLedger,
    /// Externally held collateral balances, one ledger per asset
    wallets: HashMap<Address, TokenLedger>,
    price_feed: F,
    clock: C,
    events: EventLog,
}

impl<C: Clock, F: PriceFeed> ProtocolStateMachine<C, F> {
    /// Create a state machine with no registered collateral
    pub fn new(config: ProtocolConfig, clock: C, price_feed: F) -> Result<Self> {
        config.validate()?;
        let collaterals = CollateralRegistry::new(config.default_collateral)?;
        let issuer = RewardIssuer::new(Address::from_label(ISSUER_LABEL), config.issuance_halving_minutes)?;

        tracing::info!(
            owner = %config.owner,
            treasury = %config.treasury,
            halving_minutes = config.issuance_halving_minutes,
            "protocol initialized"
        );
        Ok(Self {
            access: AccessControl::new(config.owner, config.treasury),
            events: EventLog::new(config.max_events),
            collaterals,
            pool_registry: StabilityPoolRegistry::new(),
            markets: HashMap::new(),
            issuer,
            debt_token: TokenLedger::new("VST"),
            reward_token: TokenLedger::new("VSTA"),
            wallets: HashMap::new(),
            price_feed,
            clock,
            config,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MARKET ADMINISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register `asset`, create its market and stability pool.
    /// Returns the stability pool address.
    pub fn add_collateral(&mut self, caller: Address, asset: Address) -> Result<Address> {
        self.access.ensure(&caller, Role::Owner)?;
        if self.markets.contains_key(&asset) {
            return Err(Error::CollateralAlreadyExists(asset.to_string()));
        }
        let pool = asset.derive(STABILITY_POOL_DOMAIN);
        self.pool_registry.register(asset, pool)?;
        self.collaterals.sanitize_parameters(&asset);
        self.markets.insert(asset, AssetMarket::new(asset, pool));
        self.wallets
            .insert(asset, TokenLedger::new(format!("COLL-{}", &asset.to_hex()[..8])));

        tracing::info!(asset = %asset, stability_pool = %pool, "collateral added");
        self.record(ProtocolEvent::CollateralAdded {
            asset,
            stability_pool: pool,
        });
        Ok(pool)
    }

    /// Apply default parameters to `asset` if it was never configured
    pub fn sanitize_parameters(&mut self, asset: &Address) -> bool {
        self.collaterals.sanitize_parameters(asset)
    }

    /// Set one parameter from its external input unit. Returns the stored value.
    pub fn set_parameter(
        &mut self,
        caller: Address,
        asset: Address,
        parameter: CollateralParameter,
        input: u128,
    ) -> Result<u128> {
        self.access.ensure(&caller, Role::Owner)?;
        self.market(&asset)?.ensure_active()?;
        let value = self.collaterals.set_parameter(&asset, parameter, input)?;
        self.record(ProtocolEvent::ParameterChanged {
            asset,
            parameter,
            value,
        });
        Ok(value)
    }

    /// Set the minimum collateral ratio
    pub fn set_mcr(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::Mcr, value).map(|_| ())
    }

    /// Set the critical collateral ratio
    pub fn set_ccr(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::Ccr, value).map(|_| ())
    }

    /// Set the flat gas compensation
    pub fn set_gas_compensation(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::GasCompensation, value)
            .map(|_| ())
    }

    /// Set the minimum net debt
    pub fn set_min_net_debt(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::MinNetDebt, value)
            .map(|_| ())
    }

    /// Set the proportional gas compensation divisor
    pub fn set_percent_divisor(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::PercentDivisor, value)
            .map(|_| ())
    }

    /// Set the borrowing fee floor, in permille
    pub fn set_borrowing_fee_floor(&mut self, caller: Address, asset: Address, permille: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::BorrowingFeeFloor, permille)
            .map(|_| ())
    }

    /// Set the maximum borrowing fee, in permille
    pub fn set_max_borrowing_fee(&mut self, caller: Address, asset: Address, permille: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::MaxBorrowingFee, permille)
            .map(|_| ())
    }

    /// Set the redemption fee floor, in permille
    pub fn set_redemption_fee_floor(&mut self, caller: Address, asset: Address, permille: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::RedemptionFeeFloor, permille)
            .map(|_| ())
    }

    /// Set the liquidation bonus
    pub fn set_bonus(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::Bonus, value).map(|_| ())
    }

    /// Set the stability pool liquidation bonus
    pub fn set_bonus_to_sp(&mut self, caller: Address, asset: Address, value: u128) -> Result<()> {
        self.set_parameter(caller, asset, CollateralParameter::BonusToSp, value)
            .map(|_| ())
    }

    /// Replace every parameter of `asset` at once
    pub fn set_collateral_parameters(
        &mut self,
        caller: Address,
        asset: Address,
        params: CollateralParams,
    ) -> Result<()> {
        self.access.ensure(&caller, Role::Owner)?;
        self.market(&asset)?.ensure_active()?;
        let previous = *self.collaterals.params(&asset)?;
        self.collaterals.set_collateral_parameters(&asset, params)?;

        for parameter in CollateralParameter::ALL {
            let value = params.get(parameter);
            if previous.get(parameter) != value {
                self.record(ProtocolEvent::ParameterChanged {
                    asset,
                    parameter,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Reset `asset` to the protocol defaults
    pub fn set_as_default(&mut self, caller: Address, asset: Address) -> Result<()> {
        self.access.ensure(&caller, Role::Owner)?;
        self.market(&asset)?.ensure_active()?;
        self.collaterals.set_as_default(&asset);
        self.record(ProtocolEvent::ParametersReset { asset });
        Ok(())
    }

    /// Hand a role to a new holder (owner only)
    pub fn transfer_role(&mut self, caller: Address, role: Role, new_holder: Address) -> Result<()> {
        self.access.transfer_role(&caller, role, new_holder)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXTERNAL BALANCES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Credit collateral bridged in from outside the protocol to `to`
    pub fn credit_collateral(&mut self, asset: Address, to: Address, amount: u128) -> Result<()> {
        validate_non_zero(amount)?;
        self.wallet_mut(&asset)?.mint(&to, amount)
    }

    /// Mint reward supply to the treasury, ready to fund pools
    pub fn mint_reward_supply(&mut self, caller: Address, amount: u128) -> Result<()> {
        self.access.ensure(&caller, Role::Treasury)?;
        validate_non_zero(amount)?;
        self.reward_token.mint(&caller, amount)
    }

    /// Move VST between accounts
    pub fn transfer_vst(&mut self, from: Address, to: Address, amount: u128) -> Result<()> {
        validate_non_zero(amount)?;
        self.debt_token.transfer(&from, &to, amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TROVE OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a trove borrowing `vst_amount` against `coll`.
    ///
    /// The borrowing fee is added to the debt and minted to the fee recipient.
    pub fn open_trove(&mut self, owner: Address, asset: Address, coll: u128, vst_amount: u128) -> Result<()> {
        let result = self.try_open_trove(owner, asset, coll, vst_amount);
        self.guard(&asset, result)
    }

    fn try_open_trove(&mut self, owner: Address, asset: Address, coll: u128, vst_amount: u128) -> Result<()> {
        validate_non_zero(coll)?;
        validate_non_zero(vst_amount)?;
        let price = self.price(&asset)?;
        let now = self.clock.now();
        let params = *self.collaterals.params(&asset)?;
        let recovery_mode = self.collaterals.is_recovery_mode(&asset, &self.market(&asset)?.pools, price)?;

        let market = Self::active_market(&mut self.markets, &asset)?;
        let wallet = Self::wallet(&mut self.wallets, &asset)?;
        if market.troves.status(&owner).is_active() {
            return Err(Error::TroveAlreadyExists(owner.to_string()));
        }
        validate_balance(coll, wallet.balance_of(&owner))?;

        let fee = params.borrowing_fee(vst_amount)?;
        let debt = safe_add(vst_amount, fee)?;
        if debt < params.min_net_debt {
            return Err(Error::DebtBelowMinimum {
                amount: debt,
                minimum: params.min_net_debt,
            });
        }
        let icr = compute_cr(coll, debt, price);
        let minimum = if recovery_mode { params.ccr } else { params.mcr };
        if icr < minimum {
            return Err(Error::CollateralizationRatioTooLow { current: icr, minimum });
        }

        wallet.burn(&owner, coll)?;
        market.troves.open(owner, coll, debt)?;
        market.pools.receive_collateral(coll)?;
        market.pools.increase_debt(debt)?;
        self.debt_token.mint(&owner, vst_amount)?;
        self.debt_token.mint(&self.config.fee_recipient, fee)?;

        tracing::info!(
            asset = %asset,
            owner = %owner,
            coll = %format_amount(coll),
            debt = %format_amount(debt),
            fee = %format_amount(fee),
            recovery_mode,
            "trove opened"
        );
        self.events.push(
            now,
            ProtocolEvent::TroveOpened {
                asset,
                owner,
                coll,
                debt,
                fee,
            },
        );
        Ok(())
    }

    /// Move `amount` more collateral into `owner`'s trove
    pub fn add_collateral_to_trove(&mut self, owner: Address, asset: Address, amount: u128) -> Result<()> {
        let result = self.try_add_collateral_to_trove(owner, asset, amount);
        self.guard(&asset, result)
    }

    fn try_add_collateral_to_trove(&mut self, owner: Address, asset: Address, amount: u128) -> Result<()> {
        validate_non_zero(amount)?;
        let now = self.clock.now();
        let market = Self::active_market(&mut self.markets, &asset)?;
        let wallet = Self::wallet(&mut self.wallets, &asset)?;
        if !market.troves.status(&owner).is_active() {
            return Err(Error::TroveNotActive(owner.to_string()));
        }
        validate_balance(amount, wallet.balance_of(&owner))?;
        let position = market.troves.entire_position(&owner)?;
        let coll = safe_add(position.coll, amount)?;

        market.troves.apply_pending_rewards(&owner, &mut market.pools)?;
        wallet.burn(&owner, amount)?;
        market.troves.update_position(&owner, coll, position.debt)?;
        market.pools.receive_collateral(amount)?;

        tracing::info!(asset = %asset, owner = %owner, added = %format_amount(amount), coll = %format_amount(coll), "trove collateral added");
        self.events.push(
            now,
            ProtocolEvent::TroveUpdated {
                asset,
                owner,
                coll,
                debt: position.debt,
            },
        );
        Ok(())
    }

    /// Repay `amount` of `owner`'s debt; the remainder must stay above the minimum
    pub fn repay_debt(&mut self, owner: Address, asset: Address, amount: u128) -> Result<()> {
        let result = self.try_repay_debt(owner, asset, amount);
        self.guard(&asset, result)
    }

    fn try_repay_debt(&mut self, owner: Address, asset: Address, amount: u128) -> Result<()> {
        validate_non_zero(amount)?;
        let now = self.clock.now();
        let min_net_debt = self.collaterals.params(&asset)?.min_net_debt;
        let market = Self::active_market(&mut self.markets, &asset)?;
        if !market.troves.status(&owner).is_active() {
            return Err(Error::TroveNotActive(owner.to_string()));
        }
        let position = market.troves.entire_position(&owner)?;
        let debt = safe_sub(position.debt, amount).map_err(|_| Error::InvalidParameter {
            name: "amount".into(),
            reason: format!("repayment exceeds debt of {}", format_amount(position.debt)),
        })?;
        if debt < min_net_debt {
            return Err(Error::DebtBelowMinimum {
                amount: debt,
                minimum: min_net_debt,
            });
        }
        validate_balance(amount, self.debt_token.balance_of(&owner))?;

        market.troves.apply_pending_rewards(&owner, &mut market.pools)?;
        self.debt_token.burn(&owner, amount)?;
        market.troves.update_position(&owner, position.coll, debt)?;
        market.pools.decrease_debt(amount)?;

        tracing::info!(asset = %asset, owner = %owner, repaid = %format_amount(amount), debt = %format_amount(debt), "trove debt repaid");
        self.events.push(
            now,
            ProtocolEvent::TroveUpdated {
                asset,
                owner,
                coll: position.coll,
                debt,
            },
        );
        Ok(())
    }

    /// Repay the whole debt and take back all collateral
    pub fn close_trove(&mut self, owner: Address, asset: Address) -> Result<()> {
        let result = self.try_close_trove(owner, asset);
        self.guard(&asset, result)
    }

    fn try_close_trove(&mut self, owner: Address, asset: Address) -> Result<()> {
        let now = self.clock.now();
        let market = Self::active_market(&mut self.markets, &asset)?;
        let wallet = Self::wallet(&mut self.wallets, &asset)?;
        if !market.troves.status(&owner).is_active() {
            return Err(Error::TroveNotActive(owner.to_string()));
        }
        if market.troves.active_count() <= 1 {
            return Err(Error::InvalidParameter {
                name: "owner".into(),
                reason: format!("{} holds the last active trove of {}", owner, asset),
            });
        }
        let position = market.troves.entire_position(&owner)?;
        validate_balance(position.debt, self.debt_token.balance_of(&owner))?;

        market.troves.apply_pending_rewards(&owner, &mut market.pools)?;
        market.troves.close(&owner, TroveStatus::ClosedByOwner)?;
        market.pools.send_collateral(position.coll)?;
        market.pools.decrease_debt(position.debt)?;
        self.debt_token.burn(&owner, position.debt)?;
        wallet.mint(&owner, position.coll)?;

        tracing::info!(asset = %asset, owner = %owner, coll = %format_amount(position.coll), debt = %format_amount(position.debt), "trove closed");
        self.events.push(now, ProtocolEvent::TroveClosed { asset, owner });
        Ok(())
    }

    /// Pay `owner`'s liquidation surplus to their collateral wallet
    pub fn claim_collateral_surplus(&mut self, owner: Address, asset: Address) -> Result<u128> {
        let result = self.try_claim_collateral_surplus(owner, asset);
        self.guard(&asset, result)
    }

    fn try_claim_collateral_surplus(&mut self, owner: Address, asset: Address) -> Result<u128> {
        let now = self.clock.now();
        let market = Self::active_market(&mut self.markets, &asset)?;
        let wallet = Self::wallet(&mut self.wallets, &asset)?;

        let amount = market.pools.take_surplus(&owner)?;
        wallet.mint(&owner, amount)?;

        tracing::info!(asset = %asset, owner = %owner, amount = %format_amount(amount), "collateral surplus claimed");
        self.events
            .push(now, ProtocolEvent::SurplusClaimed { asset, owner, amount });
        Ok(amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit VST into `asset`'s stability pool
    pub fn provide_to_stability_pool(
        &mut self,
        depositor: Address,
        asset: Address,
        amount: u128,
    ) -> Result<DepositChange> {
        let result = self.try_provide(depositor, asset, amount);
        self.guard(&asset, result)
    }

    fn try_provide(&mut self, depositor: Address, asset: Address, amount: u128) -> Result<DepositChange> {
        let now = self.clock.now();
        let market = Self::active_market(&mut self.markets, &asset)?;
        let change = market.stability_pool.provide(
            &depositor,
            amount,
            &mut self.debt_token,
            &mut self.issuer,
            now,
        )?;
        self.pay_gains(asset, depositor, &change)?;
        Ok(change)
    }

    /// Withdraw VST from `asset`'s stability pool.
    ///
    /// Refused while the lowest trove of the asset is below MCR.
    pub fn withdraw_from_stability_pool(
        &mut self,
        depositor: Address,
        asset: Address,
        amount: u128,
    ) -> Result<DepositChange> {
        let result = self.try_withdraw(depositor, asset, amount);
        self.guard(&asset, result)
    }

    fn try_withdraw(&mut self, depositor: Address, asset: Address, amount: u128) -> Result<DepositChange> {
        let price = self.price(&asset)?;
        let now = self.clock.now();
        let mcr = self.collaterals.params(&asset)?.mcr;
        let market = Self::active_market(&mut self.markets, &asset)?;
        if let Some(lowest) = market.troves.sorted().first() {
            if market.troves.entire_position(&lowest)?.icr(price) < mcr {
                return Err(Error::UndercollateralizedTroves(asset.to_string()));
            }
        }
        let change = market.stability_pool.withdraw(
            &depositor,
            amount,
            &mut self.debt_token,
            &mut self.issuer,
            now,
        )?;
        self.pay_gains(asset, depositor, &change)?;
        Ok(change)
    }

    /// Pay out pending gains without changing the deposit
    pub fn claim_stability_gains(&mut self, depositor: Address, asset: Address) -> Result<DepositChange> {
        let result = self.try_claim_gains(depositor, asset);
        self.guard(&asset, result)
    }

    fn try_claim_gains(&mut self, depositor: Address, asset: Address) -> Result<DepositChange> {
        let now = self.clock.now();
        let market = Self::active_market(&mut self.markets, &asset)?;
        let change = market.stability_pool.claim(&depositor, &mut self.issuer, now)?;
        self.pay_gains(asset, depositor, &change)?;
        Ok(change)
    }

    fn pay_gains(&mut self, asset: Address, depositor: Address, change: &DepositChange) -> Result<()> {
        Self::wallet(&mut self.wallets, &asset)?.mint(&depositor, change.collateral_gain)?;
        self.issuer
            .send_reward(&mut self.reward_token, &depositor, change.reward_gain)?;

        if change.previous != change.current {
            self.record(ProtocolEvent::StabilityDepositChanged {
                asset,
                depositor,
                deposit: change.current,
            });
        }
        if change.collateral_gain > 0 || change.reward_gain > 0 {
            self.record(ProtocolEvent::StabilityGainsPaid {
                asset,
                depositor,
                collateral: change.collateral_gain,
                reward: change.reward_gain,
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ISSUER OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move `amount` VSTA from the treasury into `pool`'s schedule
    pub fn fund_pool(&mut self, caller: Address, pool: Address, amount: u128) -> Result<()> {
        self.access.ensure(&caller, Role::Treasury)?;
        let asset = self.asset_of_pool(&pool)?;
        let result = self.try_fund_pool(caller, pool, amount);
        self.guard(&asset, result)
    }

    fn try_fund_pool(&mut self, caller: Address, pool: Address, amount: u128) -> Result<()> {
        let now = self.clock.now();
        self.market_of_pool(&pool)?.ensure_active()?;
        let change = self
            .issuer
            .fund(&self.pool_registry, &mut self.reward_token, &caller, &pool, amount, now)?;
        self.route_issuance(&change)?;
        self.events.push(now, ProtocolEvent::PoolFunded { pool, amount });
        Ok(())
    }

    /// Withdraw `amount` of `pool`'s unissued supply back to the treasury
    pub fn defund_pool(&mut self, caller: Address, pool: Address, amount: u128) -> Result<()> {
        self.access.ensure(&caller, Role::Treasury)?;
        let asset = self.asset_of_pool(&pool)?;
        let result = self.try_defund_pool(caller, pool, amount);
        self.guard(&asset, result)
    }

    fn try_defund_pool(&mut self, caller: Address, pool: Address, amount: u128) -> Result<()> {
        let now = self.clock.now();
        self.market_of_pool(&pool)?.ensure_active()?;
        let change = self
            .issuer
            .defund(&self.pool_registry, &mut self.reward_token, &caller, &pool, amount, now)?;
        self.route_issuance(&change)?;
        self.events.push(now, ProtocolEvent::PoolDefunded { pool, amount });
        Ok(())
    }

    /// Move `amount` of unissued supply from one pool to another
    pub fn transfer_pool_funds(&mut self, caller: Address, from: Address, to: Address, amount: u128) -> Result<()> {
        self.access.ensure(&caller, Role::Treasury)?;
        let from_asset = self.asset_of_pool(&from)?;
        let to_asset = self.asset_of_pool(&to)?;
        self.market(&from_asset)?.ensure_active()?;
        self.market(&to_asset)?.ensure_active()?;

        let now = self.clock.now();
        let (source, destination) = self.issuer.transfer(&self.pool_registry, &from, &to, amount, now)?;
        let routed = self.route_issuance(&source);
        self.guard(&from_asset, routed)?;
        let routed = self.route_issuance(&destination);
        self.guard(&to_asset, routed)?;

        self.events
            .push(now, ProtocolEvent::PoolFundsTransferred { from, to, amount });
        Ok(())
    }

    /// Credit emission released by a schedule change to the pool's depositors
    fn route_issuance(&mut self, change: &ScheduleChange) -> Result<()> {
        if change.issued_before == 0 {
            return Ok(());
        }
        let asset = self.asset_of_pool(&change.pool)?;
        Self::active_market(&mut self.markets, &asset)?
            .stability_pool
            .accrue_rewards(change.issued_before)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidate one trove of `asset`
    pub fn liquidate(&mut self, caller: Address, asset: Address, owner: Address) -> Result<LiquidationReport> {
        let result = self.run_liquidation(caller, asset, |engine, ledgers, issuer, price, now| {
            engine.liquidate(ledgers, issuer, &owner, price, now)
        });
        self.guard(&asset, result)
    }

    /// Liquidate every eligible trove among `owners`
    pub fn liquidate_batch(
        &mut self,
        caller: Address,
        asset: Address,
        owners: &[Address],
    ) -> Result<LiquidationReport> {
        if owners.len() > self.config.max_batch_size {
            return Err(Error::InvalidParameter {
                name: "owners".into(),
                reason: format!(
                    "batch of {} exceeds maximum {}",
                    owners.len(),
                    self.config.max_batch_size
                ),
            });
        }
        let result = self.run_liquidation(caller, asset, |engine, ledgers, issuer, price, now| {
            engine.liquidate_batch(ledgers, issuer, owners, price, now)
        });
        self.guard(&asset, result)
    }

    /// Liquidate up to `n` troves starting from the lowest nominal ICR
    pub fn liquidate_troves(&mut self, caller: Address, asset: Address, n: usize) -> Result<LiquidationReport> {
        let limit = n.min(self.config.max_batch_size);
        let candidates: Vec<Address> = self.market(&asset)?.troves.sorted().iter().take(limit).collect();
        self.liquidate_batch(caller, asset, &candidates)
    }

    fn run_liquidation<L>(&mut self, caller: Address, asset: Address, run: L) -> Result<LiquidationReport>
    where
        L: FnOnce(&LiquidationEngine<'_>, &mut MarketLedgers<'_>, &mut RewardIssuer, u128, u64) -> Result<LiquidationReport>,
    {
        let price = self.price(&asset)?;
        let now = self.clock.now();
        let engine = LiquidationEngine::new(&self.collaterals, asset)?;
        let market = Self::active_market(&mut self.markets, &asset)?;
        let mut ledgers = MarketLedgers {
            troves: &mut market.troves,
            pools: &mut market.pools,
            stability_pool: &mut market.stability_pool,
            debt_token: &mut self.debt_token,
        };
        let report = run(&engine, &mut ledgers, &mut self.issuer, price, now)?;

        Self::wallet(&mut self.wallets, &asset)?.mint(&caller, report.totals.gas_compensation)?;
        for values in &report.liquidated {
            self.events.push(
                now,
                ProtocolEvent::TroveLiquidated {
                    asset,
                    owner: values.owner,
                    coll: values.entire_coll,
                    debt: values.entire_debt,
                    surplus: values.split.surplus,
                },
            );
        }
        self.events.push(
            now,
            ProtocolEvent::LiquidationCompleted {
                asset,
                liquidator: caller,
                troves: report.liquidated.len(),
                debt_offset: report.totals.debt_to_offset,
                debt_redistributed: report.totals.debt_to_redistribute,
                gas_compensation: report.totals.gas_compensation,
            },
        );
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Validated oracle price of `asset`
    pub fn price(&self, asset: &Address) -> Result<u128> {
        let reading = self.price_feed.fetch_price(asset)?;
        let now = self.clock.now();
        match reading.validated(now, self.config.max_price_age_secs) {
            Err(e @ Error::StalePrice { .. }) => {
                tracing::warn!(asset = %asset, age = reading.age(now), "stale price rejected");
                Err(e)
            }
            other => other,
        }
    }

    /// Market of `asset`
    pub fn market(&self, asset: &Address) -> Result<&AssetMarket> {
        self.markets
            .get(asset)
            .ok_or_else(|| Error::UnknownCollateral(asset.to_string()))
    }

    /// Status of `asset`'s market
    pub fn status(&self, asset: &Address) -> Result<&MarketStatus> {
        Ok(self.market(asset)?.status())
    }

    /// Total collateral ratio of `asset` at the oracle price
    pub fn tcr(&self, asset: &Address) -> Result<u128> {
        let price = self.price(asset)?;
        Ok(self.collaterals.tcr(&self.market(asset)?.pools, price))
    }

    /// Whether `asset` is in recovery mode at the oracle price
    pub fn is_recovery_mode(&self, asset: &Address) -> Result<bool> {
        let price = self.price(asset)?;
        self.collaterals
            .is_recovery_mode(asset, &self.market(asset)?.pools, price)
    }

    /// ICR of `owner`'s trove at the oracle price
    pub fn current_icr(&self, asset: &Address, owner: &Address) -> Result<u128> {
        let price = self.price(asset)?;
        self.collaterals
            .current_icr(&self.market(asset)?.troves, owner, price)
    }

    /// Stored trove of `owner`
    pub fn trove(&self, asset: &Address, owner: &Address) -> Option<&Trove> {
        self.markets.get(asset)?.troves.get(owner)
    }

    /// Compounded stability deposit of `depositor`
    pub fn compounded_deposit(&self, asset: &Address, depositor: &Address) -> Result<u128> {
        self.market(asset)?.stability_pool.compounded_deposit(depositor)
    }

    /// Pending collateral gain of `depositor`
    pub fn collateral_gain(&self, asset: &Address, depositor: &Address) -> Result<u128> {
        self.market(asset)?.stability_pool.collateral_gain(depositor)
    }

    /// Pending reward gain of `depositor`, excluding emission not yet issued
    pub fn reward_gain(&self, asset: &Address, depositor: &Address) -> Result<u128> {
        self.market(asset)?.stability_pool.reward_gain(depositor)
    }

    /// Stability pool of `asset`, if registered
    pub fn stability_pool_for(&self, asset: &Address) -> Option<Address> {
        self.pool_registry.resolve(asset)
    }

    /// Fraction of `pool`'s cap due by now
    pub fn issuance_fraction(&self, pool: &Address) -> Result<FixedPoint> {
        self.issuer.cumulative_fraction(pool, self.clock.now())
    }

    /// Reward cap of `pool`
    pub fn supply_cap(&self, pool: &Address) -> u128 {
        self.issuer.supply_cap(pool)
    }

    /// Rewards issued to `pool` so far
    pub fn total_issued(&self, pool: &Address) -> u128 {
        self.issuer.total_issued(pool)
    }

    /// Start of `pool`'s schedule, 0 when inactive
    pub fn schedule_anchor(&self, pool: &Address) -> u64 {
        self.issuer.anchor(pool)
    }

    /// Collateral held outside the protocol by `owner`
    pub fn collateral_balance(&self, asset: &Address, owner: &Address) -> u128 {
        self.wallets.get(asset).map_or(0, |w| w.balance_of(owner))
    }

    /// VST ledger
    pub fn debt_token(&self) -> &TokenLedger {
        &self.debt_token
    }

    /// VSTA ledger
    pub fn reward_token(&self) -> &TokenLedger {
        &self.reward_token
    }

    /// Reward issuer
    pub fn issuer(&self) -> &RewardIssuer {
        &self.issuer
    }

    /// Collateral registry
    pub fn collaterals(&self) -> &CollateralRegistry {
        &self.collaterals
    }

    /// Role holders
    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// Protocol configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Recorded events
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Price feed, for hosts that push prices
    pub fn price_feed_mut(&mut self) -> &mut F {
        &mut self.price_feed
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Halt `asset`'s market when `result` carries a critical error
    fn guard<T>(&mut self, asset: &Address, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.is_critical() {
                if let Some(market) = self.markets.get_mut(asset) {
                    if matches!(market.status, MarketStatus::Active) {
                        let reason = error.to_string();
                        market.halt(reason.clone());
                        self.record(ProtocolEvent::MarketHalted { asset: *asset, reason });
                    }
                }
            }
        }
        result
    }

    fn record(&mut self, event: ProtocolEvent) {
        self.events.push(self.clock.now(), event);
    }

    fn asset_of_pool(&self, pool: &Address) -> Result<Address> {
        self.pool_registry
            .asset_of(pool)
            .ok_or_else(|| Error::PoolNotRegistered(pool.to_string()))
    }

    fn market_of_pool(&self, pool: &Address) -> Result<&AssetMarket> {
        self.market(&self.asset_of_pool(pool)?)
    }

    fn wallet_mut(&mut self, asset: &Address) -> Result<&mut TokenLedger> {
        Self::wallet(&mut self.wallets, asset)
    }

    fn active_market<'m>(markets: &'m mut HashMap<Address, AssetMarket>, asset: &Address) -> Result<&'m mut AssetMarket> {
        let market = markets
            .get_mut(asset)
            .ok_or_else(|| Error::UnknownCollateral(asset.to_string()))?;
        market.ensure_active()?;
        Ok(market)
    }

    fn wallet<'w>(wallets: &'w mut HashMap<Address, TokenLedger>, asset: &Address) -> Result<&'w mut TokenLedger> {
        wallets
            .get_mut(asset)
            .ok_or_else(|| Error::UnknownCollateral(asset.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::price_feed::StaticPriceFeed;
    use crate::utils::clock::ManualClock;
    use crate::utils::constants::DECIMAL_PRECISION;

    const E18: u128 = DECIMAL_PRECISION;
    const START: u64 = 1_700_000_000;

    type Machine = ProtocolStateMachine<ManualClock, StaticPriceFeed>;

    struct Fixture {
        sm: Machine,
        clock: ManualClock,
        weth: Address,
        owner: Address,
        treasury: Address,
    }

    fn fixture() -> Fixture {
        let config = ProtocolConfig::default();
        let owner = config.owner;
        let treasury = config.treasury;
        let weth = Address::from_label("weth");
        let clock = ManualClock::new(START);
        let mut feed = StaticPriceFeed::new();
        feed.set_price(weth, 100 * E18, START).unwrap();

        let mut sm = ProtocolStateMachine::new(config, clock.clone(), feed).unwrap();
        sm.add_collateral(owner, weth).unwrap();
        Fixture {
            sm,
            clock,
            weth,
            owner,
            treasury,
        }
    }

    fn set_price(f: &mut Fixture, price: u128) {
        let now = f.clock.now();
        f.sm.price_feed_mut().set_price(f.weth, price, now).unwrap();
    }

    fn open(f: &mut Fixture, label: &str, coll: u128, vst: u128) -> Address {
        let who = Address::from_label(label);
        f.sm.credit_collateral(f.weth, who, coll).unwrap();
        f.sm.open_trove(who, f.weth, coll, vst).unwrap();
        who
    }

    /// bob: 100 coll / 2000 VST, alice: 12 coll / 1000 VST, bob deposits all his VST
    fn liquidation_fixture() -> (Fixture, Address, Address) {
        let mut f = fixture();
        let bob = open(&mut f, "bob", 100 * E18, 2_000 * E18);
        let alice = open(&mut f, "alice", 12 * E18, 1_000 * E18);
        f.sm.provide_to_stability_pool(bob, f.weth, 2_000 * E18).unwrap();
        (f, bob, alice)
    }

    #[test]
    fn test_add_collateral_registers_pool() {
        let mut f = fixture();
        let pool = f.sm.stability_pool_for(&f.weth).unwrap();
        assert_eq!(pool, f.weth.derive("stability-pool"));
        assert!(f.sm.collaterals().is_configured(&f.weth));
        assert!(matches!(
            f.sm.add_collateral(f.owner, f.weth),
            Err(Error::CollateralAlreadyExists(_))
        ));
        assert!(f.sm.stability_pool_for(&Address::from_label("unknown")).is_none());

        let stranger = Address::from_label("stranger");
        assert!(matches!(
            f.sm.add_collateral(stranger, Address::from_label("wbtc")),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_open_trove_charges_fee() {
        let mut f = fixture();
        let alice = open(&mut f, "alice", 20 * E18, 1_000 * E18);

        let trove = f.sm.trove(&f.weth, &alice).unwrap();
        assert_eq!(trove.debt, 1_005 * E18);
        assert_eq!(trove.coll, 20 * E18);
        assert_eq!(f.sm.debt_token().balance_of(&alice), 1_000 * E18);
        assert_eq!(f.sm.debt_token().balance_of(&f.sm.config().fee_recipient), 5 * E18);
        assert_eq!(f.sm.collateral_balance(&f.weth, &alice), 0);
        assert_eq!(f.sm.events().filter_by_type("TroveOpened").len(), 1);
    }

    #[test]
    fn test_open_trove_rejections() {
        let mut f = fixture();
        let alice = Address::from_label("alice");
        f.sm.credit_collateral(f.weth, alice, 10 * E18).unwrap();

        // Below min net debt
        assert!(matches!(
            f.sm.open_trove(alice, f.weth, 10 * E18, 100 * E18),
            Err(Error::DebtBelowMinimum { .. })
        ));
        // 1000 collateral value against 909.525 debt is below 110%
        assert!(matches!(
            f.sm.open_trove(alice, f.weth, 10 * E18, 905 * E18),
            Err(Error::CollateralizationRatioTooLow { .. })
        ));
        // Wallet too small
        assert!(matches!(
            f.sm.open_trove(alice, f.weth, 11 * E18, 500 * E18),
            Err(Error::InsufficientBalance { .. })
        ));
        assert!(f.sm.trove(&f.weth, &alice).is_none());
        assert_eq!(f.sm.collateral_balance(&f.weth, &alice), 10 * E18);
    }

    #[test]
    fn test_adjust_and_close_trove() {
        let mut f = fixture();
        let bob = open(&mut f, "bob", 100 * E18, 2_000 * E18);
        let alice = open(&mut f, "alice", 20 * E18, 1_000 * E18);

        f.sm.credit_collateral(f.weth, alice, 5 * E18).unwrap();
        f.sm.add_collateral_to_trove(alice, f.weth, 5 * E18).unwrap();
        assert_eq!(f.sm.trove(&f.weth, &alice).unwrap().coll, 25 * E18);

        f.sm.repay_debt(alice, f.weth, 200 * E18).unwrap();
        assert_eq!(f.sm.trove(&f.weth, &alice).unwrap().debt, 805 * E18);
        assert!(matches!(
            f.sm.repay_debt(alice, f.weth, 600 * E18),
            Err(Error::DebtBelowMinimum { .. })
        ));

        // Alice needs 5 more VST than she borrowed to cover the fee
        assert!(matches!(
            f.sm.close_trove(alice, f.weth),
            Err(Error::InsufficientBalance { .. })
        ));
        f.sm.transfer_vst(bob, alice, 5 * E18).unwrap();
        f.sm.close_trove(alice, f.weth).unwrap();

        assert_eq!(f.sm.collateral_balance(&f.weth, &alice), 25 * E18);
        assert_eq!(f.sm.debt_token().balance_of(&alice), 0);
        assert_eq!(
            f.sm.trove(&f.weth, &alice).unwrap().status,
            TroveStatus::ClosedByOwner
        );
        // The last trove stays open
        assert!(f.sm.close_trove(bob, f.weth).is_err());
    }

    #[test]
    fn test_liquidation_pays_gas_to_caller() {
        let (mut f, bob, alice) = liquidation_fixture();
        let keeper = Address::from_label("keeper");
        set_price(&mut f, 90 * E18);

        let report = f.sm.liquidate(keeper, f.weth, alice).unwrap();
        assert_eq!(report.liquidated.len(), 1);
        assert_eq!(report.totals.debt_to_offset, 1_005 * E18);
        assert_eq!(
            f.sm.collateral_balance(&f.weth, &keeper),
            report.totals.gas_compensation
        );
        // Loss per unit rounds up, so the deposit lands a few wei under 995
        let compounded = f.sm.compounded_deposit(&f.weth, &bob).unwrap();
        assert!(compounded <= 995 * E18);
        assert!(995 * E18 - compounded < 1_000_000);
        assert_eq!(
            f.sm.trove(&f.weth, &alice).unwrap().status,
            TroveStatus::ClosedByLiquidation
        );

        // Every unit of collateral credited is still accounted for
        let market = f.sm.market(&f.weth).unwrap();
        let accounted = market.pools().entire_system_coll()
            + market.pools().surplus_total()
            + market.stability_pool().collateral_balance()
            + f.sm.collateral_balance(&f.weth, &keeper);
        assert_eq!(accounted, 112 * E18);
        assert_eq!(f.sm.events().filter_by_type("TroveLiquidated").len(), 1);
    }

    #[test]
    fn test_gains_paid_to_wallet() {
        let (mut f, bob, alice) = liquidation_fixture();
        set_price(&mut f, 90 * E18);
        f.sm.liquidate(Address::from_label("keeper"), f.weth, alice).unwrap();

        let gain = f.sm.collateral_gain(&f.weth, &bob).unwrap();
        assert!(gain > 0);
        f.sm.claim_stability_gains(bob, f.weth).unwrap();
        assert_eq!(f.sm.collateral_balance(&f.weth, &bob), gain);
        assert_eq!(f.sm.collateral_gain(&f.weth, &bob).unwrap(), 0);
    }

    #[test]
    fn test_withdrawal_blocked_by_undercollateralized_trove() {
        let (mut f, bob, _alice) = liquidation_fixture();
        set_price(&mut f, 90 * E18);
        assert!(matches!(
            f.sm.withdraw_from_stability_pool(bob, f.weth, 100 * E18),
            Err(Error::UndercollateralizedTroves(_))
        ));

        set_price(&mut f, 100 * E18);
        f.sm.withdraw_from_stability_pool(bob, f.weth, 100 * E18).unwrap();
        assert_eq!(f.sm.compounded_deposit(&f.weth, &bob).unwrap(), 1_900 * E18);
    }

    #[test]
    fn test_liquidate_troves_from_the_bottom() {
        let (mut f, bob, alice) = liquidation_fixture();
        set_price(&mut f, 90 * E18);

        let report = f.sm.liquidate_troves(Address::from_label("keeper"), f.weth, 10).unwrap();
        assert_eq!(report.liquidated.len(), 1);
        assert_eq!(report.liquidated[0].owner, alice);
        assert_eq!(report.skipped, vec![bob]);
    }

    #[test]
    fn test_batch_size_limit() {
        let (mut f, _bob, alice) = liquidation_fixture();
        let max = f.sm.config().max_batch_size;
        let owners = vec![alice; max + 1];
        assert!(matches!(
            f.sm.liquidate_batch(Address::from_label("keeper"), f.weth, &owners),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_stale_price_rejected() {
        let (mut f, _bob, alice) = liquidation_fixture();
        f.clock.advance(f.sm.config().max_price_age_secs + 1);
        assert!(matches!(
            f.sm.liquidate(Address::from_label("keeper"), f.weth, alice),
            Err(Error::StalePrice { .. })
        ));
        assert!(matches!(f.sm.status(&f.weth).unwrap(), MarketStatus::Active));
    }

    #[test]
    fn test_funded_pool_pays_rewards() {
        let (mut f, bob, _alice) = liquidation_fixture();
        let pool = f.sm.stability_pool_for(&f.weth).unwrap();
        let cap = 1_000 * E18;

        assert!(matches!(
            f.sm.fund_pool(bob, pool, cap),
            Err(Error::Unauthorized(_))
        ));
        f.sm.mint_reward_supply(f.treasury, cap).unwrap();
        f.sm.fund_pool(f.treasury, pool, cap).unwrap();
        assert_eq!(f.sm.supply_cap(&pool), cap);
        assert_eq!(f.sm.schedule_anchor(&pool), START);

        f.clock.advance(365 * 24 * 3600);
        f.sm.claim_stability_gains(bob, f.weth).unwrap();

        let issued = f.sm.total_issued(&pool);
        assert!(issued.abs_diff(cap / 2) < 10_000_000_000_000);
        let paid = f.sm.reward_token().balance_of(&bob);
        assert!(paid <= issued);
        assert!(issued - paid < 1_000_000);
    }

    #[test]
    fn test_transfer_pool_funds_between_markets() {
        let mut f = fixture();
        let wbtc = Address::from_label("wbtc");
        let weth_pool = f.sm.stability_pool_for(&f.weth).unwrap();
        let wbtc_pool = f.sm.add_collateral(f.owner, wbtc).unwrap();

        f.sm.mint_reward_supply(f.treasury, 100 * E18).unwrap();
        f.sm.fund_pool(f.treasury, weth_pool, 100 * E18).unwrap();
        f.sm.transfer_pool_funds(f.treasury, weth_pool, wbtc_pool, 100 * E18).unwrap();

        assert_eq!(f.sm.supply_cap(&weth_pool), 0);
        assert_eq!(f.sm.schedule_anchor(&weth_pool), 0);
        assert_eq!(f.sm.supply_cap(&wbtc_pool), 100 * E18);

        f.sm.defund_pool(f.treasury, wbtc_pool, 40 * E18).unwrap();
        assert_eq!(f.sm.reward_token().balance_of(&f.treasury), 40 * E18);
        assert_eq!(f.sm.events().filter_by_type("PoolFundsTransferred").len(), 1);
    }

    #[test]
    fn test_parameter_setters_owner_only() {
        let mut f = fixture();
        let stranger = Address::from_label("stranger");
        assert!(matches!(
            f.sm.set_bonus(stranger, f.weth, 50 * E18 / 1000),
            Err(Error::Unauthorized(_))
        ));

        let bonus = f.sm.set_parameter(f.owner, f.weth, CollateralParameter::Bonus, 50 * E18 / 1000).unwrap();
        assert_eq!(f.sm.collaterals().params(&f.weth).unwrap().bonus, bonus);
        f.sm.set_as_default(f.owner, f.weth).unwrap();
        assert_eq!(
            f.sm.collaterals().params(&f.weth).unwrap(),
            &CollateralParams::default()
        );
        assert_eq!(f.sm.events().filter_by_type("ParametersReset").len(), 1);
    }

    #[test]
    fn test_critical_error_halts_market() {
        let (mut f, bob, _alice) = liquidation_fixture();
        let weth = f.weth;
        let result: Result<()> = f.sm.guard(&weth, Err(Error::InvariantViolation("pool drift".into())));
        assert!(result.is_err());
        assert!(matches!(f.sm.status(&weth).unwrap(), MarketStatus::Halted { .. }));
        assert_eq!(f.sm.events().filter_by_type("MarketHalted").len(), 1);

        assert!(matches!(
            f.sm.provide_to_stability_pool(bob, weth, E18),
            Err(Error::MarketHalted(_))
        ));
        // Reads keep working
        assert_eq!(f.sm.compounded_deposit(&weth, &bob).unwrap(), 2_000 * E18);
    }

    #[test]
    fn test_recoverable_error_keeps_market_active() {
        let mut f = fixture();
        let weth = f.weth;
        let result: Result<()> = f.sm.guard(&weth, Err(Error::ZeroAmount));
        assert!(result.is_err());
        assert!(matches!(f.sm.status(&weth).unwrap(), MarketStatus::Active));
    }
}
