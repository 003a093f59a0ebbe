//! Per-asset collateral parameters and collateralization checks.
//!
//! The registry owns the risk configuration of every collateral asset. All
//! setters validate against fixed absolute bounds and reject out-of-range
//! values; nothing is clamped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::pools::CollateralPools;
use crate::core::trove::TroveManager;
use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::math::{compute_cr, format_amount, mul_div};
use crate::utils::validation::{validate_in_bounds, validate_integer_in_bounds};

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Individually settable collateral parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollateralParameter {
    /// Minimum collateral ratio
    Mcr,
    /// Critical system collateral ratio
    Ccr,
    /// Flat gas compensation floor, in debt-token units
    GasCompensation,
    /// Minimum net debt of a trove
    MinNetDebt,
    /// Divisor giving the proportional collateral gas compensation
    PercentDivisor,
    /// Borrowing fee floor (input in per-mille)
    BorrowingFeeFloor,
    /// Maximum borrowing fee (input in per-mille)
    MaxBorrowingFee,
    /// Redemption fee floor (input in per-mille)
    RedemptionFeeFloor,
    /// Liquidation margin above 100% ICR before any owner surplus
    Bonus,
    /// Liquidation margin applied to the stability pool share
    BonusToSp,
}

impl CollateralParameter {
    /// All parameters, in declaration order
    pub const ALL: [CollateralParameter; 10] = [
        Self::Mcr,
        Self::Ccr,
        Self::GasCompensation,
        Self::MinNetDebt,
        Self::PercentDivisor,
        Self::BorrowingFeeFloor,
        Self::MaxBorrowingFee,
        Self::RedemptionFeeFloor,
        Self::Bonus,
        Self::BonusToSp,
    ];

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mcr => "mcr",
            Self::Ccr => "ccr",
            Self::GasCompensation => "gas_compensation",
            Self::MinNetDebt => "min_net_debt",
            Self::PercentDivisor => "percent_divisor",
            Self::BorrowingFeeFloor => "borrowing_fee_floor",
            Self::MaxBorrowingFee => "max_borrowing_fee",
            Self::RedemptionFeeFloor => "redemption_fee_floor",
            Self::Bonus => "bonus",
            Self::BonusToSp => "bonus_to_sp",
        }
    }

    /// Multiplier turning a setter input into the stored value
    pub fn input_scale(&self) -> u128 {
        match self {
            Self::BorrowingFeeFloor | Self::MaxBorrowingFee | Self::RedemptionFeeFloor => PERMILLE,
            _ => 1,
        }
    }

    /// Inclusive bounds on the stored value
    pub fn bounds(&self) -> (u128, u128) {
        match self {
            Self::Mcr => (MCR_MIN, MCR_MAX),
            Self::Ccr => (CCR_MIN, CCR_MAX),
            Self::GasCompensation => (GAS_COMPENSATION_MIN, GAS_COMPENSATION_MAX),
            Self::MinNetDebt => (0, MIN_NET_DEBT_MAX),
            Self::PercentDivisor => (PERCENT_DIVISOR_MIN, PERCENT_DIVISOR_MAX),
            Self::BorrowingFeeFloor => (0, BORROWING_FEE_FLOOR_MAX_PERMILLE * PERMILLE),
            Self::MaxBorrowingFee => (0, MAX_BORROWING_FEE_MAX_PERMILLE * PERMILLE),
            Self::RedemptionFeeFloor => (
                REDEMPTION_FEE_FLOOR_MIN_PERMILLE * PERMILLE,
                REDEMPTION_FEE_FLOOR_MAX_PERMILLE * PERMILLE,
            ),
            Self::Bonus | Self::BonusToSp => (0, BONUS_MAX),
        }
    }

    /// Validate a stored value for this parameter
    pub fn validate(&self, value: u128) -> Result<()> {
        let (min, max) = self.bounds();
        match self {
            Self::PercentDivisor => validate_integer_in_bounds(self.name(), value, min, max),
            _ => validate_in_bounds(self.name(), value, min, max),
        }
    }

    /// Convert a setter input to its stored value
    pub fn from_input(&self, input: u128) -> Result<u128> {
        input.checked_mul(self.input_scale()).ok_or_else(|| Error::InvalidParameter {
            name: self.name().into(),
            reason: format!("input {} out of range", input),
        })
    }
}

/// Risk configuration of one collateral asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralParams {
    /// Minimum collateral ratio
    pub mcr: u128,
    /// Critical system collateral ratio
    pub ccr: u128,
    /// Flat gas compensation floor, debt-token units
    pub gas_compensation: u128,
    /// Minimum net debt
    pub min_net_debt: u128,
    /// Proportional collateral gas compensation divisor
    pub percent_divisor: u128,
    /// Borrowing fee floor
    pub borrowing_fee_floor: u128,
    /// Maximum borrowing fee
    pub max_borrowing_fee: u128,
    /// Redemption fee floor
    pub redemption_fee_floor: u128,
    /// Liquidation margin
    pub bonus: u128,
    /// Liquidation margin for the stability pool share
    pub bonus_to_sp: u128,
}

impl Default for CollateralParams {
    fn default() -> Self {
        Self {
            mcr: MCR_DEFAULT,
            ccr: CCR_DEFAULT,
            gas_compensation: GAS_COMPENSATION_DEFAULT,
            min_net_debt: MIN_NET_DEBT_DEFAULT,
            percent_divisor: PERCENT_DIVISOR_DEFAULT,
            borrowing_fee_floor: BORROWING_FEE_FLOOR_DEFAULT,
            max_borrowing_fee: MAX_BORROWING_FEE_DEFAULT,
            redemption_fee_floor: REDEMPTION_FEE_FLOOR_DEFAULT,
            bonus: BONUS_DEFAULT,
            bonus_to_sp: BONUS_TO_SP_DEFAULT,
        }
    }
}

impl CollateralParams {
    /// Read one parameter
    pub fn get(&self, parameter: CollateralParameter) -> u128 {
        match parameter {
            CollateralParameter::Mcr => self.mcr,
            CollateralParameter::Ccr => self.ccr,
            CollateralParameter::GasCompensation => self.gas_compensation,
            CollateralParameter::MinNetDebt => self.min_net_debt,
            CollateralParameter::PercentDivisor => self.percent_divisor,
            CollateralParameter::BorrowingFeeFloor => self.borrowing_fee_floor,
            CollateralParameter::MaxBorrowingFee => self.max_borrowing_fee,
            CollateralParameter::RedemptionFeeFloor => self.redemption_fee_floor,
            CollateralParameter::Bonus => self.bonus,
            CollateralParameter::BonusToSp => self.bonus_to_sp,
        }
    }

    fn set(&mut self, parameter: CollateralParameter, value: u128) {
        match parameter {
            CollateralParameter::Mcr => self.mcr = value,
            CollateralParameter::Ccr => self.ccr = value,
            CollateralParameter::GasCompensation => self.gas_compensation = value,
            CollateralParameter::MinNetDebt => self.min_net_debt = value,
            CollateralParameter::PercentDivisor => self.percent_divisor = value,
            CollateralParameter::BorrowingFeeFloor => self.borrowing_fee_floor = value,
            CollateralParameter::MaxBorrowingFee => self.max_borrowing_fee = value,
            CollateralParameter::RedemptionFeeFloor => self.redemption_fee_floor = value,
            CollateralParameter::Bonus => self.bonus = value,
            CollateralParameter::BonusToSp => self.bonus_to_sp = value,
        }
    }

    /// Validate every field and the MCR/CCR ordering
    pub fn validate(&self) -> Result<()> {
        for parameter in CollateralParameter::ALL {
            parameter.validate(self.get(parameter))?;
        }
        if self.ccr < self.mcr {
            return Err(Error::InvalidParameter {
                name: "ccr".into(),
                reason: format!(
                    "CCR {} must not be below MCR {}",
                    format_amount(self.ccr),
                    format_amount(self.mcr)
                ),
            });
        }
        Ok(())
    }

    /// Margin above 100% ICR retained before an owner surplus arises.
    ///
    /// Both margins are configurable; the smaller one applies.
    pub fn liquidation_margin(&self) -> u128 {
        self.bonus.min(self.bonus_to_sp)
    }

    /// Borrowing fee charged on `amount` at the floor rate
    pub fn borrowing_fee(&self, amount: u128) -> Result<u128> {
        mul_div(amount, self.borrowing_fee_floor, DECIMAL_PRECISION)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Parameters of every configured collateral asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralRegistry {
    defaults: CollateralParams,
    params: HashMap<Address, CollateralParams>,
}

impl CollateralRegistry {
    /// Create a registry that configures new assets with `defaults`
    pub fn new(defaults: CollateralParams) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            params: HashMap::new(),
        })
    }

    /// Defaults applied by `sanitize_parameters` and `set_as_default`
    pub fn defaults(&self) -> &CollateralParams {
        &self.defaults
    }

    /// Check if an asset has been configured
    pub fn is_configured(&self, asset: &Address) -> bool {
        self.params.contains_key(asset)
    }

    /// Configured assets
    pub fn assets(&self) -> impl Iterator<Item = &Address> {
        self.params.keys()
    }

    /// Parameters of `asset`
    pub fn params(&self, asset: &Address) -> Result<&CollateralParams> {
        self.params
            .get(asset)
            .ok_or_else(|| Error::UnknownCollateral(asset.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply defaults to a never-configured asset. Returns whether anything changed.
    pub fn sanitize_parameters(&mut self, asset: &Address) -> bool {
        if self.is_configured(asset) {
            return false;
        }
        self.params.insert(*asset, self.defaults);
        tracing::info!(asset = %asset, "collateral parameters sanitized to defaults");
        true
    }

    /// Reset every parameter of `asset` to the defaults
    pub fn set_as_default(&mut self, asset: &Address) {
        self.params.insert(*asset, self.defaults);
        tracing::info!(asset = %asset, "collateral parameters reset to defaults");
    }

    /// Replace all parameters at once; nothing changes unless all are valid
    pub fn set_collateral_parameters(&mut self, asset: &Address, params: CollateralParams) -> Result<()> {
        params.validate()?;
        self.params.insert(*asset, params);
        tracing::info!(asset = %asset, "collateral parameters replaced");
        Ok(())
    }

    /// Set one parameter from its setter input (per-mille for fee floors)
    pub fn set_parameter(
        &mut self,
        asset: &Address,
        parameter: CollateralParameter,
        input: u128,
    ) -> Result<u128> {
        let value = parameter.from_input(input)?;
        let mut next = *self.params(asset)?;
        next.set(parameter, value);
        next.validate()?;
        self.params.insert(*asset, next);
        tracing::info!(asset = %asset, parameter = parameter.name(), value, "collateral parameter set");
        Ok(value)
    }

    /// Set the minimum collateral ratio
    pub fn set_mcr(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::Mcr, value).map(|_| ())
    }

    /// Set the critical collateral ratio
    pub fn set_ccr(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::Ccr, value).map(|_| ())
    }

    /// Set the flat gas compensation floor
    pub fn set_gas_compensation(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::GasCompensation, value).map(|_| ())
    }

    /// Set the minimum net debt
    pub fn set_min_net_debt(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::MinNetDebt, value).map(|_| ())
    }

    /// Set the collateral gas compensation divisor
    pub fn set_percent_divisor(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::PercentDivisor, value).map(|_| ())
    }

    /// Set the borrowing fee floor in per-mille
    pub fn set_borrowing_fee_floor(&mut self, asset: &Address, permille: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::BorrowingFeeFloor, permille).map(|_| ())
    }

    /// Set the maximum borrowing fee in per-mille
    pub fn set_max_borrowing_fee(&mut self, asset: &Address, permille: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::MaxBorrowingFee, permille).map(|_| ())
    }

    /// Set the redemption fee floor in per-mille
    pub fn set_redemption_fee_floor(&mut self, asset: &Address, permille: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::RedemptionFeeFloor, permille).map(|_| ())
    }

    /// Set the liquidation margin
    pub fn set_bonus(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::Bonus, value).map(|_| ())
    }

    /// Set the stability pool liquidation margin
    pub fn set_bonus_to_sp(&mut self, asset: &Address, value: u128) -> Result<()> {
        self.set_parameter(asset, CollateralParameter::BonusToSp, value).map(|_| ())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COLLATERALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// ICR of `owner`'s trove at `price`, including pending redistribution gains
    pub fn current_icr(&self, troves: &TroveManager, owner: &Address, price: u128) -> Result<u128> {
        Ok(troves.entire_position(owner)?.icr(price))
    }

    /// Total collateral ratio of the asset at `price`
    pub fn tcr(&self, pools: &CollateralPools, price: u128) -> u128 {
        compute_cr(pools.entire_system_coll(), pools.entire_system_debt(), price)
    }

    /// Recovery mode: TCR below CCR
    pub fn is_recovery_mode(&self, asset: &Address, pools: &CollateralPools, price: u128) -> Result<bool> {
        let ccr = self.params(asset)?.ccr;
        Ok(self.tcr(pools, price) < ccr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E18: u128 = DECIMAL_PRECISION;

    fn registry_with(asset: &Address) -> CollateralRegistry {
        let mut registry = CollateralRegistry::new(CollateralParams::default()).unwrap();
        registry.sanitize_parameters(asset);
        registry
    }

    #[test]
    fn test_sanitize_only_once() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);
        registry.set_mcr(&asset, 1_200_000_000_000_000_000).unwrap();

        assert!(!registry.sanitize_parameters(&asset));
        assert_eq!(registry.params(&asset).unwrap().mcr, 1_200_000_000_000_000_000);
    }

    #[test]
    fn test_set_as_default_resets() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);
        registry.set_percent_divisor(&asset, 2).unwrap();
        registry.set_as_default(&asset);
        assert_eq!(*registry.params(&asset).unwrap(), CollateralParams::default());
    }

    #[test]
    fn test_bounds_rejected_not_clamped() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);

        assert!(registry.set_mcr(&asset, MCR_MIN - 1).is_err());
        assert!(registry.set_ccr(&asset, CCR_MAX + 1).is_err());
        assert!(registry.set_gas_compensation(&asset, GAS_COMPENSATION_MIN - 1).is_err());
        assert!(registry.set_min_net_debt(&asset, MIN_NET_DEBT_MAX + 1).is_err());
        assert!(registry.set_percent_divisor(&asset, 1).is_err());
        assert!(registry.set_percent_divisor(&asset, 201).is_err());
        assert!(registry.set_borrowing_fee_floor(&asset, 51).is_err());
        assert!(registry.set_max_borrowing_fee(&asset, 201).is_err());
        assert!(registry.set_redemption_fee_floor(&asset, 2).is_err());
        assert!(registry.set_redemption_fee_floor(&asset, 101).is_err());
        assert!(registry.set_bonus(&asset, BONUS_MAX + 1).is_err());

        assert_eq!(*registry.params(&asset).unwrap(), CollateralParams::default());
    }

    #[test]
    fn test_permille_inputs() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);
        registry.set_borrowing_fee_floor(&asset, 50).unwrap();
        registry.set_redemption_fee_floor(&asset, 3).unwrap();

        let params = registry.params(&asset).unwrap();
        assert_eq!(params.borrowing_fee_floor, E18 / 1000 * 50);
        assert_eq!(params.redemption_fee_floor, E18 / 1000 * 3);
    }

    #[test]
    fn test_ccr_must_cover_mcr() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);

        assert!(registry.set_mcr(&asset, MCR_MAX).is_err());
        registry.set_ccr(&asset, CCR_MAX).unwrap();
        registry.set_mcr(&asset, MCR_MAX).unwrap();
        assert!(registry.set_ccr(&asset, CCR_MIN).is_err());
    }

    #[test]
    fn test_set_collateral_parameters_all_or_nothing() {
        let asset = Address::from_label("weth");
        let mut registry = registry_with(&asset);
        let mut params = CollateralParams::default();
        params.mcr = 1_300_000_000_000_000_000;
        params.percent_divisor = 0;

        assert!(registry.set_collateral_parameters(&asset, params).is_err());
        assert_eq!(registry.params(&asset).unwrap().mcr, MCR_DEFAULT);

        params.percent_divisor = 200;
        registry.set_collateral_parameters(&asset, params).unwrap();
        assert_eq!(registry.params(&asset).unwrap().mcr, 1_300_000_000_000_000_000);
    }

    #[test]
    fn test_unknown_asset() {
        let mut registry = CollateralRegistry::new(CollateralParams::default()).unwrap();
        let asset = Address::from_label("unknown");
        assert!(matches!(registry.set_mcr(&asset, MCR_DEFAULT), Err(Error::UnknownCollateral(_))));
    }

    #[test]
    fn test_liquidation_margin_is_smaller_bonus() {
        let mut params = CollateralParams::default();
        params.bonus = 50 * PERMILLE;
        assert_eq!(params.liquidation_margin(), 50 * PERMILLE);
        params.bonus_to_sp = 20 * PERMILLE;
        assert_eq!(params.liquidation_margin(), 20 * PERMILLE);
    }

    #[test]
    fn test_recovery_mode() {
        let asset = Address::from_label("weth");
        let registry = registry_with(&asset);
        let mut pools = CollateralPools::new();
        pools.receive_collateral(10 * E18).unwrap();
        pools.increase_debt(1_000 * E18).unwrap();

        // TCR = 10 * 200 / 1000 = 200%
        assert!(!registry.is_recovery_mode(&asset, &pools, 200 * E18).unwrap());
        // TCR = 10 * 140 / 1000 = 140%
        assert!(registry.is_recovery_mode(&asset, &pools, 140 * E18).unwrap());
        // An empty system is never in recovery mode
        assert!(!registry.is_recovery_mode(&asset, &CollateralPools::new(), E18).unwrap());
    }
}
