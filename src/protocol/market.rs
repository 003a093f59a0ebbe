//! Per-asset market: troves, pools and stability pool of one collateral.

use serde::{Deserialize, Serialize};

use crate::core::pools::CollateralPools;
use crate::core::trove::TroveManager;
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::StabilityPool;
use crate::utils::crypto::Address;

/// Whether a market accepts mutations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Normal operation
    Active,
    /// Stopped after an invariant violation; read-only
    Halted {
        /// What went wrong
        reason: String,
    },
}

/// Ledgers of one collateral asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMarket {
    pub(crate) asset: Address,
    pub(crate) troves: TroveManager,
    pub(crate) pools: CollateralPools,
    pub(crate) stability_pool: StabilityPool,
    pub(crate) status: MarketStatus,
}

impl AssetMarket {
    /// Create an empty market whose stability pool lives at `pool_address`
    pub fn new(asset: Address, pool_address: Address) -> Self {
        Self {
            asset,
            troves: TroveManager::new(),
            pools: CollateralPools::new(),
            stability_pool: StabilityPool::new(pool_address, asset),
            status: MarketStatus::Active,
        }
    }

    /// Collateral asset
    pub fn asset(&self) -> Address {
        self.asset
    }

    /// Trove ledger
    pub fn troves(&self) -> &TroveManager {
        &self.troves
    }

    /// Active, default and surplus pools
    pub fn pools(&self) -> &CollateralPools {
        &self.pools
    }

    /// Stability pool
    pub fn stability_pool(&self) -> &StabilityPool {
        &self.stability_pool
    }

    /// Current status
    pub fn status(&self) -> &MarketStatus {
        &self.status
    }

    /// Fail with `MarketHalted` unless the market is active
    pub fn ensure_active(&self) -> Result<()> {
        match &self.status {
            MarketStatus::Active => Ok(()),
            MarketStatus::Halted { reason } => {
                Err(Error::MarketHalted(format!("{}: {}", self.asset, reason)))
            }
        }
    }

    pub(crate) fn halt(&mut self, reason: String) {
        tracing::error!(asset = %self.asset, reason = %reason, "market halted");
        self.status = MarketStatus::Halted { reason };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_blocks_mutations() {
        let asset = Address::from_label("weth");
        let mut market = AssetMarket::new(asset, asset.derive("stability-pool"));
        assert!(market.ensure_active().is_ok());

        market.halt("accounting mismatch".into());
        assert!(matches!(market.ensure_active(), Err(Error::MarketHalted(_))));
        assert!(matches!(market.status(), MarketStatus::Halted { .. }));
    }
}
