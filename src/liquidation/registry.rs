//! Collateral asset to stability pool directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;

/// Maps each collateral asset to the address of its stability pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StabilityPoolRegistry {
    pools_by_asset: HashMap<Address, Address>,
    assets_by_pool: HashMap<Address, Address>,
}

impl StabilityPoolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pool` as the stability pool of `asset`
    pub fn register(&mut self, asset: Address, pool: Address) -> Result<()> {
        if self.pools_by_asset.contains_key(&asset) {
            return Err(Error::CollateralAlreadyExists(asset.to_string()));
        }
        if self.assets_by_pool.contains_key(&pool) {
            return Err(Error::InvalidParameter {
                name: "pool".into(),
                reason: format!("{} already serves another asset", pool),
            });
        }
        self.pools_by_asset.insert(asset, pool);
        self.assets_by_pool.insert(pool, asset);
        tracing::info!(asset = %asset, pool = %pool, "stability pool registered");
        Ok(())
    }

    /// Pool of `asset`, or `None` when the asset has no pool
    pub fn resolve(&self, asset: &Address) -> Option<Address> {
        self.pools_by_asset.get(asset).copied()
    }

    /// Asset served by `pool`
    pub fn asset_of(&self, pool: &Address) -> Option<Address> {
        self.assets_by_pool.get(pool).copied()
    }

    /// Check if `pool` is a registered stability pool
    pub fn is_pool(&self, pool: &Address) -> bool {
        self.assets_by_pool.contains_key(pool)
    }

    /// Fail with `PoolNotRegistered` unless `pool` is registered
    pub fn ensure_pool(&self, pool: &Address) -> Result<()> {
        if !self.is_pool(pool) {
            return Err(Error::PoolNotRegistered(pool.to_string()));
        }
        Ok(())
    }

    /// Number of registered pools
    pub fn len(&self) -> usize {
        self.pools_by_asset.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.pools_by_asset.is_empty()
    }
}
