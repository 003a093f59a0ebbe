//! Price feeds.
//!
//! The protocol reads one price per collateral asset, quoted in VST with 18
//! decimals, together with the time it was observed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;
use crate::utils::math::format_amount;
use crate::utils::validation::validate_price_freshness;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE READING
// ═══════════════════════════════════════════════════════════════════════════════

/// A single price observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    /// Price of one collateral unit in VST, 18 decimals
    pub price: u128,
    /// Unix timestamp of the observation
    pub updated_at: u64,
}

impl PriceReading {
    /// Create a reading
    pub fn new(price: u128, updated_at: u64) -> Self {
        Self { price, updated_at }
    }

    /// Get age of the reading in seconds
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }

    /// Price if it is non-zero and no older than `max_age`
    pub fn validated(&self, now: u64, max_age: u64) -> Result<u128> {
        if self.price == 0 {
            return Err(Error::InvalidPrice("price is zero".into()));
        }
        validate_price_freshness(self.updated_at, now, max_age)?;
        Ok(self.price)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of collateral prices
pub trait PriceFeed {
    /// Latest reading for `asset`
    fn fetch_price(&self, asset: &Address) -> Result<PriceReading>;
}

/// Price feed holding the last pushed reading per asset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPriceFeed {
    readings: HashMap<Address, PriceReading>,
}

impl StaticPriceFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a reading for `asset`. Readings older than the current one are rejected.
    pub fn set_price(&mut self, asset: Address, price: u128, updated_at: u64) -> Result<()> {
        if price == 0 {
            return Err(Error::InvalidPrice(format!("zero price for {}", asset)));
        }
        if let Some(current) = self.readings.get(&asset) {
            if updated_at < current.updated_at {
                return Err(Error::InvalidParameter {
                    name: "updated_at".into(),
                    reason: "price timestamp is older than current".into(),
                });
            }
        }
        self.readings.insert(asset, PriceReading::new(price, updated_at));
        tracing::debug!(asset = %asset, price = %format_amount(price), updated_at, "price updated");
        Ok(())
    }
}

impl PriceFeed for StaticPriceFeed {
    fn fetch_price(&self, asset: &Address) -> Result<PriceReading> {
        self.readings
            .get(asset)
            .copied()
            .ok_or_else(|| Error::InvalidPrice(format!("no price for {}", asset)))
    }
}

impl<F: PriceFeed + ?Sized> PriceFeed for std::sync::Arc<std::sync::RwLock<F>> {
    fn fetch_price(&self, asset: &Address) -> Result<PriceReading> {
        self.read()
            .map_err(|_| Error::Lock)?
            .fetch_price(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DECIMAL_PRECISION;

    #[test]
    fn test_reading_validation() {
        let reading = PriceReading::new(2_000 * DECIMAL_PRECISION, 1_000);
        assert_eq!(reading.validated(1_500, 3_600).unwrap(), 2_000 * DECIMAL_PRECISION);
        assert!(matches!(reading.validated(10_000, 3_600), Err(Error::StalePrice { .. })));
        assert!(matches!(PriceReading::new(0, 1_000).validated(1_000, 3_600), Err(Error::InvalidPrice(_))));
    }

    #[test]
    fn test_static_feed() {
        let asset = Address::from_label("weth");
        let mut feed = StaticPriceFeed::new();
        assert!(feed.fetch_price(&asset).is_err());

        feed.set_price(asset, DECIMAL_PRECISION, 100).unwrap();
        assert_eq!(feed.fetch_price(&asset).unwrap().updated_at, 100);
        assert!(feed.set_price(asset, DECIMAL_PRECISION, 99).is_err());
        assert!(feed.set_price(asset, 0, 200).is_err());
    }

    #[test]
    fn test_shared_feed() {
        let asset = Address::from_label("weth");
        let shared = std::sync::Arc::new(std::sync::RwLock::new(StaticPriceFeed::new()));
        shared.write().unwrap().set_price(asset, 5 * DECIMAL_PRECISION, 0).unwrap();
        assert_eq!(shared.fetch_price(&asset).unwrap().price, 5 * DECIMAL_PRECISION);
    }
}
