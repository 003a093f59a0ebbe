//! Protocol configuration.
//!
//! Everything that would otherwise be a global: role holders, issuance curve,
//! oracle tolerance, batch limits and the parameters applied to newly
//! registered collateral. Loaded from JSON, overridable from `VST_*`
//! environment variables, injected into the state machine at construction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::core::collateral::CollateralParams;
use crate::error::{Error, Result};
use crate::utils::constants::{DEFAULT_HALVING_MINUTES, MAX_BATCH_SIZE, MAX_EVENT_LOG_SIZE, MAX_PRICE_AGE_SECS};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Holder of the owner role
    pub owner: Address,
    /// Holder of the treasury role
    pub treasury: Address,
    /// Recipient of borrowing fees
    pub fee_recipient: Address,
    /// Half-life of the reward emission curve, in minutes
    pub issuance_halving_minutes: u64,
    /// Maximum accepted price age, in seconds
    pub max_price_age_secs: u64,
    /// Upper bound on troves liquidated in one call
    pub max_batch_size: usize,
    /// Events kept in memory
    pub max_events: usize,
    /// Parameters applied to newly registered collateral
    pub default_collateral: CollateralParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            owner: Address::from_label("owner"),
            treasury: Address::from_label("treasury"),
            fee_recipient: Address::from_label("fee-recipient"),
            issuance_halving_minutes: DEFAULT_HALVING_MINUTES,
            max_price_age_secs: MAX_PRICE_AGE_SECS,
            max_batch_size: MAX_BATCH_SIZE,
            max_events: MAX_EVENT_LOG_SIZE,
            default_collateral: CollateralParams::default(),
        }
    }
}

impl ProtocolConfig {
    /// Create a configuration with the given role holders
    pub fn new(owner: Address, treasury: Address) -> Self {
        Self {
            owner,
            treasury,
            ..Default::default()
        }
    }

    /// Builder: set the fee recipient
    pub fn with_fee_recipient(mut self, recipient: Address) -> Self {
        self.fee_recipient = recipient;
        self
    }

    /// Builder: set the emission half-life in minutes
    pub fn with_halving_minutes(mut self, minutes: u64) -> Self {
        self.issuance_halving_minutes = minutes;
        self
    }

    /// Builder: set the maximum accepted price age
    pub fn with_max_price_age(mut self, secs: u64) -> Self {
        self.max_price_age_secs = secs;
        self
    }

    /// Builder: set the batch liquidation limit
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Builder: set the parameters for new collateral
    pub fn with_default_collateral(mut self, params: CollateralParams) -> Self {
        self.default_collateral = params;
        self
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| Error::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Configuration(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Defaults with `VST_*` environment overrides
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `VST_*` environment overrides; malformed values are ignored
    pub fn with_env_overrides(mut self) -> Self {
        override_from_env("VST_OWNER", &mut self.owner);
        override_from_env("VST_TREASURY", &mut self.treasury);
        override_from_env("VST_FEE_RECIPIENT", &mut self.fee_recipient);
        override_from_env("VST_HALVING_MINUTES", &mut self.issuance_halving_minutes);
        override_from_env("VST_MAX_PRICE_AGE", &mut self.max_price_age_secs);
        override_from_env("VST_MAX_BATCH_SIZE", &mut self.max_batch_size);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.issuance_halving_minutes == 0 {
            return Err(Error::Configuration("issuance half-life must be greater than 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Configuration("batch size must be greater than 0".into()));
        }
        if self.owner == self.treasury {
            tracing::warn!(holder = %self.owner, "owner and treasury roles share one address");
        }
        self.default_collateral.validate()
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring malformed environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ProtocolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ProtocolConfig::new(Address::from_label("a"), Address::from_label("b"))
            .with_halving_minutes(60)
            .with_max_batch_size(5);
        assert_eq!(config.issuance_halving_minutes, 60);
        assert_eq!(config.max_batch_size, 5);
    }

    #[test]
    fn test_invalid_config() {
        assert!(ProtocolConfig::default().with_halving_minutes(0).validate().is_err());
        assert!(ProtocolConfig::default().with_max_batch_size(0).validate().is_err());

        let mut params = CollateralParams::default();
        params.percent_divisor = 1;
        assert!(ProtocolConfig::default().with_default_collateral(params).validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ProtocolConfig::default().with_max_price_age(120);

        config.save(&path).unwrap();
        let loaded = ProtocolConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "issuance_halving_minutes": 1440 }"#;
        let config: ProtocolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.issuance_halving_minutes, 1440);
        assert_eq!(config.max_batch_size, MAX_BATCH_SIZE);
    }
}
