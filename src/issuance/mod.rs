//! Reward token issuance.
//!
//! - Decaying emission schedule per pool
//! - Treasury-funded issuer custodying the reward supply

pub mod issuer;
pub mod schedule;

pub use issuer::*;
pub use schedule::*;

use crate::error::Result;
use crate::utils::crypto::Address;

/// Source of stability pool rewards
pub trait RewardSource {
    /// Issue everything due to `pool` at `now` and return the amount
    fn issue(&mut self, pool: &Address, now: u64) -> Result<u128>;
}

/// Reward source that never emits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewards;

impl RewardSource for NoRewards {
    fn issue(&mut self, _pool: &Address, _now: u64) -> Result<u128> {
        Ok(0)
    }
}
