//! Role-based authorization.
//!
//! Every privileged entry point goes through [`AccessControl::ensure`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;

/// Privileged roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Registers collateral and sets per-asset parameters
    Owner,
    /// Funds, defunds and moves reward supply between pools
    Treasury,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Treasury => write!(f, "treasury"),
        }
    }
}

/// Holders of each role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    owner: Address,
    treasury: Address,
}

impl AccessControl {
    /// Create with the initial role holders
    pub fn new(owner: Address, treasury: Address) -> Self {
        Self { owner, treasury }
    }

    /// Current holder of `role`
    pub fn holder(&self, role: Role) -> Address {
        match role {
            Role::Owner => self.owner,
            Role::Treasury => self.treasury,
        }
    }

    /// Fail with `Unauthorized` unless `caller` holds `role`
    pub fn ensure(&self, caller: &Address, role: Role) -> Result<()> {
        if *caller != self.holder(role) {
            return Err(Error::Unauthorized(format!("{} is not the {}", caller, role)));
        }
        Ok(())
    }

    /// Hand `role` to `new_holder`; only the owner may do this
    pub fn transfer_role(&mut self, caller: &Address, role: Role, new_holder: Address) -> Result<()> {
        self.ensure(caller, Role::Owner)?;
        match role {
            Role::Owner => self.owner = new_holder,
            Role::Treasury => self.treasury = new_holder,
        }
        tracing::info!(role = %role, holder = %new_holder, "role transferred");
        Ok(())
    }
}
