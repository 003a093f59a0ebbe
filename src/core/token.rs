//! Fungible token ledgers.
//!
//! The same balance ledger backs the VST debt token, the VSTA reward token and
//! each collateral asset's wallet balances:
//! - Minting and burning
//! - Balance tracking
//! - Transfers
//! - Supply invariant checks

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::{format_amount, safe_add};
use crate::utils::validation::validate_balance;

/// A fungible token: total supply plus per-account balances.
///
/// Zero-amount moves are no-ops; callers validate user-supplied amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Token symbol
    pub symbol: String,
    total_supply: u128,
    balances: HashMap<Address, u128>,
}

impl TokenLedger {
    /// Create an empty ledger
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            total_supply: 0,
            balances: HashMap::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SUPPLY MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get total supply
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Get balance of an address
    pub fn balance_of(&self, owner: &Address) -> u128 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    /// Mint new tokens to `to`
    pub fn mint(&mut self, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let new_supply = safe_add(self.total_supply, amount)?;
        let new_balance = safe_add(self.balance_of(to), amount)?;

        self.balances.insert(*to, new_balance);
        self.total_supply = new_supply;
        tracing::trace!(token = %self.symbol, to = %to, amount = %format_amount(amount), "mint");
        Ok(())
    }

    /// Burn tokens held by `from`
    pub fn burn(&mut self, from: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balance_of(from);
        validate_balance(amount, balance)?;

        self.set_balance(from, balance - amount);
        self.total_supply = self.total_supply.checked_sub(amount).ok_or_else(|| {
            Error::InvariantViolation(format!("{} supply below burned amount", self.symbol))
        })?;
        tracing::trace!(token = %self.symbol, from = %from, amount = %format_amount(amount), "burn");
        Ok(())
    }

    /// Transfer tokens between accounts
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let from_balance = self.balance_of(from);
        validate_balance(amount, from_balance)?;
        let to_balance = safe_add(self.balance_of(to), amount)?;

        self.set_balance(from, from_balance - amount);
        self.balances.insert(*to, to_balance);
        Ok(())
    }

    fn set_balance(&mut self, owner: &Address, balance: u128) {
        if balance == 0 {
            self.balances.remove(owner);
        } else {
            self.balances.insert(*owner, balance);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get number of token holders
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Verify supply invariant (total_supply == sum of all balances)
    pub fn verify_supply_invariant(&self) -> bool {
        self.balances
            .values()
            .try_fold(0u128, |acc, b| acc.checked_add(*b))
            .map_or(false, |sum| sum == self.total_supply)
    }

    /// Deterministic fingerprint of supply and balances
    pub fn state_hash(&self) -> Hash {
        let mut data = Vec::new();
        data.extend_from_slice(self.symbol.as_bytes());
        data.extend_from_slice(&self.total_supply.to_be_bytes());

        let mut sorted: Vec<_> = self.balances.iter().collect();
        sorted.sort_by_key(|(k, _)| **k);
        for (owner, balance) in sorted {
            data.extend_from_slice(owner.as_bytes());
            data.extend_from_slice(&balance.to_be_bytes());
        }

        Hash::sha256(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    #[test]
    fn test_mint_and_burn() {
        let mut token = TokenLedger::new("VST");
        token.mint(&addr("alice"), 1_000).unwrap();
        assert_eq!(token.total_supply(), 1_000);
        assert_eq!(token.balance_of(&addr("alice")), 1_000);

        token.burn(&addr("alice"), 400).unwrap();
        assert_eq!(token.total_supply(), 600);
        assert!(token.verify_supply_invariant());
    }

    #[test]
    fn test_burn_insufficient() {
        let mut token = TokenLedger::new("VST");
        token.mint(&addr("alice"), 100).unwrap();
        assert_eq!(
            token.burn(&addr("alice"), 101),
            Err(Error::InsufficientBalance { required: 101, available: 100 })
        );
        assert_eq!(token.total_supply(), 100);
    }

    #[test]
    fn test_transfer() {
        let mut token = TokenLedger::new("VSTA");
        token.mint(&addr("alice"), 500).unwrap();
        token.transfer(&addr("alice"), &addr("bob"), 500).unwrap();

        assert_eq!(token.balance_of(&addr("alice")), 0);
        assert_eq!(token.balance_of(&addr("bob")), 500);
        assert_eq!(token.holder_count(), 1);
        assert!(token.transfer(&addr("alice"), &addr("bob"), 1).is_err());
    }

    #[test]
    fn test_zero_moves_are_noops() {
        let mut token = TokenLedger::new("VST");
        token.mint(&addr("alice"), 0).unwrap();
        token.burn(&addr("alice"), 0).unwrap();
        assert_eq!(token.holder_count(), 0);
    }

    #[test]
    fn test_state_hash_order_independent() {
        let mut a = TokenLedger::new("VST");
        a.mint(&addr("alice"), 1).unwrap();
        a.mint(&addr("bob"), 2).unwrap();

        let mut b = TokenLedger::new("VST");
        b.mint(&addr("bob"), 2).unwrap();
        b.mint(&addr("alice"), 1).unwrap();

        assert_eq!(a.state_hash(), b.state_hash());
    }
}
