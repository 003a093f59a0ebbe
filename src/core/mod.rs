//! Core modules for the VST protocol.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and collateral parameters
//! - Trove ledger with lazy redistribution
//! - Collateral and debt pools
//! - Fungible token ledgers
//! - Role-based authorization

pub mod access;
pub mod collateral;
pub mod config;
pub mod pools;
pub mod token;
pub mod trove;

pub use access::*;
pub use collateral::*;
pub use config::*;
pub use pools::*;
pub use token::*;
pub use trove::*;
