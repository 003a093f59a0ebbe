//! Utility modules for the VST protocol.
//!
//! This module contains shared utilities used across the protocol:
//! - Fixed-point arithmetic and exponential decay
//! - Addresses and hashing
//! - Validation helpers
//! - Time sources
//! - Constants

pub mod clock;
pub mod constants;
pub mod crypto;
pub mod math;
pub mod validation;

pub use clock::*;
pub use constants::*;
pub use crypto::*;
pub use math::*;
pub use validation::*;
