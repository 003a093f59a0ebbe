//! Liquidation subsystem.
//!
//! - Stability pool with product-sum accounting
//! - Redistribution accumulators
//! - Asset to pool registry
//! - Liquidation engine

pub mod engine;
pub mod redistribution;
pub mod registry;
pub mod stability_pool;

pub use engine::*;
pub use redistribution::*;
pub use registry::*;
pub use stability_pool::*;
