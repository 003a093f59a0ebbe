//! # VST Protocol
//!
//! Core accounting of a multi-collateral, overcollateralized stablecoin.
//! Each collateral asset gets its own market with troves, a stability pool
//! absorbing liquidated debt and a VSTA reward schedule.
//!
//! ## Architecture
//!
//! The protocol consists of several core modules:
//!
//! - **Core**: Configuration, collateral parameters, troves, pools and token ledgers
//! - **Liquidation**: Liquidation engine, stability pools and redistribution
//! - **Issuance**: Decaying reward schedules funded by the treasury
//! - **Oracle**: Price feed interface with freshness checks
//! - **Protocol**: The state machine tying the markets together
//!
//! ## Example
//!
//! ```rust,ignore
//! use vst::prelude::*;
//!
//! let mut sm = ProtocolStateMachine::new(config, SystemClock, feed)?;
//! let pool = sm.add_collateral(owner, weth)?;
//! sm.open_trove(alice, weth, 20 * DECIMAL_PRECISION, 1_000 * DECIMAL_PRECISION)?;
//! sm.provide_to_stability_pool(alice, weth, 500 * DECIMAL_PRECISION)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod issuance;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        access::{AccessControl, Role},
        collateral::{CollateralParameter, CollateralParams, CollateralRegistry},
        config::ProtocolConfig,
        token::TokenLedger,
        trove::{Trove, TroveManager, TroveStatus},
    };
    pub use crate::error::{Error, Result};
    pub use crate::issuance::{issuer::RewardIssuer, schedule::issuance_fraction, RewardSource};
    pub use crate::liquidation::{
        engine::{compute_liquidation_split, LiquidationEngine, LiquidationReport, LiquidationSplit},
        stability_pool::StabilityPool,
    };
    pub use crate::oracle::price_feed::{PriceFeed, PriceReading, StaticPriceFeed};
    pub use crate::protocol::{
        market::{AssetMarket, MarketStatus},
        shared::SharedProtocol,
        state_machine::ProtocolStateMachine,
    };
    pub use crate::utils::{
        clock::{Clock, ManualClock, SystemClock},
        constants::DECIMAL_PRECISION,
        crypto::{Address, Hash},
        math::FixedPoint,
    };
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "VST";
