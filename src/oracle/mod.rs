//! Oracle interface for collateral prices.

pub mod price_feed;

pub use price_feed::*;
