//! Protocol module - Core state machine and orchestration.
//!
//! This module provides the state machine that owns every market and
//! ledger of the VST protocol, its event log and a thread-safe handle.

pub mod events;
pub mod market;
pub mod shared;
pub mod state_machine;

pub use events::*;
pub use market::*;
pub use shared::*;
pub use state_machine::*;
