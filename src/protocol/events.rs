//! Protocol events for state change notifications.
//!
//! Every committed state change appends one event to a bounded in-memory log,
//! so hosts and tests can follow what happened without diffing ledgers.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::collateral::CollateralParameter;
use crate::utils::crypto::{Address, Hash};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Market events
    /// Collateral asset registered with its stability pool
    CollateralAdded { asset: Address, stability_pool: Address },
    /// One parameter changed
    ParameterChanged { asset: Address, parameter: CollateralParameter, value: u128 },
    /// Parameters reset to defaults
    ParametersReset { asset: Address },
    /// Market refuses further mutations after an invariant violation
    MarketHalted { asset: Address, reason: String },

    // Trove events
    /// Trove opened
    TroveOpened { asset: Address, owner: Address, coll: u128, debt: u128, fee: u128 },
    /// Trove collateral or debt changed by its owner
    TroveUpdated { asset: Address, owner: Address, coll: u128, debt: u128 },
    /// Trove repaid in full and closed
    TroveClosed { asset: Address, owner: Address },
    /// Trove liquidated
    TroveLiquidated { asset: Address, owner: Address, coll: u128, debt: u128, surplus: u128 },
    /// Liquidation call finished
    LiquidationCompleted {
        asset: Address,
        liquidator: Address,
        troves: usize,
        debt_offset: u128,
        debt_redistributed: u128,
        gas_compensation: u128,
    },
    /// Surplus collateral claimed by a liquidated owner
    SurplusClaimed { asset: Address, owner: Address, amount: u128 },

    // Stability pool events
    /// Deposit changed
    StabilityDepositChanged { asset: Address, depositor: Address, deposit: u128 },
    /// Collateral and reward gains paid
    StabilityGainsPaid { asset: Address, depositor: Address, collateral: u128, reward: u128 },

    // Issuance events
    /// Pool funded by the treasury
    PoolFunded { pool: Address, amount: u128 },
    /// Pool cap withdrawn to the treasury
    PoolDefunded { pool: Address, amount: u128 },
    /// Cap moved between pools
    PoolFundsTransferred { from: Address, to: Address, amount: u128 },
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CollateralAdded { .. } => "CollateralAdded",
            Self::ParameterChanged { .. } => "ParameterChanged",
            Self::ParametersReset { .. } => "ParametersReset",
            Self::MarketHalted { .. } => "MarketHalted",
            Self::TroveOpened { .. } => "TroveOpened",
            Self::TroveUpdated { .. } => "TroveUpdated",
            Self::TroveClosed { .. } => "TroveClosed",
            Self::TroveLiquidated { .. } => "TroveLiquidated",
            Self::LiquidationCompleted { .. } => "LiquidationCompleted",
            Self::SurplusClaimed { .. } => "SurplusClaimed",
            Self::StabilityDepositChanged { .. } => "StabilityDepositChanged",
            Self::StabilityGainsPaid { .. } => "StabilityGainsPaid",
            Self::PoolFunded { .. } => "PoolFunded",
            Self::PoolDefunded { .. } => "PoolDefunded",
            Self::PoolFundsTransferred { .. } => "PoolFundsTransferred",
        }
    }
}

/// An event with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number
    pub sequence: u64,
    /// Clock time when recorded
    pub timestamp: u64,
    /// The event
    pub event: ProtocolEvent,
}

impl EventRecord {
    /// Compute event hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded log of the most recent events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    records: VecDeque<EventRecord>,
    capacity: usize,
    next_sequence: u64,
}

impl EventLog {
    /// Create a log keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Append an event, dropping the oldest when full
    pub fn push(&mut self, timestamp: u64, event: ProtocolEvent) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventRecord {
            sequence: self.next_sequence,
            timestamp,
            event,
        });
        self.next_sequence += 1;
    }

    /// Iterate over kept events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Most recent event
    pub fn last(&self) -> Option<&EventRecord> {
        self.records.back()
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.event.event_type() == event_type)
            .collect()
    }

    /// Get the number of kept events
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total events ever recorded
    pub fn total_recorded(&self) -> u64 {
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(amount: u128) -> ProtocolEvent {
        ProtocolEvent::PoolFunded {
            pool: Address::from_label("pool"),
            amount,
        }
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = EventLog::new(2);
        log.push(1, funded(1));
        log.push(2, funded(2));
        log.push(3, funded(3));

        assert_eq!(log.len(), 2);
        assert_eq!(log.total_recorded(), 3);
        assert_eq!(log.iter().next().map(|r| r.sequence), Some(1));
        assert_eq!(log.last().map(|r| r.timestamp), Some(3));
    }

    #[test]
    fn test_filter_by_type() {
        let mut log = EventLog::new(10);
        log.push(0, funded(1));
        log.push(
            0,
            ProtocolEvent::ParametersReset {
                asset: Address::from_label("weth"),
            },
        );
        assert_eq!(log.filter_by_type("PoolFunded").len(), 1);
        assert_eq!(log.filter_by_type("ParametersReset").len(), 1);
        assert!(log.filter_by_type("TroveOpened").is_empty());
    }

    #[test]
    fn test_record_hash_differs_by_sequence() {
        let mut log = EventLog::new(10);
        log.push(0, funded(1));
        log.push(0, funded(1));
        let hashes: Vec<_> = log.iter().map(EventRecord::hash).collect();
        assert_ne!(hashes[0], hashes[1]);
    }
}
