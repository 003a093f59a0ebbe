//! Error types for the VST protocol core.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped
//! by the component that raises them and carry a stable numeric code for hosts
//! that surface errors across a process boundary.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the VST protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Trove Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Trove not found for the given owner
    #[error("Trove not found: {0}")]
    TroveNotFound(String),

    /// Owner already has an active trove for this asset
    #[error("Trove already exists: {0}")]
    TroveAlreadyExists(String),

    /// Trove exists but is not active
    #[error("Trove is not active: {0}")]
    TroveNotActive(String),

    /// Collateralization ratio below the required threshold
    #[error("Collateralization ratio {current} below minimum {minimum} (18-decimal fixed point)")]
    CollateralizationRatioTooLow {
        /// Current ratio, 18-decimal fixed point
        current: u128,
        /// Required ratio, 18-decimal fixed point
        minimum: u128,
    },

    /// Net debt below the per-asset minimum
    #[error("Net debt {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Requested net debt
        amount: u128,
        /// Configured minimum net debt
        minimum: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Trove is healthy under the current system mode
    #[error("Trove {owner} is not liquidatable: ICR {icr} >= threshold {threshold}")]
    NotLiquidatable {
        /// Trove owner
        owner: String,
        /// Individual collateralization ratio at the liquidation price
        icr: u128,
        /// Threshold in force (MCR, or CCR in recovery mode)
        threshold: u128,
    },

    /// No trove was eligible, the target carries no debt, or it is the last one
    #[error("Nothing to liquidate: {0}")]
    NothingToLiquidate(String),

    /// Withdrawals are blocked while an undercollateralized trove exists
    #[error("Cannot withdraw while there are troves below MCR for asset {0}")]
    UndercollateralizedTroves(String),

    // ═══════════════════════════════════════════════════════════════════
    // Stability Pool Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Depositor has no deposit in the pool
    #[error("No stability pool deposit for {0}")]
    NoDeposit(String),

    /// Withdrawal larger than the compounded deposit
    #[error("Withdrawal {requested} exceeds compounded deposit {available}")]
    WithdrawalExceedsDeposit {
        /// Requested amount
        requested: u128,
        /// Current compounded deposit
        available: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Issuance Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Address is not a registered stability pool
    #[error("Stability pool not registered: {0}")]
    PoolNotRegistered(String),

    /// Requested amount exceeds the pool's unissued supply
    #[error("Requested {requested} exceeds unissued supply {available}")]
    InsufficientUnissuedSupply {
        /// Requested amount
        requested: u128,
        /// Cap minus already issued
        available: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price is stale (not updated recently)
    #[error("Price is stale: last update {age}s ago, max allowed {max_age}s")]
    StalePrice {
        /// Seconds since last update
        age: u64,
        /// Maximum allowed age in seconds
        max_age: u64,
    },

    /// Price missing or zero
    #[error("Invalid price for asset {0}")]
    InvalidPrice(String),

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not authorized to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Account balance too small for the transfer
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Required amount
        required: u128,
        /// Available balance
        available: u128,
    },

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Division by zero
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided by zero
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Protocol Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Collateral asset was never registered
    #[error("Unknown collateral asset: {0}")]
    UnknownCollateral(String),

    /// Collateral asset registered twice
    #[error("Collateral asset already registered: {0}")]
    CollateralAlreadyExists(String),

    /// Market refused the call after an earlier invariant failure
    #[error("Market halted for asset {0}")]
    MarketHalted(String),

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Concurrency Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Lock acquisition failed
    #[error("Failed to acquire lock")]
    Lock,
}

impl Error {
    /// Returns true if the caller can retry after changing inputs or waiting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CollateralizationRatioTooLow { .. }
                | Error::DebtBelowMinimum { .. }
                | Error::NotLiquidatable { .. }
                | Error::UndercollateralizedTroves(_)
                | Error::InsufficientBalance { .. }
                | Error::StalePrice { .. }
        )
    }

    /// Returns true if this error means accounting can no longer be trusted
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::Overflow { .. }
                | Error::Underflow { .. }
                | Error::DivisionByZero { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Trove errors: 1xxx
            Error::TroveNotFound(_) => 1001,
            Error::TroveAlreadyExists(_) => 1002,
            Error::TroveNotActive(_) => 1003,
            Error::CollateralizationRatioTooLow { .. } => 1004,
            Error::DebtBelowMinimum { .. } => 1005,

            // Liquidation errors: 2xxx
            Error::NotLiquidatable { .. } => 2001,
            Error::NothingToLiquidate(_) => 2002,
            Error::UndercollateralizedTroves(_) => 2003,

            // Stability pool errors: 3xxx
            Error::NoDeposit(_) => 3001,
            Error::WithdrawalExceedsDeposit { .. } => 3002,

            // Issuance errors: 4xxx
            Error::PoolNotRegistered(_) => 4001,
            Error::InsufficientUnissuedSupply { .. } => 4002,

            // Oracle errors: 5xxx
            Error::StalePrice { .. } => 5001,
            Error::InvalidPrice(_) => 5002,

            // Authorization errors: 6xxx
            Error::Unauthorized(_) => 6001,

            // Validation errors: 7xxx
            Error::InvalidParameter { .. } => 7001,
            Error::ZeroAmount => 7002,
            Error::InsufficientBalance { .. } => 7003,
            Error::Overflow { .. } => 7004,
            Error::Underflow { .. } => 7005,
            Error::DivisionByZero { .. } => 7006,

            // Protocol errors: 8xxx
            Error::UnknownCollateral(_) => 8001,
            Error::CollateralAlreadyExists(_) => 8002,
            Error::MarketHalted(_) => 8003,
            Error::InvariantViolation(_) => 8004,
            Error::Configuration(_) => 8005,

            // Serialization errors: 90xx
            Error::Serialization(_) => 9001,
            Error::Deserialization(_) => 9002,

            // Concurrency errors: 91xx
            Error::Lock => 9102,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let codes = vec![
            Error::TroveNotFound("".into()).code(),
            Error::TroveNotActive("".into()).code(),
            Error::NotLiquidatable { owner: "".into(), icr: 0, threshold: 0 }.code(),
            Error::NothingToLiquidate("".into()).code(),
            Error::NoDeposit("".into()).code(),
            Error::PoolNotRegistered("".into()).code(),
            Error::InsufficientUnissuedSupply { requested: 0, available: 0 }.code(),
            Error::StalePrice { age: 0, max_age: 0 }.code(),
            Error::Unauthorized("".into()).code(),
            Error::ZeroAmount.code(),
            Error::DivisionByZero { operation: "".into() }.code(),
            Error::MarketHalted("".into()).code(),
            Error::InvariantViolation("".into()).code(),
            Error::Lock.code(),
        ];

        let mut unique_codes = codes.clone();
        unique_codes.sort();
        unique_codes.dedup();

        assert_eq!(codes.len(), unique_codes.len(), "Error codes must be unique");
    }

    #[test]
    fn test_error_display() {
        let err = Error::WithdrawalExceedsDeposit {
            requested: 1000,
            available: 500,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::StalePrice { age: 10, max_age: 5 }.is_recoverable());
        assert!(!Error::ZeroAmount.is_recoverable());
        assert!(!Error::Lock.is_recoverable());
    }

    #[test]
    fn test_is_critical() {
        assert!(Error::InvariantViolation("test".into()).is_critical());
        assert!(Error::Overflow { operation: "test".into() }.is_critical());
        assert!(Error::DivisionByZero { operation: "test".into() }.is_critical());
        assert!(!Error::NotLiquidatable { owner: "a".into(), icr: 0, threshold: 0 }.is_critical());
    }
}
