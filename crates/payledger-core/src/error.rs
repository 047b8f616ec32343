//! Error types for payledger.

use crate::ids::IdError;

/// Result type for payledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in payledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// No billing account exists for the owner.
    #[error("payment account is not set up: {owner}")]
    AccountNotSetup {
        /// The owner (or account) that has no account.
        owner: String,
    },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The account was soft-disabled and accepts no new movements.
    #[error("account is disabled: {account_id}")]
    AccountDisabled {
        /// The disabled account.
        account_id: String,
    },

    /// Malformed coupon or charge amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed input other than an amount.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The payment source cannot be charged.
    #[error("payment source {source_id} is invalid: {reason}")]
    SourceInvalid {
        /// The unusable source.
        source_id: String,
        /// Why it is unusable.
        reason: String,
    },

    /// The gateway did not confirm a charge within the wait budget.
    #[error("gateway did not confirm {gateway_ref} in time")]
    GatewayTimeout {
        /// Reference of the charge still in flight.
        gateway_ref: String,
    },

    /// The gateway answered and rejected a call.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The gateway could not be reached or its answer was lost. A charge
    /// submitted this way may still have gone through.
    #[error("gateway unreachable: {0}")]
    GatewayUnreachable(String),

    /// A settlement arrived for a reference the ledger never recorded.
    #[error("unknown gateway reference: {0}")]
    UnknownGatewayRef(String),

    /// Concurrent appends kept racing past the retry budget.
    #[error("ledger conflict on account {account_id} after {attempts} attempts")]
    LedgerConflict {
        /// The contended account.
        account_id: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LedgerConflict { .. }
                | Self::Storage(_)
                | Self::Gateway(_)
                | Self::GatewayUnreachable(_)
        )
    }
}
