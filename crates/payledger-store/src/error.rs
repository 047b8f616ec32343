//! Error types for payledger storage.

use payledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A concurrent writer won the race; the write may be retried.
    #[error("write conflict on account {account_id}")]
    Conflict {
        /// The contended account.
        account_id: String,
    },

    /// The balance would leave the representable range.
    #[error("balance overflow on account {account_id}")]
    BalanceOverflow {
        /// The account whose balance overflowed.
        account_id: String,
    },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::BalanceOverflow { account_id } => {
                Self::InvalidAmount(format!("balance overflow on account {account_id}"))
            }
            // Retries are owned by the ledger; a conflict escaping to here
            // means the caller bypassed them.
            StoreError::Conflict { account_id } => Self::LedgerConflict {
                account_id,
                attempts: 1,
            },
            StoreError::Database(msg) => Self::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_entity() {
        let err: LedgerError = StoreError::not_found("coupon", "c-1").into();
        assert!(matches!(
            err,
            LedgerError::NotFound { entity: "coupon", ref id } if id == "c-1"
        ));
    }

    #[test]
    fn database_errors_are_transient() {
        let err: LedgerError = StoreError::Database("disk full".into()).into();
        assert!(err.is_transient());
    }
}
