//! Account types for payledger.
//!
//! An account is a customer's billing relationship. It carries no balance of
//! its own: the balance is always derived from the account's ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, UserId};

/// Setup state of a billing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    /// Record exists but setup has not completed.
    Uninitialized,
    /// Account is ready to accrue charges and credits.
    Active,
}

/// A billing account for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque account identifier.
    pub account_id: AccountId,

    /// The owner this account belongs to. At most one account per owner.
    pub owner: UserId,

    /// Contact email provided at setup.
    pub email: String,

    /// Setup state.
    pub state: SetupState,

    /// Soft-disable flag. Disabled accounts stay readable but accept no new movements.
    pub disabled: bool,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, active account for `owner`.
    #[must_use]
    pub fn new(owner: UserId, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account_id: AccountId::generate(),
            owner,
            email: email.into(),
            state: SetupState::Active,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account has completed setup.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SetupState::Active
    }

    /// Whether new ledger movements may be recorded against the account.
    #[must_use]
    pub fn accepts_movements(&self) -> bool {
        self.is_active() && !self.disabled
    }
}
