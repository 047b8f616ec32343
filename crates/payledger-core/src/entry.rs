//! Ledger entry types for payledger.
//!
//! Every change to an account's balance is an immutable [`LedgerEntry`].
//! Entries use ULIDs for time-ordered IDs and carry an idempotency key so the
//! same external event is never applied twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{AccountId, EntryId, IdempotencyKey, ProjectId};

/// An immutable monetary movement on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The account whose balance moved.
    pub account_id: AccountId,

    /// Signed amount in cents. Positive = credit, negative = debit.
    pub amount_cents: i64,

    /// What produced the movement.
    pub kind: EntryKind,

    /// Project the movement is attributed to (usage charges only).
    pub project_id: Option<ProjectId>,

    /// Timestamp used for ordering and period filtering.
    pub effective_at: DateTime<Utc>,

    /// Wall-clock time the entry was recorded.
    pub recorded_at: DateTime<Utc>,

    /// Deduplication key, unique per account.
    pub idempotency_key: IdempotencyKey,

    /// Human-readable description.
    pub description: String,
}

impl LedgerEntry {
    /// Create a usage charge (debit) for one project.
    ///
    /// `cost_cents` is the positive amount owed; it is stored negated.
    #[must_use]
    pub fn usage_charge(
        account_id: AccountId,
        project_id: ProjectId,
        cost_cents: i64,
        effective_at: DateTime<Utc>,
        idempotency_key: IdempotencyKey,
        description: String,
    ) -> Self {
        Self::build(
            account_id,
            -cost_cents.abs(), // Always negative for usage
            EntryKind::UsageCharge,
            Some(project_id),
            effective_at,
            idempotency_key,
            description,
        )
    }

    /// Create a credit from a settled card or token charge, or from a coupon.
    ///
    /// `kind` must be a credit kind; use [`LedgerEntry::usage_charge`] for debits.
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        kind: EntryKind,
        amount_cents: i64,
        effective_at: DateTime<Utc>,
        idempotency_key: IdempotencyKey,
        description: String,
    ) -> Self {
        Self::build(
            account_id,
            amount_cents.abs(),
            kind,
            None,
            effective_at,
            idempotency_key,
            description,
        )
    }

    fn build(
        account_id: AccountId,
        amount_cents: i64,
        kind: EntryKind,
        project_id: Option<ProjectId>,
        effective_at: DateTime<Utc>,
        idempotency_key: IdempotencyKey,
        description: String,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            account_id,
            amount_cents,
            kind,
            project_id,
            effective_at,
            recorded_at: Utc::now(),
            idempotency_key,
            description,
        }
    }

    /// Check the entry's structural invariants before it is appended.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` for a zero amount or a sign that does not match the kind.
    /// - `LedgerError::InvalidInput` if a project is missing on a usage charge or present on a credit.
    pub fn validate(&self) -> Result<()> {
        if self.amount_cents == 0 {
            return Err(LedgerError::InvalidAmount(
                "ledger entries must move a non-zero amount".into(),
            ));
        }
        if self.kind.is_credit() != (self.amount_cents > 0) {
            return Err(LedgerError::InvalidAmount(format!(
                "{} entry has wrong sign: {}",
                self.kind.as_str(),
                self.amount_cents
            )));
        }
        if self.kind.is_debit() != self.project_id.is_some() {
            return Err(LedgerError::InvalidInput(format!(
                "project attribution is required on usage charges only (kind: {})",
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

/// Source of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Metered usage charged to a project.
    UsageCharge,

    /// Credit from a settled credit card charge.
    CardCredit,

    /// Credit from a settled crypto-token payment.
    TokenCredit,

    /// Promotional coupon credit.
    CouponCredit,
}

impl EntryKind {
    /// All kinds, in reporting order.
    pub const ALL: [Self; 4] = [
        Self::UsageCharge,
        Self::CardCredit,
        Self::TokenCredit,
        Self::CouponCredit,
    ];

    /// Check if this kind adds credits (positive balance change).
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::CardCredit | Self::TokenCredit | Self::CouponCredit)
    }

    /// Check if this kind removes credits (negative balance change).
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::UsageCharge)
    }

    /// Stable name used in logs and wire formats.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UsageCharge => "usage_charge",
            Self::CardCredit => "card_credit",
            Self::TokenCredit => "token_credit",
            Self::CouponCredit => "coupon_credit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    #[test]
    fn usage_charge_is_negative() {
        let entry = LedgerEntry::usage_charge(
            AccountId::generate(),
            ProjectId::generate(),
            200,
            Utc::now(),
            key("usage-1"),
            "Storage".into(),
        );

        assert_eq!(entry.amount_cents, -200);
        assert_eq!(entry.kind, EntryKind::UsageCharge);
        assert!(entry.project_id.is_some());
        entry.validate().unwrap();
    }

    #[test]
    fn credit_is_positive_without_project() {
        let entry = LedgerEntry::credit(
            AccountId::generate(),
            EntryKind::CouponCredit,
            -500,
            Utc::now(),
            key("coupon-1"),
            "Welcome coupon".into(),
        );

        assert_eq!(entry.amount_cents, 500);
        assert!(entry.project_id.is_none());
        entry.validate().unwrap();
    }

    #[test]
    fn zero_amount_rejected() {
        let entry = LedgerEntry::credit(
            AccountId::generate(),
            EntryKind::CardCredit,
            0,
            Utc::now(),
            key("card-0"),
            String::new(),
        );
        assert!(matches!(entry.validate(), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn tampered_sign_rejected() {
        let mut entry = LedgerEntry::credit(
            AccountId::generate(),
            EntryKind::TokenCredit,
            100,
            Utc::now(),
            key("token-1"),
            String::new(),
        );
        entry.amount_cents = -100;
        assert!(matches!(entry.validate(), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn credit_with_project_rejected() {
        let mut entry = LedgerEntry::credit(
            AccountId::generate(),
            EntryKind::CardCredit,
            100,
            Utc::now(),
            key("card-1"),
            String::new(),
        );
        entry.project_id = Some(ProjectId::generate());
        assert!(matches!(entry.validate(), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn entry_kind_is_credit_debit() {
        assert!(EntryKind::CardCredit.is_credit());
        assert!(EntryKind::TokenCredit.is_credit());
        assert!(EntryKind::CouponCredit.is_credit());
        assert!(!EntryKind::UsageCharge.is_credit());

        assert!(EntryKind::UsageCharge.is_debit());
        assert!(!EntryKind::CouponCredit.is_debit());
    }
}
