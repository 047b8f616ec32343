//! Payment source and gateway charge types.
//!
//! A payment source is either a credit card or a crypto-token wallet. Charges
//! against a source follow a two-phase protocol: the gateway accepts the
//! charge synchronously and confirms settlement later, so every attempt is
//! persisted as a [`PendingCharge`] until it resolves.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{AccountId, ChargeId, EntryKind, GatewayRef, IdempotencyKey, SourceId};

/// The two kinds of payment rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Credit card processed by a card gateway.
    CreditCard,
    /// Crypto-token transfer processed by a token gateway.
    CryptoToken,
}

impl SourceKind {
    /// Ledger entry kind produced when a charge of this kind settles.
    #[must_use]
    pub const fn credit_kind(&self) -> EntryKind {
        match self {
            Self::CreditCard => EntryKind::CardCredit,
            Self::CryptoToken => EntryKind::TokenCredit,
        }
    }

    /// Stable name used in logs and routes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "card",
            Self::CryptoToken => "token",
        }
    }
}

/// Whether a source may be charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum SourceStatus {
    /// Usable.
    Valid,
    /// Unusable, with the reason it was invalidated.
    Invalid(String),
}

/// Card details as stored: never the full number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    /// Masked number, e.g. `**** **** **** 4242`.
    pub masked_number: String,
    /// Card brand as reported at registration.
    pub brand: String,
    /// Expiry month (1-12).
    pub exp_month: u32,
    /// Expiry year (four digits).
    pub exp_year: i32,
}

impl CardDetails {
    /// Whether the card can no longer be charged at `at`.
    ///
    /// A card is valid through the last day of its expiry month.
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        (at.year(), at.month()) > (self.exp_year, self.exp_month)
    }
}

/// Token wallet details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDetails {
    /// Wallet address (`0x` followed by 40 hex digits).
    pub wallet_address: String,
    /// Chain identifier.
    pub chain_id: u64,
}

/// Variant-specific data of a payment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceDetails {
    /// Credit card.
    CreditCard(CardDetails),
    /// Crypto-token wallet.
    CryptoToken(TokenDetails),
}

impl SourceDetails {
    /// The rail this source belongs to.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::CreditCard(_) => SourceKind::CreditCard,
            Self::CryptoToken(_) => SourceKind::CryptoToken,
        }
    }
}

/// A payment source registered to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSource {
    /// Source identifier.
    pub id: SourceId,
    /// Owning account.
    pub account_id: AccountId,
    /// Variant data.
    pub details: SourceDetails,
    /// Whether the source may be charged.
    pub status: SourceStatus,
    /// Whether this is the account's default source for its kind.
    pub is_default: bool,
    /// Last time a charge was attempted against the source.
    pub last_used_at: Option<DateTime<Utc>>,
    /// When the source was registered.
    pub created_at: DateTime<Utc>,
}

impl PaymentSource {
    /// Create a valid, non-default source.
    #[must_use]
    pub fn new(account_id: AccountId, details: SourceDetails) -> Self {
        Self {
            id: SourceId::generate(),
            account_id,
            details,
            status: SourceStatus::Valid,
            is_default: false,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    /// The rail this source belongs to.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.details.kind()
    }

    /// Ensure the source can be charged at `at`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::SourceInvalid` if the source was invalidated or the
    /// card has expired.
    pub fn ensure_chargeable(&self, at: DateTime<Utc>) -> Result<()> {
        if let SourceStatus::Invalid(reason) = &self.status {
            return Err(LedgerError::SourceInvalid {
                source_id: self.id.to_string(),
                reason: reason.clone(),
            });
        }
        if let SourceDetails::CreditCard(card) = &self.details {
            if card.is_expired_at(at) {
                return Err(LedgerError::SourceInvalid {
                    source_id: self.id.to_string(),
                    reason: format!("card expired {:02}/{}", card.exp_month, card.exp_year),
                });
            }
        }
        Ok(())
    }
}

/// Final word from a gateway about a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SettlementOutcome {
    /// Funds were captured.
    Settled,
    /// The charge failed at the gateway.
    Failed {
        /// Gateway-reported reason.
        reason: String,
    },
}

/// Lifecycle of a gateway charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ChargeStatus {
    /// Recorded locally, not yet accepted by the gateway.
    Submitting,
    /// Accepted by the gateway, awaiting settlement.
    Pending,
    /// Settled and credited.
    Settled,
    /// Rejected or failed at the gateway; nothing was credited.
    Failed {
        /// Gateway-reported reason.
        reason: String,
    },
}

impl ChargeStatus {
    /// Whether the charge reached a terminal state.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed { .. })
    }
}

/// Persisted record of one charge attempt against a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCharge {
    /// Charge identifier.
    pub id: ChargeId,
    /// Account being credited.
    pub account_id: AccountId,
    /// Source being charged.
    pub source_id: SourceId,
    /// Rail of the source.
    pub kind: SourceKind,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Key of the credit entry this charge produces once settled.
    pub idempotency_key: IdempotencyKey,
    /// Gateway reference, known once the gateway accepted the charge.
    pub gateway_ref: Option<GatewayRef>,
    /// Current state.
    pub status: ChargeStatus,
    /// When the attempt started.
    pub created_at: DateTime<Utc>,
    /// When the charge settled or failed.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingCharge {
    /// Start a new charge attempt.
    #[must_use]
    pub fn new(account_id: AccountId, source: &PaymentSource, amount_cents: i64) -> Self {
        let id = ChargeId::generate();
        Self {
            id,
            account_id,
            source_id: source.id,
            kind: source.kind(),
            amount_cents,
            idempotency_key: IdempotencyKey::charge(&id),
            gateway_ref: None,
            status: ChargeStatus::Submitting,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Mark the charge resolved with `status`.
    pub fn resolve(&mut self, status: ChargeStatus) {
        self.status = status;
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card(exp_month: u32, exp_year: i32) -> PaymentSource {
        PaymentSource::new(
            AccountId::generate(),
            SourceDetails::CreditCard(CardDetails {
                masked_number: "**** **** **** 4242".into(),
                brand: "visa".into(),
                exp_month,
                exp_year,
            }),
        )
    }

    #[test]
    fn card_valid_through_expiry_month() {
        let source = card(10, 2026);
        let last_day = Utc.with_ymd_and_hms(2026, 10, 31, 23, 0, 0).unwrap();
        let next_month = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();

        source.ensure_chargeable(last_day).unwrap();
        assert!(matches!(
            source.ensure_chargeable(next_month),
            Err(LedgerError::SourceInvalid { .. })
        ));
    }

    #[test]
    fn invalidated_source_not_chargeable() {
        let mut source = card(12, 2099);
        source.status = SourceStatus::Invalid("reported stolen".into());
        let err = source.ensure_chargeable(Utc::now()).unwrap_err();
        assert!(err.to_string().contains("reported stolen"));
    }

    #[test]
    fn credit_kind_follows_rail() {
        assert_eq!(SourceKind::CreditCard.credit_kind(), EntryKind::CardCredit);
        assert_eq!(SourceKind::CryptoToken.credit_kind(), EntryKind::TokenCredit);
    }

    #[test]
    fn pending_charge_key_derives_from_charge_id() {
        let source = card(12, 2099);
        let charge = PendingCharge::new(source.account_id, &source, 1500);
        assert_eq!(charge.idempotency_key, IdempotencyKey::charge(&charge.id));
        assert_eq!(charge.status, ChargeStatus::Submitting);
        assert!(!charge.status.is_resolved());
    }

    #[test]
    fn settlement_outcome_wire_format() {
        let failed: SettlementOutcome =
            serde_json::from_str(r#"{"status":"failed","reason":"insufficient funds"}"#).unwrap();
        assert_eq!(
            failed,
            SettlementOutcome::Failed {
                reason: "insufficient funds".into()
            }
        );
        let settled: SettlementOutcome = serde_json::from_str(r#"{"status":"settled"}"#).unwrap();
        assert_eq!(settled, SettlementOutcome::Settled);
    }
}
