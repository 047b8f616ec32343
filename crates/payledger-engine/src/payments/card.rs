//! Credit card rail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use payledger_core::{
    AccountId, CardDetails, GatewayRef, LedgerError, PaymentSource, Result, SettlementOutcome,
    SourceDetails, SourceId, SourceKind,
};

use super::{ChargeOutcome, PaymentMethod, ReconcileReport, SourceBook};

/// Card details as entered by the account holder.
///
/// Only the last four digits of `number` are ever stored.
#[derive(Debug, Clone, Deserialize)]
pub struct CardRegistration {
    /// Card number. Spaces and dashes are ignored.
    pub number: String,
    /// Card network, e.g. "visa".
    pub brand: String,
    /// Expiry month, 1 through 12.
    pub exp_month: u32,
    /// Four-digit expiry year.
    pub exp_year: i32,
}

impl CardRegistration {
    /// Validate the registration and reduce it to storable details.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidInput` for a malformed number, brand or expiry.
    /// - `LedgerError::SourceInvalid` if the card has already expired.
    pub fn into_details(self) -> Result<CardDetails> {
        let digits: String = self
            .number
            .chars()
            .filter(|c| *c != ' ' && *c != '-')
            .collect();
        if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(LedgerError::InvalidInput(
                "card number must be 12 to 19 digits".into(),
            ));
        }
        let brand = self.brand.trim().to_lowercase();
        if brand.is_empty() {
            return Err(LedgerError::InvalidInput("card brand is required".into()));
        }
        if !(1..=12).contains(&self.exp_month) {
            return Err(LedgerError::InvalidInput(format!(
                "expiry month out of range: {}",
                self.exp_month
            )));
        }
        if !(2000..=9999).contains(&self.exp_year) {
            return Err(LedgerError::InvalidInput(format!(
                "expiry year out of range: {}",
                self.exp_year
            )));
        }

        let details = CardDetails {
            masked_number: format!("**** **** **** {}", &digits[digits.len() - 4..]),
            brand,
            exp_month: self.exp_month,
            exp_year: self.exp_year,
        };
        if details.is_expired_at(Utc::now()) {
            return Err(LedgerError::SourceInvalid {
                source_id: details.masked_number.clone(),
                reason: format!("card expired {:02}/{}", details.exp_month, details.exp_year),
            });
        }
        Ok(details)
    }
}

/// Credit cards, charged through the card gateway.
pub struct CreditCards {
    book: Arc<SourceBook>,
}

impl CreditCards {
    pub(crate) fn new(book: SourceBook) -> Self {
        debug_assert_eq!(book.kind(), SourceKind::CreditCard);
        Self {
            book: Arc::new(book),
        }
    }
}

#[async_trait]
impl PaymentMethod for CreditCards {
    type Registration = CardRegistration;

    fn kind(&self) -> SourceKind {
        SourceKind::CreditCard
    }

    async fn register(
        &self,
        account_id: &AccountId,
        registration: CardRegistration,
    ) -> Result<SourceId> {
        let details = registration.into_details()?;
        self.book
            .register(account_id, SourceDetails::CreditCard(details))
    }

    async fn remove(&self, source_id: &SourceId) -> Result<()> {
        self.book.remove(source_id)
    }

    async fn charge(&self, account_id: &AccountId, amount_cents: i64) -> Result<ChargeOutcome> {
        self.book.charge(account_id, amount_cents).await
    }

    async fn list(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        self.book.list(account_id)
    }

    async fn set_default(&self, source_id: &SourceId) -> Result<()> {
        self.book.set_default(source_id)
    }

    async fn on_settlement(
        &self,
        gateway_ref: &GatewayRef,
        outcome: SettlementOutcome,
    ) -> Result<ChargeOutcome> {
        self.book.on_settlement(gateway_ref, outcome).await
    }

    async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        self.book.reconcile_pending().await
    }
}
