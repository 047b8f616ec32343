//! Payment sources and gateway charges.
//!
//! Cards and crypto tokens are separate rails, each implementing
//! [`PaymentMethod`] against its own [`PaymentGateway`]. Both share the
//! charge protocol:
//!
//! 1. Persist a `Submitting` charge keyed `charge:{charge_id}`.
//! 2. Submit to the gateway. A rejection fails the charge; nothing is credited.
//!    An unreachable gateway leaves the charge `Submitting`.
//! 3. Record the gateway reference and mark the charge `Pending`.
//! 4. Wait for settlement. Steps 2 to 4 share one bound; when it runs out the
//!    caller gets `Pending` and the charge is resolved later by a webhook or a
//!    status poll.
//!
//! Settlement appends the credit under the charge's original key, so any
//! number of confirmations credit the account once.

mod card;
mod gateway;
mod reconcile;
mod token;

pub use card::{CardRegistration, CreditCards};
pub use gateway::{ChargeRequest, PaymentGateway, UnconfiguredGateway};
pub use reconcile::ReconcileReport;
pub use token::{CryptoTokens, TokenRegistration};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use payledger_core::{
    AccountId, ChargeId, ChargeStatus, GatewayRef, LedgerEntry, LedgerError, PaymentSource,
    PendingCharge, Result, SettlementOutcome, SourceDetails, SourceId, SourceKind, SourceStatus,
};
use payledger_store::Store;

use crate::ledger::BalanceLedger;
use crate::registry::AccountRegistry;

/// Result of a charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ChargeOutcome {
    /// The gateway settled and the account was credited.
    Settled {
        /// The charge.
        charge_id: ChargeId,
        /// The credit entry.
        entry: LedgerEntry,
    },
    /// The gateway has not confirmed the charge yet.
    Pending {
        /// The charge.
        charge_id: ChargeId,
        /// Reference to reconcile against. Absent while the gateway's
        /// acceptance is still unknown.
        #[serde(skip_serializing_if = "Option::is_none")]
        gateway_ref: Option<GatewayRef>,
    },
    /// The gateway rejected or failed the charge; nothing was credited.
    Failed {
        /// The charge.
        charge_id: ChargeId,
        /// Gateway-reported reason.
        reason: String,
    },
}

/// What a submission to the gateway produced.
pub(crate) enum Submission {
    /// The gateway took the charge under this reference.
    Accepted(GatewayRef),
    /// Nothing more to wait for: rejected, or left for reconciliation.
    Resolved(ChargeOutcome),
}

impl ChargeOutcome {
    /// The charge this outcome belongs to.
    #[must_use]
    pub const fn charge_id(&self) -> &ChargeId {
        match self {
            Self::Settled { charge_id, .. }
            | Self::Pending { charge_id, .. }
            | Self::Failed { charge_id, .. } => charge_id,
        }
    }
}

/// A payment rail: registered sources plus the charge protocol.
#[async_trait]
pub trait PaymentMethod: Send + Sync {
    /// Input accepted at registration.
    type Registration: Send + Sync;

    /// The rail this method serves.
    fn kind(&self) -> SourceKind;

    /// Validate and register a source. The first source of an account
    /// becomes its default.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidInput` for malformed details.
    /// - `LedgerError::SourceInvalid` for a card that already expired.
    /// - `LedgerError::AccountNotSetup` / `AccountDisabled` for an unusable account.
    async fn register(
        &self,
        account_id: &AccountId,
        registration: Self::Registration,
    ) -> Result<SourceId>;

    /// Remove a source. Past ledger entries are untouched.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the source does not exist on this rail.
    async fn remove(&self, source_id: &SourceId) -> Result<()>;

    /// Charge the account's default source and credit the account on settlement.
    ///
    /// Returns within the configured charge wait. A charge the gateway has not
    /// decided by then, or could not be reached for, comes back `Pending`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount_cents` is not positive.
    /// - `LedgerError::SourceInvalid` if the default source cannot be charged.
    /// - `LedgerError::NotFound` if the account has no source on this rail.
    async fn charge(&self, account_id: &AccountId, amount_cents: i64) -> Result<ChargeOutcome>;

    /// Sources registered on this rail, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    async fn list(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>>;

    /// Make `source_id` the account's default on this rail.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the source does not exist on this rail.
    async fn set_default(&self, source_id: &SourceId) -> Result<()>;

    /// Apply a settlement pushed by the gateway.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownGatewayRef` if no charge on this rail has
    /// that reference.
    async fn on_settlement(
        &self,
        gateway_ref: &GatewayRef,
        outcome: SettlementOutcome,
    ) -> Result<ChargeOutcome>;

    /// Poll the gateway for every unresolved charge on this rail, resubmitting
    /// those it never acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the unresolved charges cannot be listed.
    async fn reconcile_pending(&self) -> Result<ReconcileReport>;
}

/// Source bookkeeping and the charge protocol, shared by both rails.
pub(crate) struct SourceBook {
    store: Arc<dyn Store>,
    registry: Arc<AccountRegistry>,
    ledger: Arc<BalanceLedger>,
    gateway: Arc<dyn PaymentGateway>,
    kind: SourceKind,
    charge_wait: Duration,
}

impl SourceBook {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        registry: Arc<AccountRegistry>,
        ledger: Arc<BalanceLedger>,
        gateway: Arc<dyn PaymentGateway>,
        kind: SourceKind,
        charge_wait: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            gateway,
            kind,
            charge_wait,
        }
    }

    pub(crate) const fn kind(&self) -> SourceKind {
        self.kind
    }

    pub(crate) fn register(&self, account_id: &AccountId, details: SourceDetails) -> Result<SourceId> {
        self.registry.require_active(account_id)?;

        let mut source = PaymentSource::new(*account_id, details);
        source.is_default = self.sources(account_id)?.is_empty();
        self.store.put_source(&source)?;

        info!(
            account_id = %account_id,
            source_id = %source.id,
            kind = self.kind.as_str(),
            is_default = source.is_default,
            "Payment source registered"
        );
        Ok(source.id)
    }

    pub(crate) fn remove(&self, source_id: &SourceId) -> Result<()> {
        let source = self.load(source_id)?;
        self.registry.require_active(&source.account_id)?;
        self.store.delete_source(source_id)?;

        if source.is_default {
            if let Some(mut next) = self.sources(&source.account_id)?.into_iter().next() {
                next.is_default = true;
                self.store.put_source(&next)?;
            }
        }

        info!(
            account_id = %source.account_id,
            source_id = %source_id,
            kind = self.kind.as_str(),
            "Payment source removed"
        );
        Ok(())
    }

    pub(crate) fn list(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        self.registry.get(account_id)?;
        self.sources(account_id)
    }

    pub(crate) fn set_default(&self, source_id: &SourceId) -> Result<()> {
        let chosen = self.load(source_id)?;
        self.registry.require_active(&chosen.account_id)?;

        for mut source in self.sources(&chosen.account_id)? {
            let is_default = source.id == *source_id;
            if source.is_default != is_default {
                source.is_default = is_default;
                self.store.put_source(&source)?;
            }
        }
        Ok(())
    }

    /// Run the charge protocol for `amount_cents` against the default source.
    ///
    /// The gateway round trip runs in its own task. The caller waits for it at
    /// most `charge_wait`; dropping the caller or running out of time leaves
    /// the task to record whatever the gateway answers, so reconciliation
    /// always sees the charge.
    pub(crate) async fn charge(
        self: &Arc<Self>,
        account_id: &AccountId,
        amount_cents: i64,
    ) -> Result<ChargeOutcome> {
        self.registry.require_active(account_id)?;
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "charge amount must be positive, got {amount_cents}"
            )));
        }

        let now = Utc::now();
        let mut source = self.default_source(account_id)?;
        self.invalidate_if_expired(&mut source, now)?;
        source.ensure_chargeable(now)?;

        let charge = PendingCharge::new(*account_id, &source, amount_cents);
        self.store.put_charge(&charge)?;
        self.touch(&source.id, now)?;

        let charge_id = charge.id;
        let request = self.request_for(&charge, &source);
        let deadline = Instant::now() + self.charge_wait;
        let book = Arc::clone(self);
        let mut attempt =
            tokio::spawn(async move { book.run_attempt(charge, request, deadline).await });

        match tokio::time::timeout_at(deadline, &mut attempt).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(charge_id = %charge_id, error = %e, "Charge task died");
                self.current_outcome(&charge_id)
            }
            Err(_) => {
                info!(charge_id = %charge_id, "Charge not settled in time, left pending");
                self.current_outcome(&charge_id)
            }
        }
    }

    /// Submit, record the gateway's answer, then wait for settlement until
    /// `deadline`. Runs detached from the caller.
    async fn run_attempt(
        self: Arc<Self>,
        charge: PendingCharge,
        request: ChargeRequest,
        deadline: Instant,
    ) -> Result<ChargeOutcome> {
        let gateway_ref = match self.submit(&charge, &request).await? {
            Submission::Accepted(gateway_ref) => gateway_ref,
            Submission::Resolved(outcome) => return Ok(outcome),
        };

        let wait = tokio::time::timeout_at(deadline, self.gateway.await_settlement(&gateway_ref));
        match wait.await {
            Ok(Ok(outcome)) => self.apply_outcome(&charge, outcome).await,
            Ok(Err(e)) => {
                warn!(
                    charge_id = %charge.id,
                    gateway_ref = %gateway_ref,
                    error = %e,
                    "Settlement wait failed, leaving charge pending"
                );
                self.current_outcome(&charge.id)
            }
            Err(_) => {
                let timeout = LedgerError::GatewayTimeout {
                    gateway_ref: gateway_ref.to_string(),
                };
                info!(charge_id = %charge.id, error = %timeout, "Charge left pending");
                self.current_outcome(&charge.id)
            }
        }
    }

    /// Hand the charge to the gateway and persist what it said.
    ///
    /// Only an explicit rejection fails the charge. When the gateway cannot be
    /// reached the charge stays `Submitting`; it may still have gone through,
    /// and reconciliation resubmits it under the same idempotency key.
    pub(crate) async fn submit(
        &self,
        charge: &PendingCharge,
        request: &ChargeRequest,
    ) -> Result<Submission> {
        match self.gateway.submit_charge(request).await {
            Ok(gateway_ref) => {
                let mut accepted = charge.clone();
                accepted.gateway_ref = Some(gateway_ref.clone());
                accepted.status = ChargeStatus::Pending;
                self.store.put_charge(&accepted)?;
                info!(
                    account_id = %charge.account_id,
                    charge_id = %charge.id,
                    gateway_ref = %gateway_ref,
                    amount_cents = charge.amount_cents,
                    "Charge accepted by gateway"
                );
                Ok(Submission::Accepted(gateway_ref))
            }
            Err(LedgerError::Gateway(reason)) => {
                warn!(
                    account_id = %charge.account_id,
                    charge_id = %charge.id,
                    reason = %reason,
                    "Gateway rejected charge"
                );
                let transition = self
                    .ledger
                    .fail_charge(&charge.account_id, &charge.id, &reason)
                    .await?;
                let resolved = transition.charge().clone();
                Ok(Submission::Resolved(self.outcome_of(resolved)?))
            }
            Err(e) => {
                warn!(
                    account_id = %charge.account_id,
                    charge_id = %charge.id,
                    error = %e,
                    "Gateway unreachable, charge left for reconciliation"
                );
                Ok(Submission::Resolved(self.current_outcome(&charge.id)?))
            }
        }
    }

    pub(crate) fn request_for(&self, charge: &PendingCharge, source: &PaymentSource) -> ChargeRequest {
        ChargeRequest {
            charge_id: charge.id,
            account_id: charge.account_id,
            source_id: source.id,
            details: source.details.clone(),
            amount_cents: charge.amount_cents,
            idempotency_key: charge.idempotency_key.clone(),
        }
    }

    /// Outcome matching the stored state of the charge.
    pub(crate) fn current_outcome(&self, charge_id: &ChargeId) -> Result<ChargeOutcome> {
        let charge = self
            .store
            .get_charge(charge_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "charge",
                id: charge_id.to_string(),
            })?;
        self.outcome_of(charge)
    }

    fn default_source(&self, account_id: &AccountId) -> Result<PaymentSource> {
        let sources = self.sources(account_id)?;
        sources
            .iter()
            .find(|s| s.is_default)
            .or_else(|| sources.first())
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                entity: "payment source",
                id: format!("{} source of account {account_id}", self.kind.as_str()),
            })
    }

    fn invalidate_if_expired(&self, source: &mut PaymentSource, now: DateTime<Utc>) -> Result<()> {
        if let (SourceStatus::Valid, SourceDetails::CreditCard(card)) = (&source.status, &source.details) {
            if card.is_expired_at(now) {
                source.status = SourceStatus::Invalid(format!(
                    "card expired {:02}/{}",
                    card.exp_month, card.exp_year
                ));
                self.store.put_source(source)?;
                warn!(source_id = %source.id, "Card expired, source invalidated");
            }
        }
        Ok(())
    }

    fn touch(&self, source_id: &SourceId, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut source) = self.store.get_source(source_id)? {
            source.last_used_at = Some(at);
            self.store.put_source(&source)?;
        }
        Ok(())
    }

    fn load(&self, source_id: &SourceId) -> Result<PaymentSource> {
        self.store
            .get_source(source_id)?
            .filter(|s| s.kind() == self.kind)
            .ok_or_else(|| LedgerError::NotFound {
                entity: "payment source",
                id: source_id.to_string(),
            })
    }

    fn sources(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        Ok(self
            .store
            .list_sources(account_id)?
            .into_iter()
            .filter(|s| s.kind() == self.kind)
            .collect())
    }
}
