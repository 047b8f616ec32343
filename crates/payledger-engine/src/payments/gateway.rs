//! Payment gateway collaborator.
//!
//! Gateways settle asynchronously: `submit_charge` only says the charge was
//! accepted, and the final word arrives through `await_settlement`, a
//! `settlement_status` poll, or a webhook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use payledger_core::{
    AccountId, ChargeId, GatewayRef, IdempotencyKey, LedgerError, Result, SettlementOutcome,
    SourceDetails, SourceId, SourceKind,
};

/// What a gateway needs to capture funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Local charge identifier.
    pub charge_id: ChargeId,
    /// Account being credited.
    pub account_id: AccountId,
    /// Source being charged.
    pub source_id: SourceId,
    /// Stored source details.
    pub details: SourceDetails,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Key the gateway should use to deduplicate retries.
    pub idempotency_key: IdempotencyKey,
}

/// An external payment processor for one rail.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a charge. Returns the gateway's reference once accepted.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Gateway` when the gateway rejects the charge.
    async fn submit_charge(&self, request: &ChargeRequest) -> Result<GatewayRef>;

    /// Wait for the charge to settle or fail.
    ///
    /// Callers bound this with a timeout; the gateway-side charge carries on
    /// regardless.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Gateway` if the gateway cannot be reached.
    async fn await_settlement(&self, gateway_ref: &GatewayRef) -> Result<SettlementOutcome>;

    /// Current state of a charge, `None` while it is still in flight.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Gateway` if the gateway cannot be reached.
    async fn settlement_status(&self, gateway_ref: &GatewayRef) -> Result<Option<SettlementOutcome>>;
}

/// Gateway for a rail with no processor configured. Rejects every charge.
#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredGateway {
    kind: SourceKind,
}

impl UnconfiguredGateway {
    /// Create a rejecting gateway for `kind`.
    #[must_use]
    pub const fn new(kind: SourceKind) -> Self {
        Self { kind }
    }

    fn error(self) -> LedgerError {
        LedgerError::Gateway(format!("no {} gateway configured", self.kind.as_str()))
    }
}

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn submit_charge(&self, _request: &ChargeRequest) -> Result<GatewayRef> {
        Err(self.error())
    }

    async fn await_settlement(&self, _gateway_ref: &GatewayRef) -> Result<SettlementOutcome> {
        Err(self.error())
    }

    async fn settlement_status(&self, _gateway_ref: &GatewayRef) -> Result<Option<SettlementOutcome>> {
        Err(self.error())
    }
}
