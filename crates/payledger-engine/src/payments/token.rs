//! Crypto token rail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use payledger_core::{
    AccountId, GatewayRef, LedgerError, PaymentSource, Result, SettlementOutcome, SourceDetails,
    SourceId, SourceKind, TokenDetails,
};

use super::{ChargeOutcome, PaymentMethod, ReconcileReport, SourceBook};

/// A wallet to pull token payments from.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRegistration {
    /// `0x`-prefixed 20-byte hex address.
    pub wallet_address: String,
    /// EVM chain the wallet lives on.
    pub chain_id: u64,
}

impl TokenRegistration {
    /// Validate the wallet and normalize the address to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` for a malformed address or a zero chain ID.
    pub fn into_details(self) -> Result<TokenDetails> {
        let address = self.wallet_address.trim();
        let hex = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .ok_or_else(|| LedgerError::InvalidInput("wallet address must start with 0x".into()))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LedgerError::InvalidInput(
                "wallet address must be 40 hex digits".into(),
            ));
        }
        if self.chain_id == 0 {
            return Err(LedgerError::InvalidInput("chain ID must be non-zero".into()));
        }

        Ok(TokenDetails {
            wallet_address: format!("0x{}", hex.to_lowercase()),
            chain_id: self.chain_id,
        })
    }
}

/// Crypto token wallets, charged through the token gateway.
pub struct CryptoTokens {
    book: Arc<SourceBook>,
}

impl CryptoTokens {
    pub(crate) fn new(book: SourceBook) -> Self {
        debug_assert_eq!(book.kind(), SourceKind::CryptoToken);
        Self {
            book: Arc::new(book),
        }
    }
}

#[async_trait]
impl PaymentMethod for CryptoTokens {
    type Registration = TokenRegistration;

    fn kind(&self) -> SourceKind {
        SourceKind::CryptoToken
    }

    async fn register(
        &self,
        account_id: &AccountId,
        registration: TokenRegistration,
    ) -> Result<SourceId> {
        let details = registration.into_details()?;
        self.book
            .register(account_id, SourceDetails::CryptoToken(details))
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
