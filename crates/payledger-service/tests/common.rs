//! Common test utilities for payledger-service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;

use payledger_core::{AccountId, GatewayRef, Result, SettlementOutcome, UserId};
use payledger_engine::{
    CardRegistration, ChargeOutcome, ChargeRequest, EngineConfig, OpenDirectory, PaymentGateway,
    PaymentMethod, Payments, RecordedUsage,
};
use payledger_service::crypto::hmac_sha256_hex;
use payledger_service::{create_router, AppState, ServiceConfig};
use payledger_store::MemoryStore;

pub const CARD_SECRET: &str = "whsec_card_test";
pub const TOKEN_SECRET: &str = "whsec_token_test";

/// Gateway that accepts every charge and never settles on its own.
#[derive(Default)]
pub struct SilentGateway {
    next_ref: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for SilentGateway {
    async fn submit_charge(&self, _request: &ChargeRequest) -> Result<GatewayRef> {
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayRef::new(format!("gw_{n}")).unwrap())
    }

    async fn await_settlement(&self, _gateway_ref: &GatewayRef) -> Result<SettlementOutcome> {
        std::future::pending().await
    }

    async fn settlement_status(&self, _gateway_ref: &GatewayRef) -> Result<Option<SettlementOutcome>> {
        Ok(None)
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The ledger behind the server.
    pub payments: Arc<Payments>,
    /// Owner of the test account.
    pub owner: UserId,
    /// The test account.
    pub account_id: AccountId,
}

impl TestHarness {
    /// Create a harness with a fresh in-memory ledger and one account.
    pub async fn new() -> Self {
        let config = ServiceConfig {
            card_webhook_secret: Some(CARD_SECRET.into()),
            token_webhook_secret: Some(TOKEN_SECRET.into()),
            ..ServiceConfig::default()
        };
        let engine_config = EngineConfig {
            charge_wait: Duration::from_millis(10),
            ..EngineConfig::default()
        };

        let payments = Arc::new(
            Payments::new(
                Arc::new(MemoryStore::new()),
                Arc::new(OpenDirectory),
                Arc::new(RecordedUsage::new()),
                Arc::new(SilentGateway::default()),
                Arc::new(SilentGateway::default()),
                engine_config,
            )
            .expect("valid engine config"),
        );

        let owner = UserId::generate();
        let account_id = payments
            .setup(&owner, "owner@example.com")
            .await
            .expect("setup");

        let state = AppState::new(Arc::clone(&payments), config);
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            payments,
            owner,
            account_id,
        }
    }

    /// Register a card and leave a charge of `amount_cents` pending.
    pub async fn pending_card_charge(&self, amount_cents: i64) -> GatewayRef {
        let cards = self.payments.credit_cards();
        if cards.list(&self.account_id).await.unwrap().is_empty() {
            cards
                .register(
                    &self.account_id,
                    CardRegistration {
                        number: "4242424242424242".into(),
                        brand: "visa".into(),
                        exp_month: 12,
                        exp_year: 2099,
                    },
                )
                .await
                .unwrap();
        }
        match cards.charge(&self.account_id, amount_cents).await.unwrap() {
            ChargeOutcome::Pending {
                gateway_ref: Some(gateway_ref),
                ..
            } => gateway_ref,
            other => panic!("expected pending charge, got {other:?}"),
        }
    }

    pub fn balance(&self) -> i64 {
        self.payments.balance(&self.owner).unwrap()
    }
}

/// Hex signature the gateway would send for `body`.
pub fn sign(secret: &str, body: &str) -> String {
    hmac_sha256_hex(secret, body.as_bytes()).unwrap()
}
