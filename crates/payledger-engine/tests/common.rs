//! Common test utilities for payledger-engine integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use payledger_core::{
    GatewayRef, LedgerError, Rate, RateTable, Resource, Result, SettlementOutcome, SourceKind,
    UserId, BYTES_PER_TB,
};
use payledger_engine::{
    CardRegistration, ChargeRequest, EngineConfig, OpenDirectory, PaymentGateway, Payments,
    RecordedUsage, TokenRegistration, UnconfiguredGateway,
};
use payledger_store::MemoryStore;

/// How the scripted gateway answers `await_settlement`.
#[derive(Debug, Clone)]
pub enum Settle {
    /// Answer at once.
    With(SettlementOutcome),
    /// Never answer; the caller's timeout fires.
    Never,
}

/// Gateway whose behavior is fixed by the test.
///
/// Submissions are idempotent: a repeated idempotency key gets the
/// reference issued the first time.
pub struct ScriptedGateway {
    reject_with: Option<String>,
    settle: Settle,
    submit_delay: Duration,
    lost_answers: AtomicUsize,
    issued: Mutex<HashMap<String, GatewayRef>>,
    statuses: Mutex<HashMap<GatewayRef, SettlementOutcome>>,
    requests: Mutex<Vec<ChargeRequest>>,
    next_ref: AtomicUsize,
}

impl ScriptedGateway {
    pub fn settling(outcome: SettlementOutcome) -> Arc<Self> {
        Arc::new(Self::build(None, Settle::With(outcome)))
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::build(None, Settle::Never))
    }

    pub fn rejecting(reason: &str) -> Arc<Self> {
        Arc::new(Self::build(Some(reason.to_string()), Settle::Never))
    }

    /// Takes `delay` to answer each submission, then never settles.
    pub fn slow_submit(delay: Duration) -> Arc<Self> {
        let mut gateway = Self::build(None, Settle::Never);
        gateway.submit_delay = delay;
        Arc::new(gateway)
    }

    /// Accepts every charge but the first `count` answers never arrive.
    pub fn losing_answers(count: usize) -> Arc<Self> {
        let gateway = Self::build(None, Settle::Never);
        gateway.lost_answers.store(count, Ordering::SeqCst);
        Arc::new(gateway)
    }

    fn build(reject_with: Option<String>, settle: Settle) -> Self {
        Self {
            reject_with,
            settle,
            submit_delay: Duration::ZERO,
            lost_answers: AtomicUsize::new(0),
            issued: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_ref: AtomicUsize::new(1),
        }
    }

    /// Make `settlement_status` report `outcome` for `gateway_ref`.
    pub fn decide(&self, gateway_ref: &GatewayRef, outcome: SettlementOutcome) {
        self.statuses
            .lock()
            .unwrap()
            .insert(gateway_ref.clone(), outcome);
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn submit_charge(&self, request: &ChargeRequest) -> Result<GatewayRef> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        if let Some(reason) = &self.reject_with {
            return Err(LedgerError::Gateway(reason.clone()));
        }
        let gateway_ref = self
            .issued
            .lock()
            .unwrap()
            .entry(request.idempotency_key.as_str().to_string())
            .or_insert_with(|| {
                let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
                GatewayRef::new(format!("gw_{n}")).unwrap()
            })
            .clone();
        let lost = self
            .lost_answers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(LedgerError::GatewayUnreachable("connection reset".into()));
        }
        Ok(gateway_ref)
    }

    async fn await_settlement(&self, _gateway_ref: &GatewayRef) -> Result<SettlementOutcome> {
        match &self.settle {
            Settle::With(outcome) => Ok(outcome.clone()),
            Settle::Never => std::future::pending().await,
        }
    }

    async fn settlement_status(&self, gateway_ref: &GatewayRef) -> Result<Option<SettlementOutcome>> {
        Ok(self.statuses.lock().unwrap().get(gateway_ref).cloned())
    }
}

/// A fully wired ledger over an in-memory store.
pub struct Harness {
    pub payments: Payments,
    pub store: Arc<MemoryStore>,
    pub usage: Arc<RecordedUsage>,
    pub owner: UserId,
}

impl Harness {
    /// Ledger whose card rail uses `card_gateway`.
    pub async fn with_card_gateway(card_gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::build(
            card_gateway,
            Arc::new(UnconfiguredGateway::new(SourceKind::CryptoToken)),
        )
        .await
    }

    /// Ledger whose token rail uses `token_gateway`.
    pub async fn with_token_gateway(token_gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::build(
            Arc::new(UnconfiguredGateway::new(SourceKind::CreditCard)),
            token_gateway,
        )
        .await
    }

    async fn build(
        card_gateway: Arc<dyn PaymentGateway>,
        token_gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let usage = Arc::new(RecordedUsage::new());
        // One dollar per TB of egress keeps test amounts readable.
        let config = EngineConfig {
            charge_wait: Duration::from_secs(5),
            rates: RateTable {
                rates: BTreeMap::from([(Resource::EgressBytes, Rate::new(100, BYTES_PER_TB))]),
            },
            ..EngineConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let payments = Payments::new(
            Arc::clone(&store) as Arc<dyn payledger_store::Store>,
            Arc::new(OpenDirectory),
            Arc::clone(&usage) as Arc<dyn payledger_engine::UsageSource>,
            card_gateway,
            token_gateway,
            config,
        )
        .expect("valid config");

        let owner = UserId::generate();
        payments
            .setup(&owner, "owner@example.com")
            .await
            .expect("setup");

        Self {
            payments,
            store,
            usage,
            owner,
        }
    }

    pub fn account_id(&self) -> payledger_core::AccountId {
        self.payments.registry().resolve(&self.owner).unwrap()
    }
}

pub fn visa(last4: &str) -> CardRegistration {
    CardRegistration {
        number: format!("4242 4242 4242 {last4}"),
        brand: "visa".into(),
        exp_month: 12,
        exp_year: 2099,
    }
}

pub fn wallet() -> TokenRegistration {
    TokenRegistration {
        wallet_address: "0x52908400098527886e0f7030069857d2e4169ee7".into(),
        chain_id: 1,
    }
}
