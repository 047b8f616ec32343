//! Whole-ledger scenarios across components.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{visa, Harness, ScriptedGateway};

use payledger_core::{
    BillingPeriod, EntryKind, IdempotencyKey, LedgerEntry, Resource, SettlementOutcome,
    UsageRecord, BYTES_PER_TB,
};
use payledger_engine::PaymentMethod;

#[tokio::test]
async fn coupon_then_usage_leaves_the_difference() {
    let h = Harness::with_card_gateway(ScriptedGateway::settling(SettlementOutcome::Settled)).await;
    let account_id = h.account_id();
    let period = BillingPeriod::month_of(Utc::now());
    let project = payledger_core::ProjectId::generate();

    h.payments
        .add_coupon(&h.owner, None, 500, Duration::days(30), "welcome credit")
        .unwrap();
    let credits = h.payments.coupons().apply(&account_id, Utc::now()).await.unwrap();
    assert_eq!(credits.len(), 1);

    h.usage.record(
        account_id,
        UsageRecord::new(project, Resource::EgressBytes, 2 * BYTES_PER_TB, period.start),
    );
    let charges = h.payments.charges().compute(&account_id, &period).await.unwrap();
    assert_eq!(charges[0].amount_cents, 200);

    assert_eq!(h.payments.balance(&h.owner).unwrap(), 300);

    // Running the same period again charges nothing new.
    h.payments.charges().compute(&account_id, &period).await.unwrap();
    h.payments.coupons().apply(&account_id, Utc::now()).await.unwrap();
    assert_eq!(h.payments.balance(&h.owner).unwrap(), 300);

    let invoice = h.payments.invoices().assemble(&account_id, &period).unwrap();
    assert_eq!(invoice.total_usage_cents, 200);
    assert_eq!(invoice.credits_by_kind[&EntryKind::CouponCredit], 500);
    assert_eq!(invoice.project_charges[0].project_id, project);
}

#[tokio::test]
async fn every_producer_lands_on_one_ledger() {
    let h = Harness::with_card_gateway(ScriptedGateway::settling(SettlementOutcome::Settled)).await;
    let account_id = h.account_id();
    let period = BillingPeriod::month_of(Utc::now());

    h.payments
        .credit_cards()
        .register(&account_id, visa("4242"))
        .await
        .unwrap();
    h.payments
        .credit_cards()
        .charge(&account_id, 1_000)
        .await
        .unwrap();
    h.payments
        .add_coupon(&h.owner, None, 250, Duration::days(7), "promo")
        .unwrap();
    h.payments.coupons().apply(&account_id, Utc::now()).await.unwrap();
    h.usage.record(
        account_id,
        UsageRecord::new(
            payledger_core::ProjectId::generate(),
            Resource::EgressBytes,
            3 * BYTES_PER_TB,
            period.start,
        ),
    );
    h.payments.charges().compute(&account_id, &period).await.unwrap();

    let snapshot = h.payments.ledger().snapshot(&account_id).unwrap();
    let sum: i64 = snapshot.entries().iter().map(|e| e.amount_cents).sum();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.balance_cents(), sum);
    assert_eq!(sum, 1_000 + 250 - 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_lose_nothing() {
    let h = Arc::new(
        Harness::with_card_gateway(ScriptedGateway::settling(SettlementOutcome::Settled)).await,
    );
    let account_id = h.account_id();

    let tasks: Vec<_> = (1..=50)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let entry = LedgerEntry::credit(
                    account_id,
                    EntryKind::CardCredit,
                    i,
                    Utc::now(),
                    IdempotencyKey::new(format!("concurrent:{i}")).unwrap(),
                    format!("credit {i}"),
                );
                h.payments.ledger().append(&entry).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = h.payments.ledger().snapshot(&account_id).unwrap();
    assert_eq!(snapshot.len(), 50);
    assert_eq!(snapshot.balance_cents(), (1..=50).sum::<i64>());
}

#[tokio::test]
async fn setup_is_idempotent_and_balance_needs_an_account() {
    let h = Harness::with_card_gateway(ScriptedGateway::hanging()).await;

    let again = h.payments.setup(&h.owner, "owner@example.com").await.unwrap();
    assert_eq!(again, h.account_id());

    let stranger = payledger_core::UserId::generate();
    assert!(matches!(
        h.payments.balance(&stranger),
        Err(payledger_core::LedgerError::AccountNotSetup { .. })
    ));
}
