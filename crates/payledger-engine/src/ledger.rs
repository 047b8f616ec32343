//! Append-only balance ledger.
//!
//! Every balance movement is a [`LedgerEntry`] appended under an idempotency
//! key. Appends are retried transparently when the store reports a write
//! conflict; readers work from an immutable [`LedgerSnapshot`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use payledger_core::{
    AccountId, BillingPeriod, ChargeId, Coupon, CouponId, EntryKind, LedgerEntry, LedgerError,
    ProjectId, Result,
};
use payledger_store::{AppendOutcome, ChargeTransition, LedgerSnapshot, Store, StoreError};

use crate::config::EngineConfig;

/// The account ledger.
pub struct BalanceLedger {
    store: Arc<dyn Store>,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl BalanceLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &EngineConfig) -> Self {
        Self {
            store,
            max_attempts: config.append_max_attempts.max(1),
            initial_backoff: config.append_initial_backoff,
            max_backoff: config.append_max_backoff,
        }
    }

    /// Append an entry unless its idempotency key is already recorded.
    ///
    /// A duplicate key is not an error: the call changes nothing and returns
    /// [`AppendOutcome::Duplicate`] carrying the prior entry.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` / `InvalidInput` for a malformed entry.
    /// - `LedgerError::NotFound` if the account doesn't exist.
    /// - `LedgerError::LedgerConflict` once the retry budget is spent.
    pub async fn append(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        entry.validate()?;
        let outcome = self
            .with_retry(&entry.account_id, || self.store.append_entry(entry))
            .await?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Current balance, read from one snapshot.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the account doesn't exist.
    pub fn balance(&self, account_id: &AccountId) -> Result<i64> {
        Ok(self.snapshot(account_id)?.balance_cents())
    }

    /// Ordered entries and balance as of now.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the account doesn't exist.
    pub fn snapshot(&self, account_id: &AccountId) -> Result<LedgerSnapshot> {
        Ok(self.store.snapshot(account_id)?)
    }

    /// Entries charged to `project_id` within `period`.
    ///
    /// The result is bound to one snapshot and can be iterated any number of
    /// times.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the account doesn't exist.
    pub fn entries_for_project(
        &self,
        account_id: &AccountId,
        project_id: &ProjectId,
        period: &BillingPeriod,
    ) -> Result<ProjectEntries> {
        Ok(ProjectEntries {
            snapshot: self.snapshot(account_id)?,
            project_id: *project_id,
            period: *period,
        })
    }

    /// Entries effective within `period`, in ledger order.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the account doesn't exist.
    pub fn entries_in_period(
        &self,
        account_id: &AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .snapshot(account_id)?
            .entries()
            .iter()
            .filter(|e| period.contains(e.effective_at))
            .cloned()
            .collect())
    }

    /// Entries newest first, paginated.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` if the account doesn't exist.
    pub fn history(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .snapshot(account_id)?
            .entries()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Look up the entry recorded under a charge's key.
    pub(crate) fn entry_for_charge(
        &self,
        account_id: &AccountId,
        key: &payledger_core::IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self.store.get_entry_by_key(account_id, key)?)
    }

    /// Credit a coupon and consume it in one step.
    pub(crate) async fn redeem_coupon(
        &self,
        coupon_id: &CouponId,
        entry: &LedgerEntry,
    ) -> Result<Option<(AppendOutcome, Coupon)>> {
        entry.validate()?;
        if entry.kind != EntryKind::CouponCredit {
            return Err(LedgerError::InvalidInput(format!(
                "coupon redemption cannot record a {} entry",
                entry.kind.as_str()
            )));
        }
        let redeemed = self
            .with_retry(&entry.account_id, || {
                self.store.redeem_coupon(coupon_id, entry)
            })
            .await?;
        if let Some((outcome, _)) = &redeemed {
            log_outcome(outcome);
        }
        Ok(redeemed)
    }

    /// Mark a coupon expired if it is past its window.
    pub(crate) async fn expire_coupon(
        &self,
        account_id: &AccountId,
        coupon_id: &CouponId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Coupon>> {
        self.with_retry(account_id, || self.store.expire_coupon(coupon_id, as_of))
            .await
    }

    /// Record a charge's credit and mark the charge settled in one step.
    pub(crate) async fn settle_charge(
        &self,
        charge_id: &ChargeId,
        entry: &LedgerEntry,
    ) -> Result<ChargeTransition> {
        entry.validate()?;
        self.with_retry(&entry.account_id, || {
            self.store.settle_charge(charge_id, entry)
        })
        .await
    }

    /// Mark a charge failed unless it already resolved.
    pub(crate) async fn fail_charge(
        &self,
        account_id: &AccountId,
        charge_id: &ChargeId,
        reason: &str,
    ) -> Result<ChargeTransition> {
        self.with_retry(account_id, || self.store.fail_charge(charge_id, reason))
            .await
    }

    /// Run a store write, retrying write conflicts with exponential backoff.
    async fn with_retry<T, F>(&self, account_id: &AccountId, mut op: F) -> Result<T>
    where
        F: FnMut() -> payledger_store::Result<T>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(StoreError::Conflict { .. }) if attempt < self.max_attempts => {
                    debug!(
                        account_id = %account_id,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        "Ledger write conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(StoreError::Conflict { .. }) => {
                    warn!(
                        account_id = %account_id,
                        attempt = %attempt,
                        "Ledger write conflict after max retries"
                    );
                    return Err(LedgerError::LedgerConflict {
                        account_id: account_id.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn log_outcome(outcome: &AppendOutcome) {
    match outcome {
        AppendOutcome::Appended {
            entry,
            balance_cents,
        } => info!(
            account_id = %entry.account_id,
            entry_id = %entry.id,
            kind = entry.kind.as_str(),
            amount_cents = entry.amount_cents,
            balance_cents = balance_cents,
            "Ledger entry appended"
        ),
        AppendOutcome::Duplicate(prior) => debug!(
            account_id = %prior.account_id,
            key = %prior.idempotency_key,
            "Duplicate suppressed"
        ),
    }
}

/// Usage charges of one project within one period, bound to a snapshot.
#[derive(Debug, Clone)]
pub struct ProjectEntries {
    snapshot: LedgerSnapshot,
    project_id: ProjectId,
    period: BillingPeriod,
}

impl ProjectEntries {
    /// Iterate the matching entries in ledger order.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.snapshot.entries().iter().filter(move |e| {
            e.project_id == Some(self.project_id) && self.period.contains(e.effective_at)
        })
    }

    /// Sum of the matching entries (negative for charges).
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.iter().map(|e| e.amount_cents).sum()
    }

    /// The project filtered on.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The period filtered on.
    #[must_use]
    pub const fn period(&self) -> &BillingPeriod {
        &self.period
    }
}

impl<'a> IntoIterator for &'a ProjectEntries {
    type Item = &'a LedgerEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a LedgerEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Duration as ChronoDuration;
    use payledger_core::{
        Account, GatewayRef, IdempotencyKey, PaymentSource, PendingCharge, SourceId, UserId,
    };
    use payledger_store::MemoryStore;

    /// Store that reports a write conflict for the first `conflicts` appends.
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
    }

    impl ContendedStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                conflicts: AtomicU32::new(conflicts),
            }
        }
    }

    impl Store for ContendedStore {
        fn insert_account_if_absent(&self, account: &Account) -> payledger_store::Result<Account> {
            self.inner.insert_account_if_absent(account)
        }
        fn put_account(&self, account: &Account) -> payledger_store::Result<()> {
            self.inner.put_account(account)
        }
        fn get_account(&self, id: &AccountId) -> payledger_store::Result<Option<Account>> {
            self.inner.get_account(id)
        }
        fn get_account_by_owner(&self, owner: &UserId) -> payledger_store::Result<Option<Account>> {
            self.inner.get_account_by_owner(owner)
        }
        fn list_accounts(&self) -> payledger_store::Result<Vec<Account>> {
            self.inner.list_accounts()
        }
        fn append_entry(&self, entry: &LedgerEntry) -> payledger_store::Result<AppendOutcome> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict {
                    account_id: entry.account_id.to_string(),
                });
            }
            self.inner.append_entry(entry)
        }
        fn snapshot(&self, id: &AccountId) -> payledger_store::Result<LedgerSnapshot> {
            self.inner.snapshot(id)
        }
        fn get_entry_by_key(
            &self,
            id: &AccountId,
            key: &IdempotencyKey,
        ) -> payledger_store::Result<Option<LedgerEntry>> {
            self.inner.get_entry_by_key(id, key)
        }
        fn put_coupon(&self, coupon: &Coupon) -> payledger_store::Result<()> {
            self.inner.put_coupon(coupon)
        }
        fn get_coupon(&self, id: &CouponId) -> payledger_store::Result<Option<Coupon>> {
            self.inner.get_coupon(id)
        }
        fn list_coupons(&self, id: &AccountId) -> payledger_store::Result<Vec<Coupon>> {
            self.inner.list_coupons(id)
        }
        fn put_source(&self, source: &PaymentSource) -> payledger_store::Result<()> {
            self.inner.put_source(source)
        }
        fn get_source(&self, id: &SourceId) -> payledger_store::Result<Option<PaymentSource>> {
            self.inner.get_source(id)
        }
        fn delete_source(&self, id: &SourceId) -> payledger_store::Result<()> {
            self.inner.delete_source(id)
        }
        fn list_sources(&self, id: &AccountId) -> payledger_store::Result<Vec<PaymentSource>> {
            self.inner.list_sources(id)
        }
        fn put_charge(&self, charge: &PendingCharge) -> payledger_store::Result<()> {
            self.inner.put_charge(charge)
        }
        fn get_charge(&self, id: &ChargeId) -> payledger_store::Result<Option<PendingCharge>> {
            self.inner.get_charge(id)
        }
        fn get_charge_by_ref(
            &self,
            gateway_ref: &GatewayRef,
        ) -> payledger_store::Result<Option<PendingCharge>> {
            self.inner.get_charge_by_ref(gateway_ref)
        }
        fn list_unresolved_charges(&self) -> payledger_store::Result<Vec<PendingCharge>> {
            self.inner.list_unresolved_charges()
        }
        fn redeem_coupon(
            &self,
            id: &CouponId,
            entry: &LedgerEntry,
        ) -> payledger_store::Result<Option<(AppendOutcome, Coupon)>> {
            self.inner.redeem_coupon(id, entry)
        }
        fn expire_coupon(
            &self,
            id: &CouponId,
            as_of: DateTime<Utc>,
        ) -> payledger_store::Result<Option<Coupon>> {
            self.inner.expire_coupon(id, as_of)
        }
        fn settle_charge(
            &self,
            id: &ChargeId,
            entry: &LedgerEntry,
        ) -> payledger_store::Result<ChargeTransition> {
            self.inner.settle_charge(id, entry)
        }
        fn fail_charge(&self, id: &ChargeId, reason: &str) -> payledger_store::Result<ChargeTransition> {
            self.inner.fail_charge(id, reason)
        }
    }

    fn config(max_attempts: u32) -> EngineConfig {
        EngineConfig {
            append_max_attempts: max_attempts,
            ..EngineConfig::default()
        }
    }

    fn setup(store: &dyn Store) -> AccountId {
        store
            .insert_account_if_absent(&Account::new(UserId::generate(), "l@example.com"))
            .unwrap()
            .account_id
    }

    fn credit(account_id: AccountId, amount: i64, key: &str, at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry::credit(
            account_id,
            EntryKind::CardCredit,
            amount,
            at,
            IdempotencyKey::new(key).unwrap(),
            "credit".into(),
        )
    }

    fn usage(
        account_id: AccountId,
        project_id: ProjectId,
        cost: i64,
        key: &str,
        at: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry::usage_charge(
            account_id,
            project_id,
            cost,
            at,
            IdempotencyKey::new(key).unwrap(),
            "usage".into(),
        )
    }

    #[tokio::test]
    async fn balance_equals_sum_of_entries() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));
        let now = Utc::now();

        ledger.append(&credit(account_id, 1000, "c1", now)).await.unwrap();
        ledger
            .append(&usage(account_id, ProjectId::generate(), 250, "u1", now))
            .await
            .unwrap();
        ledger.append(&credit(account_id, 75, "c2", now)).await.unwrap();

        let snapshot = ledger.snapshot(&account_id).unwrap();
        let sum: i64 = snapshot.entries().iter().map(|e| e.amount_cents).sum();
        assert_eq!(snapshot.balance_cents(), sum);
        assert_eq!(ledger.balance(&account_id).unwrap(), 825);
    }

    #[tokio::test]
    async fn same_key_appends_once() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));
        let entry = credit(account_id, 400, "charge:abc", Utc::now());

        let first = ledger.append(&entry).await.unwrap();
        let second = ledger.append(&entry).await.unwrap();

        assert!(!first.is_duplicate());
        assert_eq!(second, AppendOutcome::Duplicate(entry));
        assert_eq!(ledger.snapshot(&account_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_entry_rejected() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));

        let mut entry = credit(account_id, 10, "bad", Utc::now());
        entry.amount_cents = -10;
        assert!(matches!(
            ledger.append(&entry).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_are_retried() {
        let store = Arc::new(ContendedStore::new(2));
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));

        let outcome = ledger
            .append(&credit(account_id, 5, "retry", Utc::now()))
            .await
            .unwrap();
        assert!(!outcome.is_duplicate());
        assert_eq!(ledger.balance(&account_id).unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_conflict() {
        let store = Arc::new(ContendedStore::new(10));
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));

        let err = ledger
            .append(&credit(account_id, 5, "retry", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LedgerConflict { attempts: 3, .. }));
        assert!(err.is_transient());
        assert_eq!(ledger.balance(&account_id).unwrap(), 0);
    }

    #[tokio::test]
    async fn project_entries_are_filtered_and_restartable() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));

        let period = BillingPeriod::month_of(Utc::now());
        let project = ProjectId::generate();
        let inside = period.start + ChronoDuration::days(1);

        ledger.append(&usage(account_id, project, 100, "u1", inside)).await.unwrap();
        ledger
            .append(&usage(account_id, project, 50, "u2", period.start - ChronoDuration::days(1)))
            .await
            .unwrap();
        ledger
            .append(&usage(account_id, ProjectId::generate(), 70, "u3", inside))
            .await
            .unwrap();
        ledger.append(&credit(account_id, 500, "c1", inside)).await.unwrap();

        let entries = ledger
            .entries_for_project(&account_id, &project, &period)
            .unwrap();

        // Appends after the read do not leak into the bound snapshot.
        ledger.append(&usage(account_id, project, 9, "u4", inside)).await.unwrap();

        assert_eq!(entries.iter().count(), 1);
        assert_eq!(entries.iter().count(), 1);
        assert_eq!(entries.total_cents(), -100);
        assert_eq!((&entries).into_iter().count(), 1);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_paginated() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = BalanceLedger::new(store, &config(3));
        let start = Utc::now() - ChronoDuration::days(3);

        for day in 0..3 {
            ledger
                .append(&credit(
                    account_id,
                    day + 1,
                    &format!("c{day}"),
                    start + ChronoDuration::days(day),
                ))
                .await
                .unwrap();
        }

        let page1 = ledger.history(&account_id, 2, 0).unwrap();
        let page2 = ledger.history(&account_id, 2, 2).unwrap();
        assert_eq!(
            page1.iter().map(|e| e.amount_cents).collect::<Vec<_>>(),
            [3, 2]
        );
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].amount_cents, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_exact_sum() {
        let store = Arc::new(MemoryStore::new());
        let account_id = setup(store.as_ref());
        let ledger = Arc::new(BalanceLedger::new(store, &config(3)));

        let handles: Vec<_> = (1..=50_i64)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let entry = if i % 3 == 0 {
                        usage(account_id, ProjectId::generate(), i, &format!("u{i}"), Utc::now())
                    } else {
                        credit(account_id, i, &format!("c{i}"), Utc::now())
                    };
                    ledger.append(&entry).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: i64 = (1..=50_i64).map(|i| if i % 3 == 0 { -i } else { i }).sum();
        let snapshot = ledger.snapshot(&account_id).unwrap();
        assert_eq!(snapshot.len(), 50);
        assert_eq!(snapshot.balance_cents(), expected);
    }
}
