//! In-memory storage implementation.
//!
//! Each account owns an `RwLock`-guarded ledger held in a `DashMap`, so
//! appends on different accounts never contend. The entry vector sits behind
//! an `Arc` and is copied on write: a snapshot is a reference-count bump, and
//! an append that races a reader clones the vector instead of blocking it.
//!
//! Lock order is always account ledger first, then a `DashMap` shard. No
//! code path holds a shard guard while acquiring a ledger lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use payledger_core::{
    Account, AccountId, ChargeId, ChargeStatus, Coupon, CouponId, CouponStatus, GatewayRef,
    IdempotencyKey, LedgerEntry, PaymentSource, PendingCharge, SourceId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{AppendOutcome, ChargeTransition, LedgerSnapshot, Store};

#[derive(Debug, Default)]
struct AccountLedger {
    entries: Arc<Vec<LedgerEntry>>,
    by_key: HashMap<IdempotencyKey, LedgerEntry>,
    balance_cents: i64,
}

impl AccountLedger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        if let Some(prior) = self.by_key.get(&entry.idempotency_key) {
            return Ok(AppendOutcome::Duplicate(prior.clone()));
        }

        let balance_cents = self
            .balance_cents
            .checked_add(entry.amount_cents)
            .ok_or_else(|| StoreError::BalanceOverflow {
                account_id: entry.account_id.to_string(),
            })?;

        let entries = Arc::make_mut(&mut self.entries);
        let position = entries
            .partition_point(|e| (e.effective_at, e.id) <= (entry.effective_at, entry.id));
        entries.insert(position, entry.clone());
        self.by_key
            .insert(entry.idempotency_key.clone(), entry.clone());
        self.balance_cents = balance_cents;

        Ok(AppendOutcome::Appended {
            entry: entry.clone(),
            balance_cents,
        })
    }
}

/// In-memory storage backend.
///
/// Suitable for tests and single-process deployments; nothing survives a
/// restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    owners: DashMap<UserId, AccountId>,
    ledgers: DashMap<AccountId, Arc<RwLock<AccountLedger>>>,
    coupons: DashMap<CouponId, Coupon>,
    sources: DashMap<SourceId, PaymentSource>,
    charges: DashMap<ChargeId, PendingCharge>,
    charge_refs: DashMap<GatewayRef, ChargeId>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, account_id: &AccountId) -> Result<Arc<RwLock<AccountLedger>>> {
        self.ledgers
            .get(account_id)
            .map(|ledger| Arc::clone(ledger.value()))
            .ok_or_else(|| StoreError::not_found("account", account_id))
    }

    fn read(ledger: &RwLock<AccountLedger>) -> Result<RwLockReadGuard<'_, AccountLedger>> {
        ledger
            .read()
            .map_err(|_| StoreError::Database("account ledger lock poisoned".into()))
    }

    fn write(ledger: &RwLock<AccountLedger>) -> Result<RwLockWriteGuard<'_, AccountLedger>> {
        ledger
            .write()
            .map_err(|_| StoreError::Database("account ledger lock poisoned".into()))
    }

    fn charge_account(&self, charge_id: &ChargeId) -> Result<AccountId> {
        self.charges
            .get(charge_id)
            .map(|charge| charge.account_id)
            .ok_or_else(|| StoreError::not_found("charge", charge_id))
    }

    fn coupon_account(&self, coupon_id: &CouponId) -> Result<AccountId> {
        self.coupons
            .get(coupon_id)
            .map(|coupon| coupon.account_id)
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))
    }

    fn current_charge(&self, charge_id: &ChargeId) -> Result<PendingCharge> {
        self.charges
            .get(charge_id)
            .map(|charge| charge.value().clone())
            .ok_or_else(|| StoreError::not_found("charge", charge_id))
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn insert_account_if_absent(&self, account: &Account) -> Result<Account> {
        match self.owners.entry(account.owner) {
            Entry::Occupied(existing) => {
                let account_id = *existing.get();
                drop(existing);
                self.accounts
                    .get(&account_id)
                    .map(|a| a.value().clone())
                    .ok_or_else(|| StoreError::not_found("account", account_id))
            }
            Entry::Vacant(slot) => {
                self.ledgers.insert(
                    account.account_id,
                    Arc::new(RwLock::new(AccountLedger::default())),
                );
                self.accounts.insert(account.account_id, account.clone());
                slot.insert(account.account_id);
                Ok(account.clone())
            }
        }
    }

    fn put_account(&self, account: &Account) -> Result<()> {
        let mut stored = self
            .accounts
            .get_mut(&account.account_id)
            .ok_or_else(|| StoreError::not_found("account", account.account_id))?;
        *stored = account.clone();
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.get(account_id).map(|a| a.value().clone()))
    }

    fn get_account_by_owner(&self, owner: &UserId) -> Result<Option<Account>> {
        let Some(account_id) = self.owners.get(owner).map(|id| *id) else {
            return Ok(None);
        };
        self.get_account(&account_id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by_key(|a| a.account_id);
        Ok(accounts)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        let ledger = self.ledger(&entry.account_id)?;
        let mut guard = Self::write(&ledger)?;
        guard.append(entry)
    }

    fn snapshot(&self, account_id: &AccountId) -> Result<LedgerSnapshot> {
        let ledger = self.ledger(account_id)?;
        let guard = Self::read(&ledger)?;
        Ok(LedgerSnapshot::new(
            *account_id,
            guard.balance_cents,
            Arc::clone(&guard.entries),
        ))
    }

    fn get_entry_by_key(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        let ledger = self.ledger(account_id)?;
        let guard = Self::read(&ledger)?;
        Ok(guard.by_key.get(key).cloned())
    }

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    fn put_coupon(&self, coupon: &Coupon) -> Result<()> {
        let ledger = self.ledger(&coupon.account_id)?;
        let _guard = Self::write(&ledger)?;
        self.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        Ok(self.coupons.get(coupon_id).map(|c| c.value().clone()))
    }

    fn list_coupons(&self, account_id: &AccountId) -> Result<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self
            .coupons
            .iter()
            .filter(|c| c.account_id == *account_id)
            .map(|c| c.value().clone())
            .collect();
        coupons.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));
        Ok(coupons)
    }

    // =========================================================================
    // Payment Source Operations
    // =========================================================================

    fn put_source(&self, source: &PaymentSource) -> Result<()> {
        self.sources.insert(source.id, source.clone());
        Ok(())
    }

    fn get_source(&self, source_id: &SourceId) -> Result<Option<PaymentSource>> {
        Ok(self.sources.get(source_id).map(|s| s.value().clone()))
    }

    fn delete_source(&self, source_id: &SourceId) -> Result<()> {
        self.sources
            .remove(source_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("payment source", source_id))
    }

    fn list_sources(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        let mut sources: Vec<PaymentSource> = self
            .sources
            .iter()
            .filter(|s| s.account_id == *account_id)
            .map(|s| s.value().clone())
            .collect();
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sources)
    }

    // =========================================================================
    // Charge Operations
    // =========================================================================

    fn put_charge(&self, charge: &PendingCharge) -> Result<()> {
        let ledger = self.ledger(&charge.account_id)?;
        let _guard = Self::write(&ledger)?;

        match self.charges.entry(charge.id) {
            Entry::Occupied(mut stored) => {
                if stored.get().status.is_resolved() {
                    debug!(charge_id = %charge.id, "Ignoring update to resolved charge");
                    return Ok(());
                }
                stored.insert(charge.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(charge.clone());
            }
        }
        if let Some(gateway_ref) = &charge.gateway_ref {
            self.charge_refs.insert(gateway_ref.clone(), charge.id);
        }
        Ok(())
    }

    fn get_charge(&self, charge_id: &ChargeId) -> Result<Option<PendingCharge>> {
        Ok(self.charges.get(charge_id).map(|c| c.value().clone()))
    }

    fn get_charge_by_ref(&self, gateway_ref: &GatewayRef) -> Result<Option<PendingCharge>> {
        let Some(charge_id) = self.charge_refs.get(gateway_ref).map(|id| *id) else {
            return Ok(None);
        };
        self.get_charge(&charge_id)
    }

    fn list_unresolved_charges(&self) -> Result<Vec<PendingCharge>> {
        let mut charges: Vec<PendingCharge> = self
            .charges
            .iter()
            .filter(|c| !c.status.is_resolved())
            .map(|c| c.value().clone())
            .collect();
        charges.sort_by_key(|c| c.created_at);
        Ok(charges)
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn redeem_coupon(
        &self,
        coupon_id: &CouponId,
        entry: &LedgerEntry,
    ) -> Result<Option<(AppendOutcome, Coupon)>> {
        let account_id = self.coupon_account(coupon_id)?;
        let ledger = self.ledger(&account_id)?;
        let mut guard = Self::write(&ledger)?;

        let mut coupon = self
            .coupons
            .get(coupon_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;

        if let Some(prior) = guard.by_key.get(&entry.idempotency_key) {
            return Ok(Some((AppendOutcome::Duplicate(prior.clone()), coupon)));
        }
        if coupon.status != CouponStatus::Active || coupon.remaining_cents < entry.amount_cents {
            return Ok(None);
        }

        let outcome = guard.append(entry)?;
        coupon.consume(entry.amount_cents);
        self.coupons.insert(coupon.id, coupon.clone());
        Ok(Some((outcome, coupon)))
    }

    fn expire_coupon(&self, coupon_id: &CouponId, as_of: DateTime<Utc>) -> Result<Option<Coupon>> {
        let account_id = self.coupon_account(coupon_id)?;
        let ledger = self.ledger(&account_id)?;
        let _guard = Self::write(&ledger)?;

        let mut coupon = self
            .coupons
            .get_mut(coupon_id)
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;
        if coupon.status != CouponStatus::Active || !coupon.is_expired_at(as_of) {
            return Ok(None);
        }
        coupon.status = CouponStatus::Expired;
        Ok(Some(coupon.clone()))
    }

    fn settle_charge(&self, charge_id: &ChargeId, entry: &LedgerEntry) -> Result<ChargeTransition> {
        let account_id = self.charge_account(charge_id)?;
        let ledger = self.ledger(&account_id)?;
        let mut guard = Self::write(&ledger)?;

        let mut charge = self.current_charge(charge_id)?;
        if charge.status.is_resolved() {
            return Ok(ChargeTransition::AlreadyResolved(charge));
        }

        guard.append(entry)?;
        charge.resolve(ChargeStatus::Settled);
        self.charges.insert(charge.id, charge.clone());
        Ok(ChargeTransition::Resolved(charge))
    }

    fn fail_charge(&self, charge_id: &ChargeId, reason: &str) -> Result<ChargeTransition> {
        let account_id = self.charge_account(charge_id)?;
        let ledger = self.ledger(&account_id)?;
        let _guard = Self::write(&ledger)?;

        let mut charge = self.current_charge(charge_id)?;
        if charge.status.is_resolved() {
            return Ok(ChargeTransition::AlreadyResolved(charge));
        }

        charge.resolve(ChargeStatus::Failed {
            reason: reason.to_string(),
        });
        self.charges.insert(charge.id, charge.clone());
        Ok(ChargeTransition::Resolved(charge))
    }
}
