//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Ledger writes for one account run under that account's mutex and land in a
//! single `WriteBatch`, so the entry, its idempotency index and the balance
//! always change together.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use payledger_core::{
    Account, AccountId, ChargeId, ChargeStatus, Coupon, CouponId, CouponStatus, GatewayRef,
    IdempotencyKey, LedgerEntry, PaymentSource, PendingCharge, SourceId, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{AppendOutcome, ChargeTransition, LedgerSnapshot, Store};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    owner_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: DashMap::new(),
            owner_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch).map_err(db_err)
    }

    fn account_lock(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        Arc::clone(self.account_locks.entry(*account_id).or_default().value())
    }

    fn guard(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
        lock.lock()
            .map_err(|_| StoreError::Database("account write lock poisoned".into()))
    }

    /// Collect the trailing IDs of every index key under `prefix`.
    fn scan_index(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<[u8; 16]>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            let id = keys::trailing_id(&key)
                .ok_or_else(|| StoreError::Database(format!("malformed index key in {cf_name}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn scan_all<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(db_err)?;
                Self::deserialize(&value)
            })
            .collect()
    }

    fn require_account(&self, account_id: &AccountId) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        if self
            .db
            .get_pinned_cf(&cf, keys::account_key(account_id))
            .map_err(db_err)?
            .is_none()
        {
            return Err(StoreError::not_found("account", account_id));
        }
        Ok(())
    }

    fn balance(&self, account_id: &AccountId) -> Result<i64> {
        let cf = self.cf(cf::BALANCES)?;
        self.db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(db_err)?
            .map_or(Ok(0), |data| decode_balance(&data))
    }

    /// Stage an append into `batch`. The caller holds the account lock.
    fn stage_append(&self, entry: &LedgerEntry, batch: &mut WriteBatch) -> Result<AppendOutcome> {
        self.require_account(&entry.account_id)?;

        if let Some(prior) = self.get_entry_by_key(&entry.account_id, &entry.idempotency_key)? {
            return Ok(AppendOutcome::Duplicate(prior));
        }

        let balance_cents = self
            .balance(&entry.account_id)?
            .checked_add(entry.amount_cents)
            .ok_or_else(|| StoreError::BalanceOverflow {
                account_id: entry.account_id.to_string(),
            })?;

        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_keys = self.cf(cf::ENTRY_KEYS)?;
        let cf_balances = self.cf(cf::BALANCES)?;

        let entry_key = keys::entry_key(&entry.account_id, entry.effective_at, &entry.id);
        batch.put_cf(&cf_entries, &entry_key, Self::serialize(entry)?);
        batch.put_cf(
            &cf_keys,
            keys::entry_idempotency_key(&entry.account_id, &entry.idempotency_key),
            &entry_key,
        );
        batch.put_cf(
            &cf_balances,
            keys::account_key(&entry.account_id),
            balance_cents.to_be_bytes(),
        );

        Ok(AppendOutcome::Appended {
            entry: entry.clone(),
            balance_cents,
        })
    }

    fn stage_charge(&self, charge: &PendingCharge, batch: &mut WriteBatch) -> Result<()> {
        let cf_charges = self.cf(cf::CHARGES)?;
        batch.put_cf(&cf_charges, keys::charge_key(&charge.id), Self::serialize(charge)?);
        if let Some(gateway_ref) = &charge.gateway_ref {
            let cf_refs = self.cf(cf::CHARGES_BY_REF)?;
            batch.put_cf(
                &cf_refs,
                keys::gateway_ref_key(gateway_ref),
                charge.id.as_bytes(),
            );
        }
        Ok(())
    }

    fn load_charge(&self, charge_id: &ChargeId) -> Result<PendingCharge> {
        self.get_charge(charge_id)?
            .ok_or_else(|| StoreError::not_found("charge", charge_id))
    }

    fn load_coupon(&self, coupon_id: &CouponId) -> Result<Coupon> {
        self.get_coupon(coupon_id)?
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))
    }
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn decode_balance(data: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| StoreError::Serialization("balance must be 8 bytes".into()))?;
    Ok(i64::from_be_bytes(bytes))
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn insert_account_if_absent(&self, account: &Account) -> Result<Account> {
        let _owners = Self::guard(&self.owner_lock)?;

        let cf_owners = self.cf(cf::ACCOUNTS_BY_OWNER)?;
        let owner_key = keys::owner_key(&account.owner);
        if let Some(value) = self.db.get_cf(&cf_owners, &owner_key).map_err(db_err)? {
            let account_id = keys::id_bytes(&value)
                .map(AccountId::from_bytes)
                .ok_or_else(|| StoreError::Serialization("malformed owner index".into()))?;
            return self
                .get_account(&account_id)?
                .ok_or_else(|| StoreError::not_found("account", account_id));
        }

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.account_id),
            Self::serialize(account)?,
        );
        batch.put_cf(&cf_owners, owner_key, account.account_id.as_bytes());
        self.write(batch)?;

        Ok(account.clone())
    }

    fn put_account(&self, account: &Account) -> Result<()> {
        self.require_account(&account.account_id)?;
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(&account.account_id), Self::serialize(account)?)
            .map_err(db_err)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn get_account_by_owner(&self, owner: &UserId) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS_BY_OWNER)?;
        let Some(value) = self.db.get_cf(&cf, keys::owner_key(owner)).map_err(db_err)? else {
            return Ok(None);
        };
        let account_id = keys::id_bytes(&value)
            .map(AccountId::from_bytes)
            .ok_or_else(|| StoreError::Serialization("malformed owner index".into()))?;
        self.get_account(&account_id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        self.scan_all(cf::ACCOUNTS)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        let lock = self.account_lock(&entry.account_id);
        let _guard = Self::guard(&lock)?;

        let mut batch = WriteBatch::default();
        let outcome = self.stage_append(entry, &mut batch)?;
        if !outcome.is_duplicate() {
            self.write(batch)?;
        }
        Ok(outcome)
    }

    fn snapshot(&self, account_id: &AccountId) -> Result<LedgerSnapshot> {
        self.require_account(account_id)?;

        let snapshot = self.db.snapshot();
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_balances = self.cf(cf::BALANCES)?;

        let balance_cents = snapshot
            .get_cf(&cf_balances, keys::account_key(account_id))
            .map_err(db_err)?
            .map_or(Ok(0), |data| decode_balance(&data))?;

        let prefix = keys::account_prefix(account_id);
        let mut entries = Vec::new();
        for item in snapshot.iterator_cf(&cf_entries, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(Self::deserialize::<LedgerEntry>(&value)?);
        }

        Ok(LedgerSnapshot::new(*account_id, balance_cents, Arc::new(entries)))
    }

    fn get_entry_by_key(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        let cf_keys = self.cf(cf::ENTRY_KEYS)?;
        let Some(entry_key) = self
            .db
            .get_cf(&cf_keys, keys::entry_idempotency_key(account_id, key))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        self.get(cf::ENTRIES, &entry_key)
    }

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    fn put_coupon(&self, coupon: &Coupon) -> Result<()> {
        let lock = self.account_lock(&coupon.account_id);
        let _guard = Self::guard(&lock)?;

        let cf_coupons = self.cf(cf::COUPONS)?;
        let cf_by_account = self.cf(cf::COUPONS_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_coupons, keys::coupon_key(&coupon.id), Self::serialize(coupon)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_coupon_key(&coupon.account_id, &coupon.id),
            [],
        );
        self.write(batch)
    }

    fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        self.get(cf::COUPONS, &keys::coupon_key(coupon_id))
    }

    fn list_coupons(&self, account_id: &AccountId) -> Result<Vec<Coupon>> {
        let mut coupons = Vec::new();
        for id in self.scan_index(cf::COUPONS_BY_ACCOUNT, &keys::account_prefix(account_id))? {
            if let Some(coupon) = self.get_coupon(&CouponId::from_bytes(id))? {
                coupons.push(coupon);
            }
        }
        coupons.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));
        Ok(coupons)
    }

    // =========================================================================
    // Payment Source Operations
    // =========================================================================

    fn put_source(&self, source: &PaymentSource) -> Result<()> {
        let cf_sources = self.cf(cf::SOURCES)?;
        let cf_by_account = self.cf(cf::SOURCES_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_sources, keys::source_key(&source.id), Self::serialize(source)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_source_key(&source.account_id, &source.id),
            [],
        );
        self.write(batch)
    }

    fn get_source(&self, source_id: &SourceId) -> Result<Option<PaymentSource>> {
        self.get(cf::SOURCES, &keys::source_key(source_id))
    }

    fn delete_source(&self, source_id: &SourceId) -> Result<()> {
        let source = self
            .get_source(source_id)?
            .ok_or_else(|| StoreError::not_found("payment source", source_id))?;

        let cf_sources = self.cf(cf::SOURCES)?;
        let cf_by_account = self.cf(cf::SOURCES_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_sources, keys::source_key(source_id));
        batch.delete_cf(
            &cf_by_account,
            keys::account_source_key(&source.account_id, source_id),
        );
        self.write(batch)
    }

    fn list_sources(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        let mut sources = Vec::new();
        for id in self.scan_index(cf::SOURCES_BY_ACCOUNT, &keys::account_prefix(account_id))? {
            if let Some(source) = self.get_source(&SourceId::from_bytes(id))? {
                sources.push(source);
            }
        }
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sources)
    }

    // =========================================================================
    // Charge Operations
    // =========================================================================

    fn put_charge(&self, charge: &PendingCharge) -> Result<()> {
        let lock = self.account_lock(&charge.account_id);
        let _guard = Self::guard(&lock)?;

        if let Some(stored) = self.get_charge(&charge.id)? {
            if stored.status.is_resolved() {
                debug!(charge_id = %charge.id, "Ignoring update to resolved charge");
                return Ok(());
            }
        }

        let mut batch = WriteBatch::default();
        self.stage_charge(charge, &mut batch)?;
        self.write(batch)
    }

    fn get_charge(&self, charge_id: &ChargeId) -> Result<Option<PendingCharge>> {
        self.get(cf::CHARGES, &keys::charge_key(charge_id))
    }

    fn get_charge_by_ref(&self, gateway_ref: &GatewayRef) -> Result<Option<PendingCharge>> {
        let cf = self.cf(cf::CHARGES_BY_REF)?;
        let Some(value) = self
            .db
            .get_cf(&cf, keys::gateway_ref_key(gateway_ref))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        let charge_id = keys::id_bytes(&value)
            .map(ChargeId::from_bytes)
            .ok_or_else(|| StoreError::Serialization("malformed gateway ref index".into()))?;
        self.get_charge(&charge_id)
    }

    fn list_unresolved_charges(&self) -> Result<Vec<PendingCharge>> {
        let mut charges: Vec<PendingCharge> = self
            .scan_all::<PendingCharge>(cf::CHARGES)?
            .into_iter()
            .filter(|c| !c.status.is_resolved())
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
        let account_id = self.load_coupon(coupon_id)?.account_id;
        let lock = self.account_lock(&account_id);
        let _guard = Self::guard(&lock)?;

        let mut coupon = self.load_coupon(coupon_id)?;
        if let Some(prior) = self.get_entry_by_key(&account_id, &entry.idempotency_key)? {
            return Ok(Some((AppendOutcome::Duplicate(prior), coupon)));
        }
        if coupon.status != CouponStatus::Active || coupon.remaining_cents < entry.amount_cents {
            return Ok(None);
        }

        let mut batch = WriteBatch::default();
        let outcome = self.stage_append(entry, &mut batch)?;
        coupon.consume(entry.amount_cents);
        let cf_coupons = self.cf(cf::COUPONS)?;
        batch.put_cf(&cf_coupons, keys::coupon_key(&coupon.id), Self::serialize(&coupon)?);
        self.write(batch)?;

        Ok(Some((outcome, coupon)))
    }

    fn expire_coupon(&self, coupon_id: &CouponId, as_of: DateTime<Utc>) -> Result<Option<Coupon>> {
        let account_id = self.load_coupon(coupon_id)?.account_id;
        let lock = self.account_lock(&account_id);
        let _guard = Self::guard(&lock)?;

        let mut coupon = self.load_coupon(coupon_id)?;
        if coupon.status != CouponStatus::Active || !coupon.is_expired_at(as_of) {
            return Ok(None);
        }
        coupon.status = CouponStatus::Expired;

        let cf_coupons = self.cf(cf::COUPONS)?;
        self.db
            .put_cf(&cf_coupons, keys::coupon_key(&coupon.id), Self::serialize(&coupon)?)
            .map_err(db_err)?;
        Ok(Some(coupon))
    }

    fn settle_charge(&self, charge_id: &ChargeId, entry: &LedgerEntry) -> Result<ChargeTransition> {
        let account_id = self.load_charge(charge_id)?.account_id;
        let lock = self.account_lock(&account_id);
        let _guard = Self::guard(&lock)?;

        let mut charge = self.load_charge(charge_id)?;
        if charge.status.is_resolved() {
            return Ok(ChargeTransition::AlreadyResolved(charge));
        }

        let mut batch = WriteBatch::default();
        self.stage_append(entry, &mut batch)?;
        charge.resolve(ChargeStatus::Settled);
        self.stage_charge(&charge, &mut batch)?;
        self.write(batch)?;

        Ok(ChargeTransition::Resolved(charge))
    }

    fn fail_charge(&self, charge_id: &ChargeId, reason: &str) -> Result<ChargeTransition> {
        let account_id = self.load_charge(charge_id)?.account_id;
        let lock = self.account_lock(&account_id);
        let _guard = Self::guard(&lock)?;

        let mut charge = self.load_charge(charge_id)?;
        if charge.status.is_resolved() {
            return Ok(ChargeTransition::AlreadyResolved(charge));
        }

        charge.resolve(ChargeStatus::Failed {
            reason: reason.to_string(),
        });
        let mut batch = WriteBatch::default();
        self.stage_charge(&charge, &mut batch)?;
        self.write(batch)?;

        Ok(ChargeTransition::Resolved(charge))
    }
}
