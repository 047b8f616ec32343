//! Storage layer for payledger.
//!
//! This crate defines the [`Store`] trait, the storage-engine primitives the
//! ledger is built on, and ships two engines:
//!
//! - [`MemoryStore`]: per-account `RwLock`s held in `DashMap`s, no global lock.
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` with column families,
//!   CBOR values and a per-account write lock around atomic `WriteBatch`es.
//!
//! # Guarantees
//!
//! Every engine provides:
//!
//! - Insert-if-absent appends keyed by idempotency key, unique per account.
//! - Snapshot reads: a [`LedgerSnapshot`] holds the ordered entries and the
//!   balance as of one instant and never observes a partial append.
//! - Appends serialized per account, with different accounts never contending.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use payledger_core::{Account, EntryKind, IdempotencyKey, LedgerEntry, UserId};
//! use payledger_store::{AppendOutcome, MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let account = store
//!     .insert_account_if_absent(&Account::new(UserId::generate(), "ops@example.com"))
//!     .unwrap();
//!
//! let entry = LedgerEntry::credit(
//!     account.account_id,
//!     EntryKind::CardCredit,
//!     500,
//!     Utc::now(),
//!     IdempotencyKey::new("charge:1").unwrap(),
//!     "Card top-up".into(),
//! );
//! assert!(matches!(store.append_entry(&entry).unwrap(), AppendOutcome::Appended { .. }));
//! assert!(matches!(store.append_entry(&entry).unwrap(), AppendOutcome::Duplicate(_)));
//! assert_eq!(store.snapshot(&account.account_id).unwrap().balance_cents(), 500);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use payledger_core::{
    Account, AccountId, ChargeId, Coupon, CouponId, GatewayRef, IdempotencyKey, LedgerEntry,
    PaymentSource, PendingCharge, SourceId, UserId,
};

/// Result of an insert-if-absent append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was recorded.
    Appended {
        /// The recorded entry.
        entry: LedgerEntry,
        /// Account balance right after the append.
        balance_cents: i64,
    },
    /// An entry with the same idempotency key already exists; nothing changed.
    Duplicate(LedgerEntry),
}

impl AppendOutcome {
    /// The entry now holding the idempotency key.
    #[must_use]
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Appended { entry, .. } | Self::Duplicate(entry) => entry,
        }
    }

    /// Whether the append was suppressed as a duplicate.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Consistent view of one account's ledger.
///
/// Entries are ordered by `(effective_at, entry_id)`. Cloning is cheap: the
/// entry vector is shared.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    account_id: AccountId,
    balance_cents: i64,
    entries: Arc<Vec<LedgerEntry>>,
}

impl LedgerSnapshot {
    /// Build a snapshot from ordered entries and their sum.
    #[must_use]
    pub fn new(account_id: AccountId, balance_cents: i64, entries: Arc<Vec<LedgerEntry>>) -> Self {
        Self {
            account_id,
            balance_cents,
            entries,
        }
    }

    /// The account the snapshot belongs to.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Sum of every entry in the snapshot.
    #[must_use]
    pub const fn balance_cents(&self) -> i64 {
        self.balance_cents
    }

    /// Ordered entries.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a compound charge transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeTransition {
    /// The charge moved to its terminal state.
    Resolved(PendingCharge),
    /// The charge had already settled or failed; nothing changed.
    AlreadyResolved(PendingCharge),
}

impl ChargeTransition {
    /// The charge record after the call.
    #[must_use]
    pub const fn charge(&self) -> &PendingCharge {
        match self {
            Self::Resolved(charge) | Self::AlreadyResolved(charge) => charge,
        }
    }
}

/// The storage trait defining all database operations.
///
/// Implementations must serialize writes per account and must never let a
/// reader observe half of a compound operation.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert an account unless its owner already has one.
    ///
    /// Returns the stored account: the new one, or the existing one for the
    /// same owner. Concurrent callers for one owner all receive the same record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_account_if_absent(&self, account: &Account) -> Result<Account>;

    /// Update an existing account record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Get the account owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account_by_owner(&self, owner: &UserId) -> Result<Option<Account>>;

    /// List every account, ordered by account ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append an entry unless the account already holds its idempotency key.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::Conflict` if a concurrent writer won and the append may be retried.
    /// - `StoreError::BalanceOverflow` if the balance would leave the `i64` range.
    fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome>;

    /// Read the account's ordered entries and balance as of one instant.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn snapshot(&self, account_id: &AccountId) -> Result<LedgerSnapshot>;

    /// Look up the entry recorded under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry_by_key(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>>;

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    /// Insert or update a coupon.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Get a coupon by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>>;

    /// List an account's coupons, newest issuance first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_coupons(&self, account_id: &AccountId) -> Result<Vec<Coupon>>;

    // =========================================================================
    // Payment Source Operations
    // =========================================================================

    /// Insert or update a payment source.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_source(&self, source: &PaymentSource) -> Result<()>;

    /// Get a payment source by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_source(&self, source_id: &SourceId) -> Result<Option<PaymentSource>>;

    /// Delete a payment source.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the source doesn't exist.
    fn delete_source(&self, source_id: &SourceId) -> Result<()>;

    /// List an account's payment sources, oldest registration first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_sources(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>>;

    // =========================================================================
    // Charge Operations
    // =========================================================================

    /// Insert or update an unresolved charge, indexing its gateway reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_charge(&self, charge: &PendingCharge) -> Result<()>;

    /// Get a charge by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_charge(&self, charge_id: &ChargeId) -> Result<Option<PendingCharge>>;

    /// Get the charge the gateway knows as `gateway_ref`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_charge_by_ref(&self, gateway_ref: &GatewayRef) -> Result<Option<PendingCharge>>;

    /// List charges not yet settled or failed, oldest first. Includes charges
    /// whose submission the gateway never acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_unresolved_charges(&self) -> Result<Vec<PendingCharge>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Credit a coupon and record the consumption atomically.
    ///
    /// Returns `None` without writing when the coupon is no longer active or
    /// holds less than the entry's amount. On a duplicate key the coupon is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the coupon or its account doesn't exist.
    /// - Any error of [`Store::append_entry`].
    fn redeem_coupon(
        &self,
        coupon_id: &CouponId,
        entry: &LedgerEntry,
    ) -> Result<Option<(AppendOutcome, Coupon)>>;

    /// Mark a coupon expired if it is still active and past its window at `as_of`.
    ///
    /// Returns the updated coupon, or `None` if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the coupon doesn't exist.
    fn expire_coupon(&self, coupon_id: &CouponId, as_of: DateTime<Utc>) -> Result<Option<Coupon>>;

    /// Append a charge's credit entry and mark it settled atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the charge doesn't exist.
    /// - Any error of [`Store::append_entry`].
    fn settle_charge(&self, charge_id: &ChargeId, entry: &LedgerEntry) -> Result<ChargeTransition>;

    /// Mark a charge failed unless it already resolved.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the charge doesn't exist.
    fn fail_charge(&self, charge_id: &ChargeId, reason: &str) -> Result<ChargeTransition>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn insert_account_if_absent(&self, account: &Account) -> Result<Account> {
        (**self).insert_account_if_absent(account)
    }

    fn put_account(&self, account: &Account) -> Result<()> {
        (**self).put_account(account)
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        (**self).get_account(account_id)
    }

    fn get_account_by_owner(&self, owner: &UserId) -> Result<Option<Account>> {
        (**self).get_account_by_owner(owner)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        (**self).list_accounts()
    }

    fn append_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        (**self).append_entry(entry)
    }

    fn snapshot(&self, account_id: &AccountId) -> Result<LedgerSnapshot> {
        (**self).snapshot(account_id)
    }

    fn get_entry_by_key(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        (**self).get_entry_by_key(account_id, key)
    }

    fn put_coupon(&self, coupon: &Coupon) -> Result<()> {
        (**self).put_coupon(coupon)
    }

    fn get_coupon(&self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        (**self).get_coupon(coupon_id)
    }

    fn list_coupons(&self, account_id: &AccountId) -> Result<Vec<Coupon>> {
        (**self).list_coupons(account_id)
    }

    fn put_source(&self, source: &PaymentSource) -> Result<()> {
        (**self).put_source(source)
    }

    fn get_source(&self, source_id: &SourceId) -> Result<Option<PaymentSource>> {
        (**self).get_source(source_id)
    }

    fn delete_source(&self, source_id: &SourceId) -> Result<()> {
        (**self).delete_source(source_id)
    }

    fn list_sources(&self, account_id: &AccountId) -> Result<Vec<PaymentSource>> {
        (**self).list_sources(account_id)
    }

    fn put_charge(&self, charge: &PendingCharge) -> Result<()> {
        (**self).put_charge(charge)
    }

    fn get_charge(&self, charge_id: &ChargeId) -> Result<Option<PendingCharge>> {
        (**self).get_charge(charge_id)
    }

    fn get_charge_by_ref(&self, gateway_ref: &GatewayRef) -> Result<Option<PendingCharge>> {
        (**self).get_charge_by_ref(gateway_ref)
    }

    fn list_unresolved_charges(&self) -> Result<Vec<PendingCharge>> {
        (**self).list_unresolved_charges()
    }

    fn redeem_coupon(
        &self,
        coupon_id: &CouponId,
        entry: &LedgerEntry,
    ) -> Result<Option<(AppendOutcome, Coupon)>> {
        (**self).redeem_coupon(coupon_id, entry)
    }

    fn expire_coupon(&self, coupon_id: &CouponId, as_of: DateTime<Utc>) -> Result<Option<Coupon>> {
        (**self).expire_coupon(coupon_id, as_of)
    }

    fn settle_charge(&self, charge_id: &ChargeId, entry: &LedgerEntry) -> Result<ChargeTransition> {
        (**self).settle_charge(charge_id, entry)
    }

    fn fail_charge(&self, charge_id: &ChargeId, reason: &str) -> Result<ChargeTransition> {
        (**self).fail_charge(charge_id, reason)
    }
}
