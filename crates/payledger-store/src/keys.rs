//! Key encoding utilities for `RocksDB`.
//!
//! Identifiers are stored as their raw 16 bytes. Composite keys start with
//! the owning account so that one prefix scan returns everything the account
//! holds in a column family.

use chrono::{DateTime, Utc};
use payledger_core::{
    AccountId, ChargeId, CouponId, EntryId, GatewayRef, IdempotencyKey, SourceId, UserId,
};

/// Length of an account prefix.
pub const ACCOUNT_PREFIX_LEN: usize = 16;

/// Length of a ledger entry key: `account || effective_at || entry_id`.
pub const ENTRY_KEY_LEN: usize = 16 + 8 + 16;

/// Create an account key.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an owner index key.
#[must_use]
pub fn owner_key(owner: &UserId) -> Vec<u8> {
    owner.as_bytes().to_vec()
}

/// Create the prefix shared by every key an account owns in a column family.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a ledger entry key.
///
/// Format: `account_id (16 bytes) || effective_at (8 bytes) || entry_id (16 bytes)`
///
/// `effective_at` is encoded as microseconds with the sign bit flipped, so
/// byte order matches time order, including before the epoch. A forward scan
/// over the account prefix yields entries ordered by `(effective_at, entry_id)`.
#[must_use]
pub fn entry_key(account_id: &AccountId, effective_at: DateTime<Utc>, entry_id: &EntryId) -> Vec<u8> {
    let micros = effective_at.timestamp_micros() ^ i64::MIN;
    let mut key = Vec::with_capacity(ENTRY_KEY_LEN);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&micros.to_be_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create an idempotency index key.
///
/// Format: `account_id (16 bytes) || key (UTF-8)`
#[must_use]
pub fn entry_idempotency_key(account_id: &AccountId, key: &IdempotencyKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(ACCOUNT_PREFIX_LEN + key.as_str().len());
    out.extend_from_slice(account_id.as_bytes());
    out.extend_from_slice(key.as_str().as_bytes());
    out
}

/// Create a coupon key.
#[must_use]
pub fn coupon_key(coupon_id: &CouponId) -> Vec<u8> {
    coupon_id.as_bytes().to_vec()
}

/// Create an account-coupon index key: `account_id || coupon_id`.
#[must_use]
pub fn account_coupon_key(account_id: &AccountId, coupon_id: &CouponId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(coupon_id.as_bytes());
    key
}

/// Create a payment source key.
#[must_use]
pub fn source_key(source_id: &SourceId) -> Vec<u8> {
    source_id.as_bytes().to_vec()
}

/// Create an account-source index key: `account_id || source_id`.
#[must_use]
pub fn account_source_key(account_id: &AccountId, source_id: &SourceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(source_id.as_bytes());
    key
}

/// Create a charge key.
#[must_use]
pub fn charge_key(charge_id: &ChargeId) -> Vec<u8> {
    charge_id.as_bytes().to_vec()
}

/// Create a gateway reference index key.
#[must_use]
pub fn gateway_ref_key(gateway_ref: &GatewayRef) -> Vec<u8> {
    gateway_ref.as_str().as_bytes().to_vec()
}

/// Extract the trailing 16-byte identifier from an index key.
///
/// Returns `None` if the key is shorter than 32 bytes.
#[must_use]
pub fn trailing_id(key: &[u8]) -> Option<[u8; 16]> {
    if key.len() < 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[key.len() - 16..]);
    Some(bytes)
}

/// Decode a raw 16-byte identifier value.
#[must_use]
pub fn id_bytes(value: &[u8]) -> Option<[u8; 16]> {
    value.try_into().ok()
}
