//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Index: account by owner, keyed by `user_id`. Value is the `account_id`.
    pub const ACCOUNTS_BY_OWNER: &str = "accounts_by_owner";

    /// Materialized balance per account, keyed by `account_id`.
    /// Value is an `i64` in big-endian bytes.
    pub const BALANCES: &str = "balances";

    /// Ledger entries, keyed by `account_id || effective_at || entry_id`.
    pub const ENTRIES: &str = "entries";

    /// Index: entry by idempotency key, keyed by `account_id || key`.
    /// Value is the entry's key in [`ENTRIES`].
    pub const ENTRY_KEYS: &str = "entry_keys";

    /// Coupons, keyed by `coupon_id`.
    pub const COUPONS: &str = "coupons";

    /// Index: coupons by account, keyed by `account_id || coupon_id`.
    /// Value is empty (index only).
    pub const COUPONS_BY_ACCOUNT: &str = "coupons_by_account";

    /// Payment sources, keyed by `source_id`.
    pub const SOURCES: &str = "sources";

    /// Index: sources by account, keyed by `account_id || source_id`.
    /// Value is empty (index only).
    pub const SOURCES_BY_ACCOUNT: &str = "sources_by_account";

    /// Gateway charges, keyed by `charge_id`.
    pub const CHARGES: &str = "charges";

    /// Index: charge by gateway reference. Value is the `charge_id`.
    pub const CHARGES_BY_REF: &str = "charges_by_ref";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ACCOUNTS_BY_OWNER,
        cf::BALANCES,
        cf::ENTRIES,
        cf::ENTRY_KEYS,
        cf::COUPONS,
        cf::COUPONS_BY_ACCOUNT,
        cf::SOURCES,
        cf::SOURCES_BY_ACCOUNT,
        cf::CHARGES,
        cf::CHARGES_BY_REF,
    ]
}
