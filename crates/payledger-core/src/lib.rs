//! Core types and utilities for payledger.
//!
//! This crate provides the foundational types of the payment account ledger:
//!
//! - **Identifiers**: `UserId`, `AccountId`, `ProjectId`, `CouponId`, `SourceId`,
//!   `ChargeId`, `EntryId`, `IdempotencyKey`, `GatewayRef`
//! - **Accounts**: `Account`, `SetupState`
//! - **Ledger**: `LedgerEntry`, `EntryKind`
//! - **Coupons**: `Coupon`, `CouponStatus`
//! - **Payments**: `PaymentSource`, `SourceDetails`, `PendingCharge`, `SettlementOutcome`
//! - **Usage and pricing**: `UsageRecord`, `ProjectCharge`, `RateTable`, `BillingPeriod`
//! - **Statements**: `Invoice`
//!
//! # Money
//!
//! Every amount is an `i64` count of cents. Nothing in the ledger touches
//! floating point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod coupon;
pub mod entry;
pub mod error;
pub mod ids;
pub mod invoice;
pub mod payment;
pub mod period;
pub mod pricing;
pub mod usage;

pub use account::{Account, SetupState};
pub use coupon::{Coupon, CouponStatus};
pub use entry::{EntryKind, LedgerEntry};
pub use error::{LedgerError, Result};
pub use ids::{
    AccountId, ChargeId, CouponId, EntryId, GatewayRef, IdError, IdempotencyKey, ProjectId,
    SourceId, UserId,
};
pub use invoice::Invoice;
pub use payment::{
    CardDetails, ChargeStatus, PaymentSource, PendingCharge, SettlementOutcome, SourceDetails,
    SourceKind, SourceStatus, TokenDetails,
};
pub use period::BillingPeriod;
pub use pricing::{Rate, RateTable, Resource, BYTES_PER_TB, HOURS_PER_BILLING_MONTH};
pub use usage::{aggregate_usage, ProjectCharge, UsageRecord};
