//! Per-period account statements.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, BillingPeriod, EntryKind, ProjectCharge};

/// Statement of an account's ledger movements over one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// The account the statement covers.
    pub account_id: AccountId,

    /// The period covered.
    pub period: BillingPeriod,

    /// Usage charges per project, largest first.
    pub project_charges: Vec<ProjectCharge>,

    /// Total usage charged in the period, as a positive amount.
    pub total_usage_cents: i64,

    /// Credits received in the period, per credit kind.
    pub credits_by_kind: BTreeMap<EntryKind, i64>,

    /// Sum of all credits in the period.
    pub total_credits_cents: i64,

    /// Credits minus usage over the period.
    pub net_change_cents: i64,

    /// Balance before the period started.
    pub opening_balance_cents: i64,

    /// Balance at the end of the period.
    pub ending_balance_cents: i64,

    /// Number of entries that fell inside the period.
    pub entry_count: usize,

    /// When the statement was assembled.
    pub generated_at: DateTime<Utc>,
}

impl Invoice {
    /// Amount still owed at the end of the period (zero when in credit).
    #[must_use]
    pub fn amount_due_cents(&self) -> i64 {
        (-self.ending_balance_cents).max(0)
    }
}
