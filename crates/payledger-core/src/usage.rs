//! Usage records and derived project charges.
//!
//! The metering service reports raw [`UsageRecord`]s per project. The ledger
//! never measures usage itself; it only aggregates records into a
//! [`ProjectCharge`] per project and period.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{BillingPeriod, ProjectId, RateTable, Resource};

/// One metered sample reported by the usage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Project that consumed the resource.
    pub project_id: ProjectId,
    /// What was consumed.
    pub resource: Resource,
    /// Amount consumed, in the resource's base unit.
    pub quantity: u64,
    /// When the sample was taken.
    pub observed_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Create a usage record.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        resource: Resource,
        quantity: u64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id,
            resource,
            quantity,
            observed_at,
        }
    }
}

/// Sum usage samples per resource.
///
/// Samples for other projects or outside `period` are ignored.
///
/// # Errors
///
/// Returns `LedgerError::InvalidInput` if a resource total overflows.
pub fn aggregate_usage(
    project_id: &ProjectId,
    period: &BillingPeriod,
    records: &[UsageRecord],
) -> Result<BTreeMap<Resource, u64>> {
    let mut totals = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.project_id == *project_id && period.contains(r.observed_at))
    {
        let total: &mut u64 = totals.entry(record.resource).or_default();
        *total = total.checked_add(record.quantity).ok_or_else(|| {
            LedgerError::InvalidInput(format!(
                "{} usage overflows for project {project_id}",
                record.resource.as_str()
            ))
        })?;
    }
    Ok(totals)
}

/// Amount owed for one project within a billing period.
///
/// Derived and never persisted on its own: the ledger entry tagged with the
/// project is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCharge {
    /// The charged project.
    pub project_id: ProjectId,
    /// The billing period.
    pub period: BillingPeriod,
    /// Aggregated quantities per resource (empty when rebuilt from the ledger).
    pub usage: BTreeMap<Resource, u64>,
    /// Positive amount owed in cents.
    pub amount_cents: i64,
}

impl ProjectCharge {
    /// Price aggregated usage for one project.
    ///
    /// # Errors
    ///
    /// Propagates rate table errors.
    pub fn price(
        project_id: ProjectId,
        period: BillingPeriod,
        usage: BTreeMap<Resource, u64>,
        rates: &RateTable,
    ) -> Result<Self> {
        let amount_cents = rates.cost_cents(&usage)?;
        Ok(Self {
            project_id,
            period,
            usage,
            amount_cents,
        })
    }

    /// One-line summary used as the ledger entry description.
    #[must_use]
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .usage
            .iter()
            .map(|(resource, quantity)| format!("{} {quantity}", resource.as_str()))
            .collect();
        format!(
            "Usage for project {} ({}): {}",
            self.project_id,
            self.period.key(),
            if parts.is_empty() {
                "no usage".to_string()
            } else {
                parts.join(", ")
            }
        )
    }
}
