//! Metering collaborator.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;

use payledger_core::{AccountId, BillingPeriod, ProjectId, Result, UsageRecord};

/// Source of metered usage, owned by the metering service.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Projects of `account_id` that may have usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the metering service cannot be reached.
    async fn projects(&self, account_id: &AccountId) -> Result<Vec<ProjectId>>;

    /// Usage samples of one project within `period`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metering service cannot be reached.
    async fn usage(
        &self,
        account_id: &AccountId,
        project_id: &ProjectId,
        period: &BillingPeriod,
    ) -> Result<Vec<UsageRecord>>;
}

/// Usage samples held in memory, fed by whoever ingests metering data.
#[derive(Debug, Default)]
pub struct RecordedUsage {
    records: DashMap<AccountId, Vec<UsageRecord>>,
}

impl RecordedUsage {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample for `account_id`.
    pub fn record(&self, account_id: AccountId, record: UsageRecord) {
        self.records.entry(account_id).or_default().push(record);
    }
}

#[async_trait]
impl UsageSource for RecordedUsage {
    async fn projects(&self, account_id: &AccountId) -> Result<Vec<ProjectId>> {
        let projects: BTreeSet<ProjectId> = self
            .records
            .get(account_id)
            .map(|records| records.iter().map(|r| r.project_id).collect())
            .unwrap_or_default();
        Ok(projects.into_iter().collect())
    }

    async fn usage(
        &self,
        account_id: &AccountId,
        project_id: &ProjectId,
        period: &BillingPeriod,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records
            .get(account_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.project_id == *project_id && period.contains(r.observed_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
