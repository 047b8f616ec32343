//! Usage charge computation.
//!
//! Turns metered usage into one `UsageCharge` entry per project and period.
//! The entry key is derived from account, project and period, so computing
//! the same period again never charges twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, info};

use payledger_core::{
    aggregate_usage, AccountId, BillingPeriod, EntryKind, IdempotencyKey, LedgerEntry,
    ProjectCharge, ProjectId, RateTable, Result,
};
use payledger_store::AppendOutcome;

use crate::ledger::BalanceLedger;
use crate::registry::AccountRegistry;
use crate::usage::UsageSource;

/// Prices metered usage and records it on the ledger.
pub struct ChargeCalculator {
    registry: Arc<AccountRegistry>,
    ledger: Arc<BalanceLedger>,
    usage: Arc<dyn UsageSource>,
    rates: RateTable,
}

impl ChargeCalculator {
    /// Create a calculator pricing with `rates`.
    #[must_use]
    pub fn new(
        registry: Arc<AccountRegistry>,
        ledger: Arc<BalanceLedger>,
        usage: Arc<dyn UsageSource>,
        rates: RateTable,
    ) -> Self {
        Self {
            registry,
            ledger,
            usage,
            rates,
        }
    }

    /// Charge every project of the account for `period`.
    ///
    /// Each project with a non-zero cost gets one usage entry. When the period
    /// was already charged, the returned amount is the one on the ledger.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AccountNotSetup` if the account does not exist.
    /// - `LedgerError::AccountDisabled` if the account was disabled.
    /// - Any error from the usage source or the ledger.
    pub async fn compute(
        &self,
        account_id: &AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<ProjectCharge>> {
        self.registry.require_active(account_id)?;
        let mut charges = self.price(account_id, period).await?;
        let effective_at = period.clamp(Utc::now());

        for charge in &mut charges {
            if charge.amount_cents == 0 {
                debug!(project_id = %charge.project_id, "No billable usage");
                continue;
            }

            let entry = LedgerEntry::usage_charge(
                *account_id,
                charge.project_id,
                charge.amount_cents,
                effective_at,
                IdempotencyKey::usage(account_id, &charge.project_id, &period.key()),
                charge.describe(),
            );

            if let AppendOutcome::Duplicate(prior) = self.ledger.append(&entry).await? {
                charge.amount_cents = -prior.amount_cents;
            }
        }

        info!(
            account_id = %account_id,
            period = %period.key(),
            projects = charges.len(),
            "Usage charges computed"
        );
        Ok(charges)
    }

    /// Price the account's usage for `period` without touching the ledger.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AccountNotSetup` if the account does not exist.
    /// - Any error from the usage source.
    pub async fn estimate(
        &self,
        account_id: &AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<ProjectCharge>> {
        self.registry.get(account_id)?;
        self.price(account_id, period).await
    }

    /// Rebuild per-project charges from the ledger alone.
    ///
    /// The result carries amounts only; usage quantities are not stored on
    /// the ledger.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    pub fn charges_from_ledger(
        &self,
        account_id: &AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<ProjectCharge>> {
        self.registry.get(account_id)?;
        let snapshot = self.ledger.snapshot(account_id)?;
        Ok(project_charges(snapshot.entries(), period))
    }

    async fn price(
        &self,
        account_id: &AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<ProjectCharge>> {
        let projects = self.usage.projects(account_id).await?;
        let fetches = projects.into_iter().map(|project_id| async move {
            let records = self.usage.usage(account_id, &project_id, period).await?;
            let totals = aggregate_usage(&project_id, period, &records)?;
            ProjectCharge::price(project_id, *period, totals, &self.rates)
        });
        try_join_all(fetches).await
    }
}

/// Group the usage charges of `entries` that fall in `period` by project.
///
/// Amounts are positive. Projects are ordered by ID.
pub(crate) fn project_charges(entries: &[LedgerEntry], period: &BillingPeriod) -> Vec<ProjectCharge> {
    let mut totals: BTreeMap<ProjectId, i64> = BTreeMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.kind == EntryKind::UsageCharge && period.contains(e.effective_at))
    {
        if let Some(project_id) = entry.project_id {
            *totals.entry(project_id).or_default() -= entry.amount_cents;
        }
    }

    totals
        .into_iter()
        .map(|(project_id, amount_cents)| ProjectCharge {
            project_id,
            period: *period,
            usage: BTreeMap::new(),
            amount_cents,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use payledger_core::{Rate, Resource, UsageRecord, UserId, BYTES_PER_TB};
    use payledger_store::{MemoryStore, Store};

    use crate::config::EngineConfig;
    use crate::registry::OpenDirectory;
    use crate::usage::RecordedUsage;

    struct Fixture {
        calculator: ChargeCalculator,
        ledger: Arc<BalanceLedger>,
        usage: Arc<RecordedUsage>,
        account_id: AccountId,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = Arc::new(AccountRegistry::new(Arc::clone(&store), Arc::new(OpenDirectory)));
        let ledger = Arc::new(BalanceLedger::new(store, &EngineConfig::default()));
        let usage = Arc::new(RecordedUsage::new());
        let account_id = registry
            .setup(&UserId::generate(), "u@example.com")
            .await
            .unwrap();
        let rates = RateTable {
            rates: BTreeMap::from([(Resource::EgressBytes, Rate::new(700, BYTES_PER_TB))]),
        };
        Fixture {
            calculator: ChargeCalculator::new(
                registry,
                Arc::clone(&ledger),
                Arc::clone(&usage) as Arc<dyn UsageSource>,
                rates,
            ),
            ledger,
            usage,
            account_id,
        }
    }

    #[tokio::test]
    async fn compute_twice_appends_once() {
        let f = fixture().await;
        let period = BillingPeriod::month_of(Utc::now());
        let project = ProjectId::generate();
        f.usage.record(
            f.account_id,
            UsageRecord::new(project, Resource::EgressBytes, BYTES_PER_TB, period.start),
        );

        let first = f.calculator.compute(&f.account_id, &period).await.unwrap();
        let second = f.calculator.compute(&f.account_id, &period).await.unwrap();

        assert_eq!(first[0].amount_cents, 700);
        assert_eq!(second[0].amount_cents, 700);
        let snapshot = f.ledger.snapshot(&f.account_id).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.balance_cents(), -700);
    }

    #[tokio::test]
    async fn duplicate_reports_recorded_amount() {
        let f = fixture().await;
        let period = BillingPeriod::month_of(Utc::now());
        let project = ProjectId::generate();
        f.usage.record(
            f.account_id,
            UsageRecord::new(project, Resource::EgressBytes, BYTES_PER_TB, period.start),
        );
        f.calculator.compute(&f.account_id, &period).await.unwrap();

        // Late samples do not change an already-charged period.
        f.usage.record(
            f.account_id,
            UsageRecord::new(project, Resource::EgressBytes, BYTES_PER_TB, period.start),
        );
        let again = f.calculator.compute(&f.account_id, &period).await.unwrap();
        assert_eq!(again[0].amount_cents, 700);

        let estimate = f.calculator.estimate(&f.account_id, &period).await.unwrap();
        assert_eq!(estimate[0].amount_cents, 1400);
    }

    #[tokio::test]
    async fn zero_cost_project_has_no_entry() {
        let f = fixture().await;
        let period = BillingPeriod::month_of(Utc::now());
        f.usage.record(
            f.account_id,
            UsageRecord::new(ProjectId::generate(), Resource::ObjectHours, 1_000, period.start),
        );

        let charges = f.calculator.compute(&f.account_id, &period).await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_cents, 0);
        assert!(f.ledger.snapshot(&f.account_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_land_inside_past_period() {
        let f = fixture().await;
        let period = BillingPeriod::month_of(Utc::now()).previous_month();
        f.usage.record(
            f.account_id,
            UsageRecord::new(
                ProjectId::generate(),
                Resource::EgressBytes,
                BYTES_PER_TB,
                period.start + Duration::days(2),
            ),
        );

        f.calculator.compute(&f.account_id, &period).await.unwrap();

        let entries = f.ledger.entries_in_period(&f.account_id, &period).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            f.calculator.charges_from_ledger(&f.account_id, &period).unwrap()[0].amount_cents,
            700
        );
    }

    #[tokio::test]
    async fn projects_in_ledger_projection_are_separate() {
        let f = fixture().await;
        let period = BillingPeriod::month_of(Utc::now());
        for _ in 0..3 {
            f.usage.record(
                f.account_id,
                UsageRecord::new(
                    ProjectId::generate(),
                    Resource::EgressBytes,
                    BYTES_PER_TB,
                    period.start,
                ),
            );
        }

        f.calculator.compute(&f.account_id, &period).await.unwrap();
        let rebuilt = f.calculator.charges_from_ledger(&f.account_id, &period).unwrap();
        assert_eq!(rebuilt.len(), 3);
        assert!(rebuilt.iter().all(|c| c.amount_cents == 700));
        assert_eq!(f.ledger.balance(&f.account_id).unwrap(), -2100);
    }
}
