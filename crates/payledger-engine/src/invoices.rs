//! Per-period account statements.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use payledger_core::{AccountId, BillingPeriod, Invoice, Result};

use crate::charges::project_charges;
use crate::ledger::BalanceLedger;
use crate::registry::AccountRegistry;

/// Builds read-only statements from a single ledger snapshot.
pub struct InvoiceAssembler {
    registry: Arc<AccountRegistry>,
    ledger: Arc<BalanceLedger>,
}

impl InvoiceAssembler {
    /// Create an assembler over `ledger`.
    #[must_use]
    pub fn new(registry: Arc<AccountRegistry>, ledger: Arc<BalanceLedger>) -> Self {
        Self { registry, ledger }
    }

    /// Assemble the statement of `account_id` for `period`.
    ///
    /// Every figure comes from one snapshot, so concurrent appends never
    /// produce a statement whose totals disagree with each other.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    pub fn assemble(&self, account_id: &AccountId, period: &BillingPeriod) -> Result<Invoice> {
        self.registry.get(account_id)?;
        let snapshot = self.ledger.snapshot(account_id)?;
        let entries = snapshot.entries();

        let opening_balance_cents: i64 = entries
            .iter()
            .take_while(|e| e.effective_at < period.start)
            .map(|e| e.amount_cents)
            .sum();

        let mut total_usage_cents = 0;
        let mut credits_by_kind = BTreeMap::new();
        let mut entry_count = 0;
        for entry in entries.iter().filter(|e| period.contains(e.effective_at)) {
            entry_count += 1;
            if entry.kind.is_credit() {
                *credits_by_kind.entry(entry.kind).or_insert(0) += entry.amount_cents;
            } else {
                total_usage_cents -= entry.amount_cents;
            }
        }
        let total_credits_cents: i64 = credits_by_kind.values().sum();
        let net_change_cents = total_credits_cents - total_usage_cents;

        let mut charges = project_charges(entries, period);
        charges.sort_by(|a, b| {
            b.amount_cents
                .cmp(&a.amount_cents)
                .then_with(|| a.project_id.cmp(&b.project_id))
        });

        debug!(
            account_id = %account_id,
            period = %period.key(),
            entries = entry_count,
            "Invoice assembled"
        );

        Ok(Invoice {
            account_id: *account_id,
            period: *period,
            project_charges: charges,
            total_usage_cents,
            credits_by_kind,
            total_credits_cents,
            net_change_cents,
            opening_balance_cents,
            ending_balance_cents: opening_balance_cents + net_change_cents,
            entry_count,
            generated_at: Utc::now(),
        })
    }
}
