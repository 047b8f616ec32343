//! Resolving unsettled charges.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use payledger_core::{
    ChargeStatus, GatewayRef, LedgerEntry, LedgerError, PendingCharge, Result, SettlementOutcome,
};
use payledger_store::ChargeTransition;

use super::{ChargeOutcome, SourceBook, Submission};

/// Counts from one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Charges newly settled or confirmed settled.
    pub settled: usize,
    /// Charges that failed.
    pub failed: usize,
    /// Charges the gateway has not decided yet.
    pub pending: usize,
    /// Charges that could not be checked this round.
    pub errors: usize,
}

impl ReconcileReport {
    fn count(&mut self, outcome: &ChargeOutcome) {
        match outcome {
            ChargeOutcome::Settled { .. } => self.settled += 1,
            ChargeOutcome::Failed { .. } => self.failed += 1,
            ChargeOutcome::Pending { .. } => self.pending += 1,
        }
    }
}

impl SourceBook {
    pub(crate) async fn on_settlement(
        &self,
        gateway_ref: &GatewayRef,
        outcome: SettlementOutcome,
    ) -> Result<ChargeOutcome> {
        let charge = self
            .store
            .get_charge_by_ref(gateway_ref)?
            .filter(|c| c.kind == self.kind)
            .ok_or_else(|| LedgerError::UnknownGatewayRef(gateway_ref.to_string()))?;
        self.apply_outcome(&charge, outcome).await
    }

    pub(crate) async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let unresolved = self
            .store
            .list_unresolved_charges()?
            .into_iter()
            .filter(|c| c.kind == self.kind);

        for charge in unresolved {
            let gateway_ref = match charge.gateway_ref.clone() {
                Some(gateway_ref) => gateway_ref,
                None => match self.resubmit(&charge).await {
                    Ok(Submission::Accepted(gateway_ref)) => gateway_ref,
                    Ok(Submission::Resolved(outcome)) => {
                        report.count(&outcome);
                        continue;
                    }
                    Err(e) => {
                        warn!(charge_id = %charge.id, error = %e, "Resubmitting charge failed");
                        report.errors += 1;
                        continue;
                    }
                },
            };
            let status = match self.gateway.settlement_status(&gateway_ref).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(charge_id = %charge.id, error = %e, "Settlement status check failed");
                    report.errors += 1;
                    continue;
                }
            };
            let Some(outcome) = status else {
                report.pending += 1;
                continue;
            };
            match self.apply_outcome(&charge, outcome).await {
                Ok(outcome) => report.count(&outcome),
                Err(e) => {
                    warn!(charge_id = %charge.id, error = %e, "Failed to apply settlement");
                    report.errors += 1;
                }
            }
        }

        if report.settled + report.failed + report.errors > 0 {
            info!(
                kind = self.kind.as_str(),
                settled = report.settled,
                failed = report.failed,
                pending = report.pending,
                errors = report.errors,
                "Unresolved charges reconciled"
            );
        }
        Ok(report)
    }

    /// Submit a charge whose first submission was never acknowledged. The
    /// idempotency key is unchanged, so a gateway that already took the charge
    /// answers with the original reference.
    async fn resubmit(&self, charge: &PendingCharge) -> Result<Submission> {
        let source = self
            .store
            .get_source(&charge.source_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "payment source",
                id: charge.source_id.to_string(),
            })?;
        debug!(charge_id = %charge.id, "Resubmitting unacknowledged charge");
        let request = self.request_for(charge, &source);
        self.submit(charge, &request).await
    }

    /// Apply a gateway decision. The first decision on a charge is final.
    pub(crate) async fn apply_outcome(
        &self,
        charge: &PendingCharge,
        outcome: SettlementOutcome,
    ) -> Result<ChargeOutcome> {
        let confirms_settled = outcome == SettlementOutcome::Settled;
        let transition = match outcome {
            SettlementOutcome::Settled => {
                let entry = LedgerEntry::credit(
                    charge.account_id,
                    charge.kind.credit_kind(),
                    charge.amount_cents,
                    Utc::now(),
                    charge.idempotency_key.clone(),
                    format!("{} charge {}", charge.kind.as_str(), charge.id),
                );
                self.ledger.settle_charge(&charge.id, &entry).await?
            }
            SettlementOutcome::Failed { reason } => {
                self.ledger
                    .fail_charge(&charge.account_id, &charge.id, &reason)
                    .await?
            }
        };

        let resolved = match transition {
            ChargeTransition::Resolved(resolved) => {
                info!(
                    account_id = %resolved.account_id,
                    charge_id = %resolved.id,
                    status = ?resolved.status,
                    "Charge resolved"
                );
                resolved
            }
            ChargeTransition::AlreadyResolved(resolved)
                if confirms_settled != (resolved.status == ChargeStatus::Settled) =>
            {
                warn!(
                    charge_id = %resolved.id,
                    status = ?resolved.status,
                    confirms_settled,
                    "Contradicting settlement ignored, first decision stands"
                );
                resolved
            }
            ChargeTransition::AlreadyResolved(resolved) => {
                debug!(
                    charge_id = %resolved.id,
                    status = ?resolved.status,
                    "Charge already resolved, ignoring repeat settlement"
                );
                resolved
            }
        };
        self.outcome_of(resolved)
    }

    pub(crate) fn outcome_of(&self, charge: PendingCharge) -> Result<ChargeOutcome> {
        match charge.status {
            ChargeStatus::Settled => {
                let entry = self
                    .ledger
                    .entry_for_charge(&charge.account_id, &charge.idempotency_key)?
                    .ok_or_else(|| {
                        LedgerError::Storage(format!("settled charge {} has no ledger entry", charge.id))
                    })?;
                Ok(ChargeOutcome::Settled {
                    charge_id: charge.id,
                    entry,
                })
            }
            ChargeStatus::Failed { reason } => Ok(ChargeOutcome::Failed {
                charge_id: charge.id,
                reason,
            }),
            ChargeStatus::Submitting | ChargeStatus::Pending => Ok(ChargeOutcome::Pending {
                charge_id: charge.id,
                gateway_ref: charge.gateway_ref,
            }),
        }
    }
}
