//! Coupon issuance, redemption and expiry.
//!
//! A coupon credits its remaining amount at most once per billing period and
//! never after its window closes. Expiry forfeits whatever is left.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use payledger_core::{
    AccountId, BillingPeriod, Coupon, CouponId, CouponStatus, EntryKind, IdempotencyKey,
    LedgerEntry, LedgerError, ProjectId, Result,
};
use payledger_store::{AppendOutcome, Store};

use crate::ledger::BalanceLedger;
use crate::registry::AccountRegistry;

/// Issues and redeems promotional coupons.
pub struct CouponEngine {
    store: Arc<dyn Store>,
    registry: Arc<AccountRegistry>,
    ledger: Arc<BalanceLedger>,
}

impl CouponEngine {
    /// Create a coupon engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<AccountRegistry>,
        ledger: Arc<BalanceLedger>,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
        }
    }

    /// Issue a coupon worth `amount_cents`, valid for `duration` from now.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if the amount or duration is not positive.
    /// - `LedgerError::AccountNotSetup` if the account does not exist.
    /// - `LedgerError::AccountDisabled` if the account was disabled.
    pub fn add_coupon(
        &self,
        account_id: &AccountId,
        project_id: Option<ProjectId>,
        amount_cents: i64,
        duration: Duration,
        description: &str,
    ) -> Result<CouponId> {
        self.issue(
            account_id,
            project_id,
            amount_cents,
            duration,
            description,
            Utc::now(),
        )
    }

    /// Issue a coupon with an explicit issuance time.
    ///
    /// # Errors
    ///
    /// Same as [`CouponEngine::add_coupon`].
    pub fn issue(
        &self,
        account_id: &AccountId,
        project_id: Option<ProjectId>,
        amount_cents: i64,
        duration: Duration,
        description: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<CouponId> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "coupon amount must be positive, got {amount_cents}"
            )));
        }
        if duration <= Duration::zero() {
            return Err(LedgerError::InvalidAmount(format!(
                "coupon duration must be positive, got {}s",
                duration.num_seconds()
            )));
        }
        if duration.subsec_nanos() != 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "coupon duration must be whole seconds, got {duration}"
            )));
        }
        if issued_at.checked_add_signed(duration).is_none() {
            return Err(LedgerError::InvalidAmount(format!(
                "coupon duration {}s reaches past the representable calendar",
                duration.num_seconds()
            )));
        }
        self.registry.require_active(account_id)?;

        let coupon = Coupon::new(
            *account_id,
            project_id,
            amount_cents,
            duration,
            description,
            issued_at,
        );
        self.store.put_coupon(&coupon)?;

        info!(
            account_id = %account_id,
            coupon_id = %coupon.id,
            amount_cents = amount_cents,
            expires_at = %coupon.expires_at(),
            "Coupon issued"
        );
        Ok(coupon.id)
    }

    /// Credit every redeemable coupon of the account as of `as_of`.
    ///
    /// Coupons past their window are marked expired and produce nothing.
    /// Returns the entries appended by this call; a repeat within the same
    /// billing period returns an empty list.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AccountNotSetup` if the account does not exist.
    /// - `LedgerError::AccountDisabled` if the account was disabled.
    pub async fn apply(&self, account_id: &AccountId, as_of: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        self.registry.require_active(account_id)?;
        let period = BillingPeriod::month_of(as_of);

        let mut credited = Vec::new();
        for coupon in self.store.list_coupons(account_id)? {
            if coupon.status != CouponStatus::Active {
                continue;
            }
            if coupon.is_expired_at(as_of) {
                self.mark_expired(&coupon, as_of).await?;
                continue;
            }
            if !coupon.is_redeemable_at(as_of) {
                continue;
            }

            let entry = LedgerEntry::credit(
                *account_id,
                EntryKind::CouponCredit,
                coupon.remaining_cents,
                as_of,
                IdempotencyKey::coupon(&coupon.id, &period.key()),
                coupon_description(&coupon),
            );

            match self.ledger.redeem_coupon(&coupon.id, &entry).await? {
                Some((AppendOutcome::Appended { entry, .. }, updated)) => {
                    info!(
                        account_id = %account_id,
                        coupon_id = %coupon.id,
                        amount_cents = entry.amount_cents,
                        remaining_cents = updated.remaining_cents,
                        "Coupon credited"
                    );
                    credited.push(entry);
                }
                Some((AppendOutcome::Duplicate(_), _)) => {
                    debug!(coupon_id = %coupon.id, period = %period.key(), "Coupon already credited this period");
                }
                None => {
                    debug!(coupon_id = %coupon.id, "Coupon no longer redeemable");
                }
            }
        }

        Ok(credited)
    }

    /// List the account's coupons, newest issuance first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    pub fn list(&self, account_id: &AccountId) -> Result<Vec<Coupon>> {
        self.registry.get(account_id)?;
        Ok(self.store.list_coupons(account_id)?)
    }

    /// Mark the account's coupons that are past their window as expired.
    ///
    /// Returns how many coupons expired.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotSetup` if the account does not exist.
    pub async fn expire(&self, account_id: &AccountId, as_of: DateTime<Utc>) -> Result<usize> {
        self.registry.get(account_id)?;

        let mut expired = 0;
        for coupon in self.store.list_coupons(account_id)? {
            if coupon.status == CouponStatus::Active
                && coupon.is_expired_at(as_of)
                && self.mark_expired(&coupon, as_of).await?
            {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Expire coupons across every account.
    ///
    /// Failures on one account are logged and do not stop the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the account list cannot be read.
    pub async fn expire_all(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for account in self.registry.list()? {
            match self.expire(&account.account_id, as_of).await {
                Ok(count) => expired += count,
                Err(e) => warn!(
                    account_id = %account.account_id,
                    error = %e,
                    "Coupon expiry sweep failed for account"
                ),
            }
        }
        Ok(expired)
    }

    async fn mark_expired(&self, coupon: &Coupon, as_of: DateTime<Utc>) -> Result<bool> {
        let expired = self
            .ledger
            .expire_coupon(&coupon.account_id, &coupon.id, as_of)
            .await?;
        if let Some(coupon) = &expired {
            info!(
                account_id = %coupon.account_id,
                coupon_id = %coupon.id,
                forfeited_cents = coupon.remaining_cents,
                "Coupon expired"
            );
        }
        Ok(expired.is_some())
    }
}

fn coupon_description(coupon: &Coupon) -> String {
    match coupon.project_id {
        Some(project_id) => format!("Coupon {} for project {project_id}: {}", coupon.id, coupon.description),
        None => format!("Coupon {}: {}", coupon.id, coupon.description),
    }
}
