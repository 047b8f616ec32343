//! Promotional coupon types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, CouponId, ProjectId};

/// A time-bounded promotional credit grant.
///
/// A coupon is valid up to and including `issued_at + duration`. Past that
/// instant it produces no further credit, whatever amount is left ("use it
/// or lose it").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Coupon identifier.
    pub id: CouponId,

    /// Account the coupon was granted to.
    pub account_id: AccountId,

    /// Project the grant was issued for, if any.
    pub project_id: Option<ProjectId>,

    /// Total granted amount in cents.
    pub amount_cents: i64,

    /// Amount not yet credited to the ledger.
    pub remaining_cents: i64,

    /// Validity window measured from issuance.
    #[serde(with = "duration_seconds")]
    pub duration: Duration,

    /// When the coupon was issued.
    pub issued_at: DateTime<Utc>,

    /// Human-readable description.
    pub description: String,

    /// Redemption state.
    pub status: CouponStatus,
}

impl Coupon {
    /// Issue a new active coupon.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        project_id: Option<ProjectId>,
        amount_cents: i64,
        duration: Duration,
        description: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CouponId::generate(),
            account_id,
            project_id,
            amount_cents,
            remaining_cents: amount_cents,
            duration,
            issued_at,
            description: description.into(),
            status: CouponStatus::Active,
        }
    }

    /// Last instant at which the coupon still grants credit.
    ///
    /// Saturates at the latest representable time for windows that reach
    /// past it.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `as_of` is past the validity window.
    #[must_use]
    pub fn is_expired_at(&self, as_of: DateTime<Utc>) -> bool {
        as_of > self.expires_at()
    }

    /// Whether the coupon can still produce credit at `as_of`.
    #[must_use]
    pub fn is_redeemable_at(&self, as_of: DateTime<Utc>) -> bool {
        self.status == CouponStatus::Active
            && self.remaining_cents > 0
            && as_of >= self.issued_at
            && !self.is_expired_at(as_of)
    }

    /// Record that `credited_cents` reached the ledger.
    pub fn consume(&mut self, credited_cents: i64) {
        self.remaining_cents = (self.remaining_cents - credited_cents).max(0);
        if self.remaining_cents == 0 {
            self.status = CouponStatus::Exhausted;
        }
    }
}

/// Redemption state of a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    /// Within its window with amount left.
    Active,
    /// Past its expiry; any remaining amount was forfeited.
    Expired,
    /// Fully credited.
    Exhausted,
}

mod duration_seconds {
    use chrono::Duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Duration::try_seconds(seconds)
            .ok_or_else(|| D::Error::custom(format!("duration of {seconds}s out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(amount: i64, days: i64) -> Coupon {
        Coupon::new(
            AccountId::generate(),
            None,
            amount,
            Duration::days(days),
            "Welcome",
            Utc::now(),
        )
    }

    #[test]
    fn expiry_is_issuance_plus_duration() {
        let c = coupon(1000, 30);
        assert_eq!(c.expires_at(), c.issued_at + Duration::days(30));
        assert!(c.is_redeemable_at(c.issued_at + Duration::days(29)));
        assert!(!c.is_redeemable_at(c.issued_at + Duration::days(31)));
    }

    #[test]
    fn expiry_instant_is_still_valid() {
        let c = coupon(1000, 30);
        assert!(!c.is_expired_at(c.expires_at()));
        assert!(c.is_redeemable_at(c.expires_at()));
        assert!(c.is_expired_at(c.expires_at() + Duration::seconds(1)));
    }

    #[test]
    fn oversized_window_saturates() {
        let mut c = coupon(1000, 30);
        c.duration = Duration::MAX;
        assert_eq!(c.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(c.is_redeemable_at(Utc::now()));
    }

    #[test]
    fn out_of_range_duration_is_rejected_on_read() {
        let c = coupon(500, 1);
        let mut json = serde_json::to_value(&c).unwrap();
        json["duration"] = serde_json::json!(i64::MAX);
        assert!(serde_json::from_value::<Coupon>(json).is_err());
    }

    #[test]
    fn consume_exhausts_coupon() {
        let mut c = coupon(1000, 30);
        c.consume(400);
        assert_eq!(c.remaining_cents, 600);
        assert_eq!(c.status, CouponStatus::Active);

        c.consume(600);
        assert_eq!(c.remaining_cents, 0);
        assert_eq!(c.status, CouponStatus::Exhausted);
        assert!(!c.is_redeemable_at(c.issued_at));
    }

    #[test]
    fn duration_serializes_as_seconds() {
        let c = coupon(500, 1);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["duration"], 86_400);

        let back: Coupon = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
