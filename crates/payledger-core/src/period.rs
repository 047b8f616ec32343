//! Billing periods.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// A half-open billing interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Create a period from explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` if `end` is not after `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(LedgerError::InvalidInput(format!(
                "billing period end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The calendar month (UTC) containing `at`.
    #[must_use]
    pub fn month_of(at: DateTime<Utc>) -> Self {
        let start = month_start(at.year(), at.month());
        let end = if at.month() == 12 {
            month_start(at.year() + 1, 1)
        } else {
            month_start(at.year(), at.month() + 1)
        };
        Self { start, end }
    }

    /// The month immediately before this period's start month.
    #[must_use]
    pub fn previous_month(&self) -> Self {
        Self::month_of(self.start - Duration::seconds(1))
    }

    /// Whether `at` falls inside the period.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Clamp `at` into the period so entries recorded late still land inside it.
    #[must_use]
    pub fn clamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if at < self.start {
            self.start
        } else if at >= self.end {
            self.end - Duration::milliseconds(1)
        } else {
            at
        }
    }

    /// Stable textual key used inside idempotency keys.
    ///
    /// Calendar months render as `YYYY-MM`; any other interval renders as
    /// `<start-unix>-<end-unix>`.
    #[must_use]
    pub fn key(&self) -> String {
        if Self::month_of(self.start) == *self {
            format!("{:04}-{:02}", self.start.year(), self.start.month())
        } else {
            format!("{}-{}", self.start.timestamp(), self.end.timestamp())
        }
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // The first day of a month always exists, so `single` never yields `None`
    // for valid month numbers; fall back to the Unix epoch otherwise.
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
