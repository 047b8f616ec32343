//! Rate table for converting metered usage into charges.
//!
//! All arithmetic is integer. A rate is expressed as `cents` per `per_units`
//! base units, so fractional-cent prices need no floating point. The cost of
//! a project's usage over a period is accumulated as an exact fraction and
//! rounded half-up exactly once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Hours in the 30-day month used to quote monthly storage rates.
pub const HOURS_PER_BILLING_MONTH: u64 = 720;

/// Bytes in a terabyte (decimal).
pub const BYTES_PER_TB: u64 = 1_000_000_000_000;

/// A billable resource reported by the metering service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Stored data, measured in byte-hours.
    StorageByteHours,
    /// Downloaded data, measured in bytes.
    EgressBytes,
    /// Stored objects, measured in object-hours.
    ObjectHours,
}

impl Resource {
    /// Stable name used in descriptions.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StorageByteHours => "storage",
            Self::EgressBytes => "egress",
            Self::ObjectHours => "objects",
        }
    }
}

/// Price of one resource: `cents` per `per_units` base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// Cents charged per `per_units`.
    pub cents: u64,
    /// Number of base units the price applies to.
    pub per_units: u64,
}

impl Rate {
    /// Create a rate.
    #[must_use]
    pub const fn new(cents: u64, per_units: u64) -> Self {
        Self { cents, per_units }
    }
}

/// Rates for every billable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    /// Rate per resource. Resources without a rate are free.
    pub rates: BTreeMap<Resource, Rate>,
}

impl Default for RateTable {
    fn default() -> Self {
        let mut rates = BTreeMap::new();

        // $4.00 per TB-month of storage
        rates.insert(
            Resource::StorageByteHours,
            Rate::new(400, BYTES_PER_TB * HOURS_PER_BILLING_MONTH),
        );
        // $7.00 per TB of egress
        rates.insert(Resource::EgressBytes, Rate::new(700, BYTES_PER_TB));
        // $0.88 per 100k object-months
        rates.insert(
            Resource::ObjectHours,
            Rate::new(88, 100_000 * HOURS_PER_BILLING_MONTH),
        );

        Self { rates }
    }
}

impl RateTable {
    /// Check every rate is usable.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if a rate applies to zero units.
    pub fn validate(&self) -> Result<()> {
        for (resource, rate) in &self.rates {
            if rate.per_units == 0 {
                return Err(LedgerError::Configuration(format!(
                    "rate for {} has per_units = 0",
                    resource.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Price aggregated quantities, rounding half-up once over the total.
    ///
    /// # Errors
    ///
    /// - `LedgerError::Configuration` if a rate is malformed.
    /// - `LedgerError::InvalidAmount` if the cost overflows.
    pub fn cost_cents<'a, I>(&self, quantities: I) -> Result<i64>
    where
        I: IntoIterator<Item = (&'a Resource, &'a u64)>,
    {
        let mut total = Fraction::ZERO;
        for (resource, quantity) in quantities {
            let Some(rate) = self.rates.get(resource) else {
                continue;
            };
            if rate.per_units == 0 {
                return Err(LedgerError::Configuration(format!(
                    "rate for {} has per_units = 0",
                    resource.as_str()
                )));
            }
            let numerator = u128::from(*quantity)
                .checked_mul(u128::from(rate.cents))
                .ok_or_else(overflow)?;
            total = total.checked_add(Fraction::new(numerator, u128::from(rate.per_units)))?;
        }

        i64::try_from(total.round_half_up()).map_err(|_| overflow())
    }
}

fn overflow() -> LedgerError {
    LedgerError::InvalidAmount("usage cost overflows".into())
}

/// Non-negative exact fraction used while summing costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fraction {
    numerator: u128,
    denominator: u128,
}

impl Fraction {
    const ZERO: Self = Self {
        numerator: 0,
        denominator: 1,
    };

    fn new(numerator: u128, denominator: u128) -> Self {
        let divisor = gcd(numerator, denominator).max(1);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    fn checked_add(self, other: Self) -> Result<Self> {
        let lcm = self.denominator / gcd(self.denominator, other.denominator)
            * other.denominator;
        let left = self
            .numerator
            .checked_mul(lcm / self.denominator)
            .ok_or_else(overflow)?;
        let right = other
            .numerator
            .checked_mul(lcm / other.denominator)
            .ok_or_else(overflow)?;
        Ok(Self::new(left.checked_add(right).ok_or_else(overflow)?, lcm))
    }

    fn round_half_up(self) -> u128 {
        let whole = self.numerator / self.denominator;
        let rest = self.numerator % self.denominator;
        if rest * 2 >= self.denominator {
            whole + 1
        } else {
            whole
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(Resource, Rate)]) -> RateTable {
        RateTable {
            rates: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn default_table_is_valid() {
        RateTable::default().validate().unwrap();
    }

    #[test]
    fn one_tb_month_of_storage_costs_four_dollars() {
        let rates = RateTable::default();
        let quantities = BTreeMap::from([(
            Resource::StorageByteHours,
            BYTES_PER_TB * HOURS_PER_BILLING_MONTH,
        )]);
        assert_eq!(rates.cost_cents(&quantities).unwrap(), 400);
    }

    #[test]
    fn rounds_half_up_once_over_total() {
        // 1 cent per 2 units on each resource: 1 unit each is 0.5 + 0.5 = 1 cent.
        // Rounding per resource first would give 1 + 1 = 2.
        let rates = table(&[
            (Resource::EgressBytes, Rate::new(1, 2)),
            (Resource::ObjectHours, Rate::new(1, 2)),
        ]);
        let quantities = BTreeMap::from([(Resource::EgressBytes, 1), (Resource::ObjectHours, 1)]);
        assert_eq!(rates.cost_cents(&quantities).unwrap(), 1);
    }

    #[test]
    fn exact_half_rounds_up() {
        let rates = table(&[(Resource::EgressBytes, Rate::new(1, 2))]);
        let quantities = BTreeMap::from([(Resource::EgressBytes, 3)]);
        assert_eq!(rates.cost_cents(&quantities).unwrap(), 2);
    }

    #[test]
    fn below_half_rounds_down() {
        let rates = table(&[(Resource::EgressBytes, Rate::new(1, 3))]);
        let quantities = BTreeMap::from([(Resource::EgressBytes, 1)]);
        assert_eq!(rates.cost_cents(&quantities).unwrap(), 0);
    }

    #[test]
    fn unpriced_resources_are_free() {
        let rates = table(&[(Resource::EgressBytes, Rate::new(700, BYTES_PER_TB))]);
        let quantities = BTreeMap::from([(Resource::StorageByteHours, u64::MAX)]);
        assert_eq!(rates.cost_cents(&quantities).unwrap(), 0);
    }

    #[test]
    fn zero_unit_rate_rejected() {
        let rates = table(&[(Resource::EgressBytes, Rate::new(1, 0))]);
        assert!(matches!(
            rates.validate(),
            Err(LedgerError::Configuration(_))
        ));
    }

    #[test]
    fn rate_table_json_shape() {
        let json = serde_json::to_value(RateTable::default()).unwrap();
        assert_eq!(json["rates"]["egress_bytes"]["cents"], 700);
    }
}
