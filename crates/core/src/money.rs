//! Fixed-point monetary amounts.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// A monetary amount in the store currency, two decimal places.
///
/// Amounts are never floats; arithmetic is exact and checked, and rounding
/// only happens when a value enters the system (`Money::new`, parsing and
/// deserialization).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "Decimal", from = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(2))
    }

    /// Build from an integer amount of cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Reject negative inputs (prices, shipping, discounts).
    pub fn non_negative(self, field: &str) -> Result<Self, DomainError> {
        if self.is_negative() {
            Err(DomainError::validation(format!("{field} must not be negative")))
        } else {
            Ok(self)
        }
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(Decimal::from(quantity)).map(Money)
    }

    /// Sum of amounts, `None` once the running total leaves `Decimal` range.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl ValueObject for Money {}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s)
            .map_err(|e| DomainError::validation(format!("invalid amount '{s}': {e}")))?;
        Ok(Money::new(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parsing_rounds_to_cents() {
        let m: Money = "10.005".parse().unwrap();
        assert_eq!(m.to_string(), "10.00");
    }

    #[test]
    fn negative_amount_fails_validation() {
        let err = Money::from_cents(-1).non_negative("shipping").unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("shipping") => {}
            _ => panic!("Expected Validation error for negative amount"),
        }
    }

    #[test]
    fn deserialized_amounts_are_rounded_to_cents() {
        let m: Money = serde_json::from_str("\"12.34567\"").unwrap();
        assert_eq!(m.amount().scale(), 2);
        assert_eq!(m, Money::from_cents(1235));
        assert_eq!(serde_json::to_value(m).unwrap(), serde_json::json!("12.35"));
    }

    #[test]
    fn overflow_is_reported_not_panicked() {
        let max = Money::new(Decimal::MAX);
        assert_eq!(max.checked_mul(2), None);
        assert_eq!(max.checked_add(Money::from_cents(100)), None);
        assert_eq!(Money::checked_sum([max, max]), None);
        assert_eq!(
            Money::checked_sum([Money::from_cents(150), Money::from_cents(250)]),
            Some(Money::from_cents(400))
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn line_totals_are_exact(cents in 0i64..1_000_000, qty in 1u32..100) {
            let unit = Money::from_cents(cents);
            let total = unit.checked_mul(qty).unwrap();
            prop_assert_eq!(total, Money::from_cents(cents * i64::from(qty)));
        }
    }
}
