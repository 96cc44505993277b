use crate::error::CommerceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A non-negative monetary value in an order's currency.
///
/// Wraps `rust_decimal::Decimal` so ledger arithmetic (totals, captured and
/// refunded sums) cannot silently go below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Money(Decimal);

/// A strictly positive amount moved by a payment or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, CommerceError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(CommerceError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = CommerceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, CommerceError> {
        if value >= Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(CommerceError::ValidationError(
                "Money cannot be negative".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Rounds to cents, half away from zero.
    pub fn round(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }

    /// Multiplies by a non-negative factor, e.g. a quantity or a rate.
    pub fn scale(self, factor: Decimal) -> Self {
        Self((self.0 * factor).max(Decimal::ZERO))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// ISO 4217 currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, CommerceError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(CommerceError::ValidationError(format!(
                "Invalid currency code: {code}"
            )))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = CommerceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(10.0)).unwrap();
        let b = Money::new(dec!(5.0)).unwrap();
        assert_eq!(a + b, Money::new(dec!(15.0)).unwrap());
        assert_eq!(a - b, Money::new(dec!(5.0)).unwrap());
        assert_eq!(b - a, Money::ZERO);
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(CommerceError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(CommerceError::ValidationError(_))
        ));
        assert!(Money::new(dec!(-0.01)).is_err());
    }

    #[test]
    fn test_money_rounding() {
        assert_eq!(
            Money::new(dec!(3.335)).unwrap().round(),
            Money::new(dec!(3.34)).unwrap()
        );
        assert_eq!(
            Money::new(dec!(19.99)).unwrap().scale(dec!(3)),
            Money::new(dec!(59.97)).unwrap()
        );
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::new("usd").unwrap().code(), "USD");
        assert!(Currency::new("dollars").is_err());
        let parsed: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(parsed.code(), "EUR");
    }
}
