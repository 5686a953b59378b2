// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-point money types.
//!
//! Credits are counted in whole winc, payments in whole minor units of their
//! currency (cents for `usd`). Neither type can hold a negative value; signed
//! changes are carried by [`SignedAmount`].
//!
//! # Rounding
//!
//! [`Winc::scale_by_rational`] and friends round half up: the result is
//! `floor(value * numerator / denominator + 1/2)`.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use winc_ledger_rs::Winc;
//!
//! let price = Winc::new(1_000);
//! assert_eq!(price.scale_by_decimal(dec!(0.45)).unwrap(), Winc::new(450));
//! assert_eq!(Winc::new(5).scale_by_rational(1, 2).unwrap(), Winc::new(3));
//! ```

use crate::error::{AmountError, LedgerError};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Integer amount the adjustment engine can fold over.
pub trait Amount: Copy + Ord + fmt::Debug + fmt::Display {
    fn units(self) -> u128;

    fn from_units(units: u128) -> Result<Self, AmountError>;
}

/// Credit amount in winston-credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Winc(u128);

/// Payment amount in the smallest unit of its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PaymentAmount(u64);

/// Signed change of an amount. Negative values are discounts or debits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SignedAmount(i128);

impl Winc {
    pub const ZERO: Self = Winc(0);

    pub const fn new(value: u128) -> Self {
        Winc(value)
    }

    pub const fn value(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountError> {
        self.0.checked_add(rhs.0).map(Winc).ok_or(AmountError::Overflow)
    }

    /// Fails with [`AmountError::Negative`] instead of wrapping below zero.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, AmountError> {
        self.0.checked_sub(rhs.0).map(Winc).ok_or(AmountError::Negative)
    }

    pub fn apply_delta(self, delta: SignedAmount) -> Result<Self, AmountError> {
        apply_delta(self.0, delta).map(Winc)
    }

    pub fn scale_by_rational(self, numerator: u128, denominator: u128) -> Result<Self, AmountError> {
        scale_units(self.0, numerator, denominator).map(Winc)
    }

    pub fn scale_by_decimal(self, factor: Decimal) -> Result<Self, AmountError> {
        let (numerator, denominator) = decimal_to_rational(factor)?;
        self.scale_by_rational(numerator, denominator)
    }

    /// Positive signed amount of the same magnitude.
    pub fn as_credit(self) -> Result<SignedAmount, AmountError> {
        SignedAmount::from_units(self.0, false)
    }

    /// Negative signed amount of the same magnitude.
    pub fn as_debit(self) -> Result<SignedAmount, AmountError> {
        SignedAmount::from_units(self.0, true)
    }
}

impl PaymentAmount {
    pub const ZERO: Self = PaymentAmount(0);

    pub const fn new(value: u64) -> Self {
        PaymentAmount(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(PaymentAmount)
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_sub(rhs.0)
            .map(PaymentAmount)
            .ok_or(AmountError::Negative)
    }

    pub fn scale_by_rational(self, numerator: u128, denominator: u128) -> Result<Self, AmountError> {
        Self::from_units(scale_units(u128::from(self.0), numerator, denominator)?)
    }

    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        if !value.fract().is_zero() {
            return Err(AmountError::Fractional);
        }
        value.trunc().to_u64().map(PaymentAmount).ok_or(AmountError::Overflow)
    }

    /// Validates an amount that arrived as a float (for instance from JSON).
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite);
        }
        let decimal = Decimal::from_f64_retain(value).ok_or(AmountError::Overflow)?;
        Self::from_decimal(decimal)
    }
}

/// Validates a requested payment amount: a positive whole number of minor units.
pub fn validate_payment_amount(raw: Decimal) -> Result<PaymentAmount, LedgerError> {
    match PaymentAmount::from_decimal(raw) {
        Ok(amount) if !amount.is_zero() => Ok(amount),
        _ => Err(LedgerError::InvalidPaymentAmount {
            amount: raw.to_string(),
        }),
    }
}

impl SignedAmount {
    pub const ZERO: Self = SignedAmount(0);

    pub const fn new(value: i128) -> Self {
        SignedAmount(value)
    }

    pub const fn value(self) -> i128 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn magnitude(self) -> u128 {
        self.0.unsigned_abs()
    }

    fn from_units(units: u128, negative: bool) -> Result<Self, AmountError> {
        let value = i128::try_from(units).map_err(|_| AmountError::Overflow)?;
        Ok(SignedAmount(if negative { -value } else { value }))
    }

    /// The change that takes `from` to `to`.
    pub fn between(from: u128, to: u128) -> Result<Self, AmountError> {
        if to >= from {
            Self::from_units(to - from, false)
        } else {
            Self::from_units(from - to, true)
        }
    }
}

impl Amount for Winc {
    fn units(self) -> u128 {
        self.0
    }

    fn from_units(units: u128) -> Result<Self, AmountError> {
        Ok(Winc(units))
    }
}

impl Amount for PaymentAmount {
    fn units(self) -> u128 {
        u128::from(self.0)
    }

    fn from_units(units: u128) -> Result<Self, AmountError> {
        u64::try_from(units)
            .map(PaymentAmount)
            .map_err(|_| AmountError::Overflow)
    }
}

fn apply_delta(units: u128, delta: SignedAmount) -> Result<u128, AmountError> {
    if delta.is_negative() {
        units
            .checked_sub(delta.magnitude())
            .ok_or(AmountError::Negative)
    } else {
        units
            .checked_add(delta.magnitude())
            .ok_or(AmountError::Overflow)
    }
}

/// `round_half_up(units * numerator / denominator)`.
pub(crate) fn scale_units(units: u128, numerator: u128, denominator: u128) -> Result<u128, AmountError> {
    if denominator == 0 {
        return Err(AmountError::Overflow);
    }
    let product = units.checked_mul(numerator).ok_or(AmountError::Overflow)?;
    let quotient = product / denominator;
    let remainder = product % denominator;
    // remainder >= denominator / 2, without overflowing on 2 * remainder
    if remainder >= denominator - remainder {
        quotient.checked_add(1).ok_or(AmountError::Overflow)
    } else {
        Ok(quotient)
    }
}

/// Splits a non-negative decimal into `mantissa / 10^scale`.
pub(crate) fn decimal_to_rational(value: Decimal) -> Result<(u128, u128), AmountError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(AmountError::Negative);
    }
    let numerator = u128::try_from(value.mantissa()).map_err(|_| AmountError::Negative)?;
    let denominator = 10u128
        .checked_pow(value.scale())
        .ok_or(AmountError::Overflow)?;
    Ok((numerator, denominator))
}

fn parse_unsigned(s: &str) -> Result<u128, AmountError> {
    let s = s.trim();
    if let Ok(value) = s.parse::<u128>() {
        return Ok(value);
    }
    let decimal = Decimal::from_str(s).map_err(|_| AmountError::Parse)?;
    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(AmountError::Negative);
    }
    if !decimal.fract().is_zero() {
        return Err(AmountError::Fractional);
    }
    decimal.trunc().to_u128().ok_or(AmountError::Overflow)
}

fn parse_signed(s: &str) -> Result<i128, AmountError> {
    let s = s.trim();
    if let Ok(value) = s.parse::<i128>() {
        return Ok(value);
    }
    let decimal = Decimal::from_str(s).map_err(|_| AmountError::Parse)?;
    if !decimal.fract().is_zero() {
        return Err(AmountError::Fractional);
    }
    decimal.trunc().to_i128().ok_or(AmountError::Overflow)
}

impl FromStr for Winc {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_unsigned(s).map(Winc)
    }
}

impl FromStr for PaymentAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_unsigned(s).and_then(Self::from_units)
    }
}

impl FromStr for SignedAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_signed(s).map(SignedAmount)
    }
}

impl fmt::Display for Winc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PaymentAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted wire shapes: the persisted decimal string, or a plain integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl RawAmount {
    fn into_text(self) -> String {
        match self {
            RawAmount::Text(text) => text,
            RawAmount::Unsigned(value) => value.to_string(),
            RawAmount::Signed(value) => value.to_string(),
        }
    }
}

macro_rules! string_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = RawAmount::deserialize(deserializer)?;
                raw.into_text().parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Winc);
string_serde!(PaymentAmount);
string_serde!(SignedAmount);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn subtraction_rejects_negative_results() {
        assert_eq!(Winc::new(10).checked_sub(Winc::new(4)), Ok(Winc::new(6)));
        assert_eq!(
            Winc::new(10).checked_sub(Winc::new(11)),
            Err(AmountError::Negative)
        );
        assert_eq!(
            PaymentAmount::new(1).checked_sub(PaymentAmount::new(2)),
            Err(AmountError::Negative)
        );
    }

    #[test]
    fn addition_detects_overflow() {
        assert_eq!(
            Winc::new(u128::MAX).checked_add(Winc::new(1)),
            Err(AmountError::Overflow)
        );
        assert_eq!(
            PaymentAmount::new(u64::MAX).checked_add(PaymentAmount::new(1)),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn scaling_rounds_half_up() {
        assert_eq!(Winc::new(5).scale_by_rational(1, 2), Ok(Winc::new(3)));
        assert_eq!(Winc::new(7).scale_by_rational(1, 2), Ok(Winc::new(4)));
        assert_eq!(Winc::new(9).scale_by_rational(1, 3), Ok(Winc::new(3)));
        assert_eq!(Winc::new(10).scale_by_rational(1, 3), Ok(Winc::new(3)));
        assert_eq!(Winc::new(11).scale_by_rational(1, 3), Ok(Winc::new(4)));
        assert_eq!(
            Winc::new(9500).scale_by_decimal(dec!(0.9)),
            Ok(Winc::new(8550))
        );
        assert_eq!(
            PaymentAmount::new(999).scale_by_rational(1, 2),
            Ok(PaymentAmount::new(500))
        );
    }

    #[test]
    fn scaling_rejects_zero_denominator_and_negative_factor() {
        assert_eq!(
            Winc::new(1).scale_by_rational(1, 0),
            Err(AmountError::Overflow)
        );
        assert_eq!(
            Winc::new(1).scale_by_decimal(dec!(-0.5)),
            Err(AmountError::Negative)
        );
    }

    #[test]
    fn payment_amount_validation() {
        assert_eq!(
            PaymentAmount::from_decimal(dec!(1000)),
            Ok(PaymentAmount::new(1000))
        );
        assert_eq!(
            PaymentAmount::from_decimal(dec!(10.5)),
            Err(AmountError::Fractional)
        );
        assert_eq!(
            PaymentAmount::from_decimal(dec!(-1)),
            Err(AmountError::Negative)
        );
        assert_eq!(PaymentAmount::from_f64(f64::NAN), Err(AmountError::NotFinite));
        assert_eq!(
            PaymentAmount::from_f64(f64::INFINITY),
            Err(AmountError::NotFinite)
        );
        assert_eq!(PaymentAmount::from_f64(250.0), Ok(PaymentAmount::new(250)));
    }

    #[test]
    fn validate_payment_amount_requires_positive_integer() {
        assert_eq!(validate_payment_amount(dec!(500)), Ok(PaymentAmount::new(500)));
        assert!(matches!(
            validate_payment_amount(dec!(0)),
            Err(LedgerError::InvalidPaymentAmount { .. })
        ));
        assert!(matches!(
            validate_payment_amount(dec!(12.34)),
            Err(LedgerError::InvalidPaymentAmount { .. })
        ));
    }

    #[test]
    fn persisted_string_representation() {
        let big = Winc::new(340_282_366_920_938_463_463_374_607_431_768_211_455);
        assert_eq!(big.to_string().parse::<Winc>(), Ok(big));
        assert_eq!("100.000".parse::<Winc>(), Ok(Winc::new(100)));
        assert_eq!("1.5".parse::<Winc>(), Err(AmountError::Fractional));
        assert_eq!("-3".parse::<Winc>(), Err(AmountError::Negative));
        assert_eq!("abc".parse::<Winc>(), Err(AmountError::Parse));
        assert_eq!("-42".parse::<SignedAmount>(), Ok(SignedAmount::new(-42)));
    }

    #[test]
    fn serde_uses_strings() {
        let json = serde_json::to_string(&Winc::new(123)).unwrap();
        assert_eq!(json, "\"123\"");
        let parsed: Winc = serde_json::from_str("\"456\"").unwrap();
        assert_eq!(parsed, Winc::new(456));
        let from_number: PaymentAmount = serde_json::from_str("789").unwrap();
        assert_eq!(from_number, PaymentAmount::new(789));
        assert!(serde_json::from_str::<Winc>("-1").is_err());
        let delta: SignedAmount = serde_json::from_str("\"-500\"").unwrap();
        assert_eq!(delta, SignedAmount::new(-500));
    }

    #[test]
    fn signed_amount_between() {
        assert_eq!(SignedAmount::between(100, 80), Ok(SignedAmount::new(-20)));
        assert_eq!(SignedAmount::between(80, 100), Ok(SignedAmount::new(20)));
        assert_eq!(Winc::new(30).as_debit(), Ok(SignedAmount::new(-30)));
        assert_eq!(
            Winc::new(30).apply_delta(SignedAmount::new(-31)),
            Err(AmountError::Negative)
        );
    }
}
