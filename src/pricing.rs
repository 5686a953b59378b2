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

//! Conversion of payment amounts into credits.

use crate::base::CurrencyType;
use crate::config::EngineConfig;
use crate::error::LedgerError;
use crate::money::{PaymentAmount, Winc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Quotes how many credits a payment buys.
pub trait WincOracle: Send + Sync {
    fn winc_for_payment(
        &self,
        amount: PaymentAmount,
        currency: &CurrencyType,
    ) -> Result<Winc, LedgerError>;
}

/// Fixed credits-per-unit table.
#[derive(Debug, Clone, Default)]
pub struct FixedRateOracle {
    rates: BTreeMap<CurrencyType, Decimal>,
}

impl FixedRateOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, currency: impl Into<CurrencyType>, winc_per_unit: Decimal) -> Self {
        self.rates.insert(currency.into(), winc_per_unit);
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        config
            .currencies
            .iter()
            .fold(Self::new(), |oracle, (currency, settings)| {
                oracle.with_rate(CurrencyType::new(currency), settings.winc_per_unit)
            })
    }
}

impl WincOracle for FixedRateOracle {
    fn winc_for_payment(
        &self,
        amount: PaymentAmount,
        currency: &CurrencyType,
    ) -> Result<Winc, LedgerError> {
        let rate = self
            .rates
            .get(currency)
            .ok_or_else(|| LedgerError::UnsupportedCurrencyType(currency.clone()))?;
        Winc::new(u128::from(amount.value()))
            .scale_by_decimal(*rate)
            .map_err(|_| LedgerError::ArithmeticOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_with_half_up_rounding() {
        let oracle = FixedRateOracle::new()
            .with_rate("usd", dec!(1000))
            .with_rate("ar", dec!(0.5));

        assert_eq!(
            oracle.winc_for_payment(PaymentAmount::new(500), &CurrencyType::new("usd")),
            Ok(Winc::new(500_000))
        );
        assert_eq!(
            oracle.winc_for_payment(PaymentAmount::new(3), &CurrencyType::new("ar")),
            Ok(Winc::new(2))
        );
    }

    #[test]
    fn unknown_currency_is_unsupported() {
        let oracle = FixedRateOracle::new();
        assert_eq!(
            oracle.winc_for_payment(PaymentAmount::new(1), &CurrencyType::new("eur")),
            Err(LedgerError::UnsupportedCurrencyType(CurrencyType::new("eur")))
        );
    }

    #[test]
    fn reads_rates_from_config() {
        let oracle = FixedRateOracle::from_config(&EngineConfig::default());
        assert_eq!(
            oracle.winc_for_payment(PaymentAmount::new(1), &CurrencyType::new("usd")),
            Ok(Winc::new(10_000_000))
        );
    }
}
