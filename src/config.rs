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

//! Engine settings.
//!
//! Settings come from an optional TOML file layered with `LEDGER__*`
//! environment variables (`LEDGER__QUOTE_TTL_SECS=900`). Everything has a
//! default, so an empty configuration yields a working engine for `usd`.
//!
//! Amounts and decimals are written as strings:
//!
//! ```toml
//! quote_ttl_secs = 3600
//! winc_floor = "0"
//!
//! [currencies.usd]
//! kind = "fiat"
//! minimum = "500"
//! maximum = "1000000"
//! winc_per_unit = "10000000"
//! ```

use crate::base::CurrencyType;
use crate::catalog::AdjustmentCatalog;
use crate::money::{PaymentAmount, Winc};
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyKind {
    Fiat,
    Crypto,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrencySettings {
    pub kind: CurrencyKind,
    /// Smallest accepted payment, in minor units.
    pub minimum: PaymentAmount,
    /// Largest accepted payment, in minor units.
    pub maximum: PaymentAmount,
    /// Credits granted per minor unit.
    pub winc_per_unit: Decimal,
    /// Wallet that crypto payments must be sent to.
    #[serde(default)]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a top-up quote stays payable.
    pub quote_ttl_secs: i64,
    /// Accounts younger than this count as "new" for promo codes.
    pub new_user_threshold_days: i64,
    /// Create unknown users on their first payment.
    pub auto_provision_users: bool,
    /// Upload discounts never go below this.
    pub winc_floor: Winc,
    /// Payment discounts never go below this.
    pub payment_floor: PaymentAmount,
    pub currencies: BTreeMap<String, CurrencySettings>,
    /// Senders whose crypto payments are refused.
    pub excluded_addresses: Vec<String>,
    /// Catalogs published when the engine starts.
    pub catalogs: Vec<AdjustmentCatalog>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut currencies = BTreeMap::new();
        currencies.insert(
            "usd".to_string(),
            CurrencySettings {
                kind: CurrencyKind::Fiat,
                minimum: PaymentAmount::new(500),
                maximum: PaymentAmount::new(1_000_000),
                winc_per_unit: dec!(10_000_000),
                wallet_address: None,
            },
        );
        Self {
            quote_ttl_secs: 3_600,
            new_user_threshold_days: 30,
            auto_provision_users: true,
            winc_floor: Winc::ZERO,
            payment_floor: PaymentAmount::ZERO,
            currencies,
            excluded_addresses: Vec::new(),
            catalogs: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads settings from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("LEDGER").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects durations the engine cannot represent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quote_ttl_secs <= 0 || Duration::try_seconds(self.quote_ttl_secs).is_none() {
            return Err(ConfigError::Message(format!(
                "quote_ttl_secs must be a positive number of seconds, got {}",
                self.quote_ttl_secs
            )));
        }
        if self.new_user_threshold_days < 0
            || Duration::try_days(self.new_user_threshold_days).is_none()
        {
            return Err(ConfigError::Message(format!(
                "new_user_threshold_days must be a non-negative number of days, got {}",
                self.new_user_threshold_days
            )));
        }
        Ok(())
    }

    pub fn currency(&self, currency: &CurrencyType) -> Option<&CurrencySettings> {
        self.currencies.get(currency.as_str())
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded_addresses.iter().any(|excluded| excluded == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_support_usd() {
        let config = EngineConfig::default();
        let usd = config.currency(&CurrencyType::new("USD")).unwrap();
        assert_eq!(usd.kind, CurrencyKind::Fiat);
        assert_eq!(usd.minimum, PaymentAmount::new(500));
        assert!(config.currency(&CurrencyType::new("eur")).is_none());
        assert!(config.auto_provision_users);
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = r#"
            quote_ttl_secs = 60
            excluded_addresses = ["bad-wallet"]

            [currencies.ar]
            kind = "crypto"
            minimum = "1"
            maximum = "1000000000000000"
            winc_per_unit = "1"
            wallet_address = "our-wallet"

            [[catalogs]]
            kind = "upload"
            catalog_id = "fwd"
            name = "FWD Research"
            start_date = "2024-01-01T00:00:00Z"
            operator = "multiply"
            operator_magnitude = "0.766"
            priority = 1
        "#;
        let config: EngineConfig = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.quote_ttl_secs, 60);
        assert_eq!(config.new_user_threshold_days, 30);
        assert!(config.is_excluded("bad-wallet"));
        let ar = config.currency(&CurrencyType::new("ar")).unwrap();
        assert_eq!(ar.kind, CurrencyKind::Crypto);
        assert_eq!(ar.wallet_address.as_deref(), Some("our-wallet"));
        assert_eq!(config.catalogs.len(), 1);
        assert_eq!(config.catalogs[0].base().operator_magnitude, dec!(0.766));
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let config = EngineConfig {
            quote_ttl_secs: i64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Message(_))));

        let config = EngineConfig {
            quote_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            new_user_threshold_days: -1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }
}
