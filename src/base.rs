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

//! Core identifier types for users, quotes, receipts, reservations and catalogs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Opaque user identity, usually a public wallet address.
    UserAddress
);

string_id!(
    /// Identifier of a top-up quote. Stays the same as the quote becomes a
    /// receipt and, eventually, a chargeback.
    TopUpQuoteId
);

string_id!(PaymentReceiptId);

string_id!(ChargebackReceiptId);

string_id!(
    /// Identifier of a balance reservation.
    ReservationId
);

string_id!(
    /// Identifier of an uploaded data item. Used as the idempotency key for
    /// reservations.
    DataItemId
);

string_id!(CatalogId);

impl TopUpQuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ReservationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Currency code of a payment, always stored lowercase (`usd`, `eur`, `ar`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyType(String);

impl CurrencyType {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CurrencyType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CurrencyType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<CurrencyType> for String {
    fn from(value: CurrencyType) -> Self {
        value.0
    }
}

/// Kind of address a user is identified by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAddressType {
    #[default]
    Arweave,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for UserAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arweave => f.write_str("arweave"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

impl From<&str> for UserAddressType {
    fn from(value: &str) -> Self {
        match value {
            "arweave" => Self::Arweave,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Provider that collects the payment for a top-up quote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    #[default]
    Stripe,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stripe => f.write_str("stripe"),
            Self::Other(provider) => f.write_str(provider),
        }
    }
}

impl From<&str> for PaymentProvider {
    fn from(value: &str) -> Self {
        match value {
            "stripe" => Self::Stripe,
            other => Self::Other(other.to_string()),
        }
    }
}
