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

//! Adjustment catalogs: published pricing rules for uploads and payments.
//!
//! A catalog is a rule, not a transaction. Once published it only changes
//! through an administrative end date, and it is never deleted.

use crate::base::CatalogId;
use crate::money::PaymentAmount;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentOperator {
    /// Adds `operator_magnitude` units to the running amount.
    Add,
    /// Multiplies the running amount by `operator_magnitude`.
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exclusivity {
    #[default]
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetUserGroup {
    #[default]
    All,
    New,
    Existing,
}

/// Fields shared by every catalog variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBase {
    pub catalog_id: CatalogId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub operator: AdjustmentOperator,
    pub operator_magnitude: Decimal,
    #[serde(default)]
    pub priority: u32,
}

impl CatalogBase {
    /// Active window is `[start_date, end_date)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && self.end_date.is_none_or(|end| now < end)
    }

    /// Whether applying this rule lowers the amount.
    pub fn is_discount(&self) -> bool {
        match self.operator {
            AdjustmentOperator::Add => self.operator_magnitude.is_sign_negative(),
            AdjustmentOperator::Multiply => self.operator_magnitude < Decimal::ONE,
        }
    }
}

/// Eligibility rules of a single-use promo code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCodeRules {
    pub code_value: String,
    #[serde(default)]
    pub target_user_group: TargetUserGroup,
    pub max_uses: u32,
    #[serde(default)]
    pub minimum_payment_amount: PaymentAmount,
    pub maximum_discount_amount: PaymentAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjustmentCatalog {
    Upload {
        #[serde(flatten)]
        base: CatalogBase,
    },
    Payment {
        #[serde(flatten)]
        base: CatalogBase,
        #[serde(default)]
        exclusivity: Exclusivity,
    },
    SingleUseCodePayment {
        #[serde(flatten)]
        base: CatalogBase,
        #[serde(default)]
        exclusivity: Exclusivity,
        promo: PromoCodeRules,
    },
}

impl AdjustmentCatalog {
    pub fn base(&self) -> &CatalogBase {
        match self {
            Self::Upload { base } => base,
            Self::Payment { base, .. } => base,
            Self::SingleUseCodePayment { base, .. } => base,
        }
    }

    fn base_mut(&mut self) -> &mut CatalogBase {
        match self {
            Self::Upload { base } => base,
            Self::Payment { base, .. } => base,
            Self::SingleUseCodePayment { base, .. } => base,
        }
    }

    pub fn catalog_id(&self) -> &CatalogId {
        &self.base().catalog_id
    }

    pub fn priority(&self) -> u32 {
        self.base().priority
    }

    /// Upload catalogs always stack.
    pub fn exclusivity(&self) -> Exclusivity {
        match self {
            Self::Upload { .. } => Exclusivity::Inclusive,
            Self::Payment { exclusivity, .. } => *exclusivity,
            Self::SingleUseCodePayment { exclusivity, .. } => *exclusivity,
        }
    }

    pub fn promo(&self) -> Option<&PromoCodeRules> {
        match self {
            Self::SingleUseCodePayment { promo, .. } => Some(promo),
            _ => None,
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload { .. })
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.base().is_active(now)
    }
}

/// Read access to published catalogs.
pub trait CatalogStore: Send + Sync {
    /// Upload catalogs active at `now`, in priority order.
    fn upload_catalogs(&self, now: DateTime<Utc>) -> Vec<AdjustmentCatalog>;

    /// Non-promo payment catalogs active at `now`, in priority order.
    fn payment_catalogs(&self, now: DateTime<Utc>) -> Vec<AdjustmentCatalog>;

    /// Promo catalog with the given code, whether or not it is active.
    fn promo_catalog(&self, code: &str) -> Option<AdjustmentCatalog>;
}

/// Sorts catalogs by priority, then catalog id.
pub fn sort_by_priority(catalogs: &mut [AdjustmentCatalog]) {
    catalogs.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.catalog_id().cmp(b.catalog_id()))
    });
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    catalogs: DashMap<CatalogId, AdjustmentCatalog>,
    /// Promo code value to catalog id.
    codes: DashMap<String, CatalogId>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalogs(catalogs: impl IntoIterator<Item = AdjustmentCatalog>) -> Self {
        let store = Self::new();
        for catalog in catalogs {
            store.publish(catalog);
        }
        store
    }

    /// Publishes a catalog. An already published id is left untouched.
    ///
    /// Returns `false` if the id was already taken.
    pub fn publish(&self, catalog: AdjustmentCatalog) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.catalogs.entry(catalog.catalog_id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                if let Some(promo) = catalog.promo() {
                    self.codes
                        .insert(promo.code_value.clone(), catalog.catalog_id().clone());
                }
                log::info!("published adjustment catalog {}", catalog.catalog_id());
                entry.insert(catalog);
                true
            }
        }
    }

    /// Ends a catalog's active window. Returns `false` for unknown ids.
    pub fn set_end_date(&self, catalog_id: &CatalogId, end_date: DateTime<Utc>) -> bool {
        match self.catalogs.get_mut(catalog_id) {
            Some(mut catalog) => {
                catalog.base_mut().end_date = Some(end_date);
                true
            }
            None => false,
        }
    }

    fn active(
        &self,
        now: DateTime<Utc>,
        keep: impl Fn(&AdjustmentCatalog) -> bool,
    ) -> Vec<AdjustmentCatalog> {
        let mut found: Vec<AdjustmentCatalog> = self
            .catalogs
            .iter()
            .filter(|catalog| catalog.is_active(now) && keep(catalog.value()))
            .map(|catalog| catalog.value().clone())
            .collect();
        sort_by_priority(&mut found);
        found
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn upload_catalogs(&self, now: DateTime<Utc>) -> Vec<AdjustmentCatalog> {
        self.active(now, AdjustmentCatalog::is_upload)
    }

    fn payment_catalogs(&self, now: DateTime<Utc>) -> Vec<AdjustmentCatalog> {
        self.active(now, |catalog| {
            matches!(catalog, AdjustmentCatalog::Payment { .. })
        })
    }

    fn promo_catalog(&self, code: &str) -> Option<AdjustmentCatalog> {
        let catalog_id = self.codes.get(code)?.value().clone();
        self.catalogs.get(&catalog_id).map(|c| c.value().clone())
    }
}
