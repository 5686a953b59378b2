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

//! Promo code validation and redemption tracking.

use crate::base::{CurrencyType, TopUpQuoteId, UserAddress};
use crate::catalog::{AdjustmentCatalog, CatalogStore, TargetUserGroup};
use crate::error::LedgerError;
use crate::ledger::User;
use crate::money::PaymentAmount;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A promo catalog that passed every eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPromo {
    pub code: String,
    pub catalog: AdjustmentCatalog,
}

/// Who is paying, how much, and when.
#[derive(Debug, Clone, Copy)]
pub struct PromoContext<'a> {
    pub address: &'a UserAddress,
    /// `None` for an address with no account yet.
    pub user: Option<&'a User>,
    pub payment_amount: PaymentAmount,
    pub currency: &'a CurrencyType,
    pub now: DateTime<Utc>,
}

pub struct PromoCodeValidator {
    catalogs: Arc<dyn CatalogStore>,
    new_user_threshold: Duration,
}

impl PromoCodeValidator {
    /// A threshold too large to represent treats every account as new.
    pub fn new(catalogs: Arc<dyn CatalogStore>, new_user_threshold_days: i64) -> Self {
        Self {
            catalogs,
            new_user_threshold: Duration::try_days(new_user_threshold_days).unwrap_or(Duration::MAX),
        }
    }

    /// Checks `code` for the payment described by `ctx`. `redemptions` is
    /// the number of live quotes already carrying the code.
    ///
    /// Checks run in a fixed order and stop at the first failure: existence,
    /// active window, usage count, user group, minimum payment.
    pub fn validate(
        &self,
        code: &str,
        ctx: &PromoContext<'_>,
        redemptions: usize,
    ) -> Result<ValidatedPromo, LedgerError> {
        let PromoContext {
            address,
            user,
            payment_amount: candidate,
            currency,
            now,
        } = *ctx;
        let not_found = || LedgerError::PromoCodeNotFound(code.to_string());

        let catalog = self.catalogs.promo_catalog(code).ok_or_else(not_found)?;
        let rules = catalog.promo().ok_or_else(not_found)?;
        let base = catalog.base();

        if now < base.start_date {
            return Err(not_found());
        }
        if let Some(end_date) = base.end_date
            && now >= end_date
        {
            return Err(LedgerError::PromoCodeExpired {
                code: code.to_string(),
                end_date: end_date.to_rfc3339(),
            });
        }

        if redemptions >= rules.max_uses as usize {
            return Err(LedgerError::PromoCodeExceedsMaxUses {
                code: code.to_string(),
                max_uses: rules.max_uses,
            });
        }

        if !self.in_target_group(rules.target_user_group, user, now) {
            return Err(LedgerError::UserIneligibleForPromoCode {
                user: address.clone(),
                code: code.to_string(),
            });
        }

        if candidate < rules.minimum_payment_amount {
            return Err(LedgerError::PaymentAmountTooSmallForPromoCode {
                code: code.to_string(),
                minimum: rules.minimum_payment_amount.value(),
            });
        }

        log::debug!("promo code {code} accepted for {address} paying {candidate} {currency}");
        Ok(ValidatedPromo {
            code: code.to_string(),
            catalog,
        })
    }

    fn in_target_group(
        &self,
        group: TargetUserGroup,
        user: Option<&User>,
        now: DateTime<Utc>,
    ) -> bool {
        let is_new = user.is_none_or(|user| now - user.user_creation_date < self.new_user_threshold);
        match group {
            TargetUserGroup::All => true,
            TargetUserGroup::New => is_new,
            TargetUserGroup::Existing => !is_new,
        }
    }
}

/// Quotes that redeemed each promo code.
///
/// Every code has its own mutex. Holding it serializes validation and quote
/// creation for that code, so `max_uses` cannot be exceeded by racing quotes.
#[derive(Debug, Default)]
pub struct PromoRedemptions {
    codes: DashMap<String, Arc<Mutex<Vec<TopUpQuoteId>>>>,
}

/// Redemption list of one code, not yet locked.
#[derive(Debug, Clone)]
pub struct RedemptionHandle {
    code: String,
    quotes: Arc<Mutex<Vec<TopUpQuoteId>>>,
}

impl RedemptionHandle {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<TopUpQuoteId>> {
        self.quotes.lock()
    }
}

impl PromoRedemptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for `codes`, deduplicated and sorted. Locking them in the
    /// returned order keeps concurrent multi-code quotes deadlock free.
    pub fn handles(&self, codes: &[String]) -> Vec<RedemptionHandle> {
        let mut codes: Vec<&String> = codes.iter().collect();
        codes.sort();
        codes.dedup();
        codes
            .into_iter()
            .map(|code| RedemptionHandle {
                code: code.clone(),
                quotes: self.codes.entry(code.clone()).or_default().value().clone(),
            })
            .collect()
    }

    /// Number of quotes recorded against `code`.
    pub fn count(&self, code: &str) -> usize {
        self.codes
            .get(code)
            .map(|quotes| quotes.lock().len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{CatalogId, UserAddressType};
    use crate::catalog::{AdjustmentOperator, CatalogBase, Exclusivity, InMemoryCatalogStore, PromoCodeRules};
    use crate::ledger::PromotionalInfo;
    use crate::money::Winc;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
    }

    fn promo(code: &str, group: TargetUserGroup, end: Option<DateTime<Utc>>) -> AdjustmentCatalog {
        AdjustmentCatalog::SingleUseCodePayment {
            base: CatalogBase {
                catalog_id: CatalogId::from(format!("promo-{code}")),
                name: code.to_string(),
                description: String::new(),
                start_date: t(5),
                end_date: end,
                operator: AdjustmentOperator::Multiply,
                operator_magnitude: dec!(0.8),
                priority: 10,
            },
            exclusivity: Exclusivity::Inclusive,
            promo: PromoCodeRules {
                code_value: code.to_string(),
                target_user_group: group,
                max_uses: 2,
                minimum_payment_amount: PaymentAmount::new(1_000),
                maximum_discount_amount: PaymentAmount::ZERO,
            },
        }
    }

    fn validator(catalogs: Vec<AdjustmentCatalog>) -> PromoCodeValidator {
        PromoCodeValidator::new(Arc::new(InMemoryCatalogStore::with_catalogs(catalogs)), 30)
    }

    fn user(created: DateTime<Utc>) -> User {
        User {
            user_address: UserAddress::from("alice"),
            user_address_type: UserAddressType::Arweave,
            user_creation_date: created,
            winston_credit_balance: Winc::ZERO,
            promotional_info: PromotionalInfo::new(),
        }
    }

    fn check(
        validator: &PromoCodeValidator,
        code: &str,
        user: Option<&User>,
        amount: u64,
        now: DateTime<Utc>,
        redemptions: usize,
    ) -> Result<ValidatedPromo, LedgerError> {
        let address = UserAddress::from("alice");
        let currency = CurrencyType::new("usd");
        let ctx = PromoContext {
            address: &address,
            user,
            payment_amount: PaymentAmount::new(amount),
            currency: &currency,
            now,
        };
        validator.validate(code, &ctx, redemptions)
    }

    #[test]
    fn accepts_eligible_payment() {
        let validator = validator(vec![promo("SAVE", TargetUserGroup::All, None)]);
        let validated = check(&validator, "SAVE", None, 1_000, t(10), 1).unwrap();
        assert_eq!(validated.code, "SAVE");
        assert_eq!(validated.catalog.catalog_id(), &CatalogId::from("promo-SAVE"));
    }

    #[test]
    fn unknown_and_not_started_codes_are_not_found() {
        let validator = validator(vec![promo("SAVE", TargetUserGroup::All, None)]);
        assert_eq!(
            check(&validator, "NOPE", None, 1_000, t(10), 0),
            Err(LedgerError::PromoCodeNotFound("NOPE".to_string()))
        );
        assert_eq!(
            check(&validator, "SAVE", None, 1_000, t(1), 0),
            Err(LedgerError::PromoCodeNotFound("SAVE".to_string()))
        );
    }

    #[test]
    fn expired_code() {
        let validator = validator(vec![promo("OLD", TargetUserGroup::All, Some(t(8)))]);
        assert!(matches!(
            check(&validator, "OLD", None, 1_000, t(8), 0),
            Err(LedgerError::PromoCodeExpired { .. })
        ));
        assert!(check(&validator, "OLD", None, 1_000, t(7), 0).is_ok());
    }

    #[test]
    fn max_uses_is_checked_before_group_and_minimum() {
        let validator = validator(vec![promo("NEW", TargetUserGroup::Existing, None)]);
        assert_eq!(
            check(&validator, "NEW", None, 1, t(10), 2),
            Err(LedgerError::PromoCodeExceedsMaxUses {
                code: "NEW".to_string(),
                max_uses: 2
            })
        );
    }

    #[test]
    fn target_groups() {
        let validator = validator(vec![
            promo("NEWBIE", TargetUserGroup::New, None),
            promo("LOYAL", TargetUserGroup::Existing, None),
        ]);
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        let fresh = user(now - Duration::days(3));
        let veteran = user(now - Duration::days(30));

        assert!(check(&validator, "NEWBIE", None, 1_000, now, 0).is_ok());
        assert!(check(&validator, "NEWBIE", Some(&fresh), 1_000, now, 0).is_ok());
        assert!(matches!(
            check(&validator, "NEWBIE", Some(&veteran), 1_000, now, 0),
            Err(LedgerError::UserIneligibleForPromoCode { .. })
        ));

        assert!(check(&validator, "LOYAL", Some(&veteran), 1_000, now, 0).is_ok());
        assert!(matches!(
            check(&validator, "LOYAL", None, 1_000, now, 0),
            Err(LedgerError::UserIneligibleForPromoCode { .. })
        ));
    }

    #[test]
    fn huge_threshold_keeps_everyone_new() {
        let store = Arc::new(InMemoryCatalogStore::with_catalogs(vec![promo(
            "NEWBIE",
            TargetUserGroup::New,
            None,
        )]));
        let validator = PromoCodeValidator::new(store, i64::MAX);
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        let veteran = user(now - Duration::days(3_000));
        assert!(check(&validator, "NEWBIE", Some(&veteran), 1_000, now, 0).is_ok());
    }

    #[test]
    fn minimum_payment() {
        let validator = validator(vec![promo("SAVE", TargetUserGroup::All, None)]);
        assert_eq!(
            check(&validator, "SAVE", None, 999, t(10), 0),
            Err(LedgerError::PaymentAmountTooSmallForPromoCode {
                code: "SAVE".to_string(),
                minimum: 1_000
            })
        );
    }

    #[test]
    fn handles_are_sorted_and_deduplicated() {
        let redemptions = PromoRedemptions::new();
        let handles = redemptions.handles(&["b".to_string(), "a".to_string(), "b".to_string()]);
        let codes: Vec<&str> = handles.iter().map(RedemptionHandle::code).collect();
        assert_eq!(codes, vec!["a", "b"]);

        handles[0].lock().push(TopUpQuoteId::from("q1"));
        assert_eq!(redemptions.count("a"), 1);
        assert_eq!(redemptions.count("b"), 0);
        assert_eq!(redemptions.count("c"), 0);
    }
}
