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

//! Adjustment engine.
//!
//! Folds an ordered stack of catalogs over a base amount and records one
//! line item per applied catalog.
//!
//! # Ordering
//!
//! Catalogs apply by ascending `priority`; equal priorities fall back to
//! `catalog_id` in lexical order. The input order never matters.
//!
//! # Operators
//!
//! | Operator | Step |
//! |----------|------|
//! | `add` | `next = current + round_half_away_from_zero(magnitude)` |
//! | `multiply` | `next = round_half_up(current * magnitude)` |
//!
//! Multipliers act on the running amount, so they compound.
//!
//! # Clamping
//!
//! A discount never takes the running amount below `min(current, floor)`,
//! and a promo discount never exceeds its `maximum_discount_amount`
//! (zero means uncapped). A discount therefore never turns into a fee.
//!
//! # Exclusivity
//!
//! If any exclusive discount is in the stack, exactly one exclusive discount
//! applies and everything else is skipped: the one with the lowest final
//! amount, ties going to the lower priority and then the lower id. An
//! exclusive fee never displaces other catalogs and stacks like an inclusive
//! one.

use crate::base::{CatalogId, CurrencyType};
use crate::catalog::{AdjustmentCatalog, AdjustmentOperator, Exclusivity};
use crate::error::{AmountError, LedgerError};
use crate::money::{Amount, PaymentAmount, SignedAmount, decimal_to_rational, scale_units};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A realized line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub catalog_id: CatalogId,
    pub name: String,
    pub description: String,
    pub operator: AdjustmentOperator,
    pub operator_magnitude: Decimal,
    /// Negative for discounts, positive for fees.
    pub adjustment_amount: SignedAmount,
    /// Position in the applied stack.
    pub adjustment_index: u32,
}

/// Line item applied to a payment amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAdjustment {
    #[serde(flatten)]
    pub adjustment: Adjustment,
    pub currency_type: CurrencyType,
    pub promo_code: Option<String>,
    pub max_discount: Option<PaymentAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentOutcome<A> {
    pub final_amount: A,
    pub adjustments: Vec<Adjustment>,
}

impl AdjustmentOutcome<PaymentAmount> {
    /// Attaches currency and promo details from the catalogs that produced
    /// the line items.
    pub fn payment_adjustments(
        &self,
        catalogs: &[AdjustmentCatalog],
        currency_type: &CurrencyType,
    ) -> Vec<PaymentAdjustment> {
        self.adjustments
            .iter()
            .map(|adjustment| {
                let promo = catalogs
                    .iter()
                    .find(|catalog| catalog.catalog_id() == &adjustment.catalog_id)
                    .and_then(AdjustmentCatalog::promo);
                PaymentAdjustment {
                    adjustment: adjustment.clone(),
                    currency_type: currency_type.clone(),
                    promo_code: promo.map(|p| p.code_value.clone()),
                    max_discount: promo.map(|p| p.maximum_discount_amount),
                }
            })
            .collect()
    }
}

/// Applies `catalogs` to `base`, never discounting below `floor`.
pub fn apply_adjustments<A: Amount>(
    base: A,
    catalogs: &[AdjustmentCatalog],
    floor: A,
) -> Result<AdjustmentOutcome<A>, LedgerError> {
    let mut ordered: Vec<&AdjustmentCatalog> = catalogs.iter().collect();
    ordered.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.catalog_id().cmp(b.catalog_id()))
    });

    let mut best: Option<AdjustmentOutcome<A>> = None;
    for exclusive in ordered
        .iter()
        .filter(|catalog| {
            catalog.exclusivity() == Exclusivity::Exclusive && catalog.base().is_discount()
        })
    {
        let outcome = fold(base, &[*exclusive], floor)?;
        // strict comparison keeps the earlier catalog on ties
        if best
            .as_ref()
            .is_none_or(|current| outcome.final_amount < current.final_amount)
        {
            best = Some(outcome);
        }
    }
    if let Some(best) = best {
        log::debug!(
            "exclusive adjustment {} applied, {} -> {}",
            best.adjustments[0].catalog_id,
            base,
            best.final_amount
        );
        return Ok(best);
    }

    fold(base, &ordered, floor)
}

fn fold<A: Amount>(
    base: A,
    catalogs: &[&AdjustmentCatalog],
    floor: A,
) -> Result<AdjustmentOutcome<A>, LedgerError> {
    let floor = floor.units();
    let mut current = base.units();
    let mut adjustments = Vec::with_capacity(catalogs.len());

    for (index, catalog) in catalogs.iter().enumerate() {
        let next = step(current, catalog, floor).map_err(|e| catalog_error(catalog, e))?;
        let rule = catalog.base();
        adjustments.push(Adjustment {
            catalog_id: rule.catalog_id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            operator: rule.operator,
            operator_magnitude: rule.operator_magnitude,
            adjustment_amount: SignedAmount::between(current, next)
                .map_err(|_| LedgerError::ArithmeticOverflow)?,
            adjustment_index: u32::try_from(index).map_err(|_| LedgerError::ArithmeticOverflow)?,
        });
        current = next;
    }

    Ok(AdjustmentOutcome {
        final_amount: A::from_units(current).map_err(|_| LedgerError::ArithmeticOverflow)?,
        adjustments,
    })
}

fn step(current: u128, catalog: &AdjustmentCatalog, floor: u128) -> Result<u128, AmountError> {
    let rule = catalog.base();
    let proposed = match rule.operator {
        AdjustmentOperator::Add => {
            let delta = rule
                .operator_magnitude
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i128()
                .ok_or(AmountError::Overflow)?;
            if delta < 0 {
                current.saturating_sub(delta.unsigned_abs())
            } else {
                current
                    .checked_add(delta.unsigned_abs())
                    .ok_or(AmountError::Overflow)?
            }
        }
        AdjustmentOperator::Multiply => {
            let (numerator, denominator) = decimal_to_rational(rule.operator_magnitude)?;
            scale_units(current, numerator, denominator)?
        }
    };

    if proposed >= current {
        return Ok(proposed);
    }

    let mut next = proposed.max(floor.min(current));
    if let Some(promo) = catalog.promo() {
        let cap = promo.maximum_discount_amount.units();
        if cap > 0 {
            next = next.max(current.saturating_sub(cap));
        }
    }
    Ok(next)
}

fn catalog_error(catalog: &AdjustmentCatalog, error: AmountError) -> LedgerError {
    match error {
        AmountError::Negative => LedgerError::BadRequest(format!(
            "adjustment catalog '{}' has a negative multiplier",
            catalog.catalog_id()
        )),
        _ => LedgerError::ArithmeticOverflow,
    }
}
