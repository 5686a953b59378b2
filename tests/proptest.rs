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

//! Property-based tests for the ledger engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! operations and any stack of adjustment catalogs.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use winc_ledger_rs::catalog::{AdjustmentOperator, CatalogBase, Exclusivity};
use winc_ledger_rs::{
    AdjustmentCatalog, BalanceLedger, ChangeReason, DataItemId, Engine, EngineConfig,
    LedgerError, ManualClock, PaymentAmount, ReservationStatus, UserAddress, UserAddressType,
    Winc, apply_adjustments,
};

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Operator and magnitude: adds in -1000..=1000, multipliers in 0.000..=2.000.
fn arb_rule() -> impl Strategy<Value = (AdjustmentOperator, Decimal)> {
    prop_oneof![
        (-1_000i64..=1_000).prop_map(|units| (AdjustmentOperator::Add, Decimal::from(units))),
        (0i64..=2_000).prop_map(|milli| (AdjustmentOperator::Multiply, Decimal::new(milli, 3))),
    ]
}

fn arb_discount() -> impl Strategy<Value = (AdjustmentOperator, Decimal)> {
    prop_oneof![
        (-1_000i64..=0).prop_map(|units| (AdjustmentOperator::Add, Decimal::from(units))),
        (0i64..=1_000).prop_map(|milli| (AdjustmentOperator::Multiply, Decimal::new(milli, 3))),
    ]
}

fn catalog(
    index: usize,
    (operator, magnitude): (AdjustmentOperator, Decimal),
    priority: u32,
    exclusivity: Exclusivity,
) -> AdjustmentCatalog {
    AdjustmentCatalog::Payment {
        base: CatalogBase {
            catalog_id: format!("catalog-{index:02}").into(),
            name: format!("catalog {index}"),
            description: String::new(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_date: None,
            operator,
            operator_magnitude: magnitude,
            priority,
        },
        exclusivity,
    }
}

fn arb_stack() -> impl Strategy<Value = Vec<AdjustmentCatalog>> {
    prop::collection::vec((arb_rule(), 0u32..4, any::<bool>()), 0..6).prop_map(|rules| {
        rules
            .into_iter()
            .enumerate()
            .map(|(i, (rule, priority, exclusive))| {
                let exclusivity = if exclusive {
                    Exclusivity::Exclusive
                } else {
                    Exclusivity::Inclusive
                };
                catalog(i, rule, priority, exclusivity)
            })
            .collect()
    })
}

#[derive(Debug, Clone)]
enum Op {
    Credit(u128),
    Reserve(u128),
    Refund(u128),
    Chargeback(u128),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u128..10_000).prop_map(Op::Credit),
        (1u128..10_000).prop_map(Op::Reserve),
        (1u128..10_000).prop_map(Op::Refund),
        (1u128..10_000).prop_map(Op::Chargeback),
    ]
}

// =============================================================================
// Adjustment Engine
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The outcome does not depend on the order catalogs are supplied in.
    #[test]
    fn adjustments_are_order_independent(
        stack in arb_stack(),
        base in 0u64..1_000_000,
        rotation in 0usize..6,
    ) {
        let mut shuffled = stack.clone();
        shuffled.reverse();
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left(rotation % len);
        }

        let first = apply_adjustments(PaymentAmount::new(base), &stack, PaymentAmount::ZERO).unwrap();
        let second = apply_adjustments(PaymentAmount::new(base), &shuffled, PaymentAmount::ZERO).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Line item deltas always add up to the change in amount.
    #[test]
    fn line_items_sum_to_total_change(stack in arb_stack(), base in 0u64..1_000_000) {
        let outcome = apply_adjustments(PaymentAmount::new(base), &stack, PaymentAmount::ZERO).unwrap();
        let sum: i128 = outcome
            .adjustments
            .iter()
            .map(|adjustment| adjustment.adjustment_amount.value())
            .sum();
        prop_assert_eq!(i128::from(base) + sum, i128::from(outcome.final_amount.value()));

        for (index, adjustment) in outcome.adjustments.iter().enumerate() {
            prop_assert_eq!(adjustment.adjustment_index as usize, index);
        }
    }

    /// With any exclusive discount present, exactly one exclusive discount
    /// applies and no other one yields a lower amount on its own.
    #[test]
    fn exclusive_catalog_applies_alone(stack in arb_stack(), base in 0u64..1_000_000) {
        let exclusives: Vec<&AdjustmentCatalog> = stack
            .iter()
            .filter(|c| c.exclusivity() == Exclusivity::Exclusive && c.base().is_discount())
            .collect();
        prop_assume!(!exclusives.is_empty());

        let outcome = apply_adjustments(PaymentAmount::new(base), &stack, PaymentAmount::ZERO).unwrap();
        prop_assert_eq!(outcome.adjustments.len(), 1);
        let applied = &outcome.adjustments[0].catalog_id;
        prop_assert!(exclusives.iter().any(|c| c.catalog_id() == applied));

        for exclusive in exclusives {
            let alone = apply_adjustments(
                PaymentAmount::new(base),
                std::slice::from_ref(exclusive),
                PaymentAmount::ZERO,
            )
            .unwrap();
            prop_assert!(outcome.final_amount <= alone.final_amount);
        }
    }

    /// Discounts never raise the amount and never cross the floor.
    #[test]
    fn discounts_respect_floor(
        rules in prop::collection::vec(arb_discount(), 0..6),
        base in 0u128..1_000_000,
        floor in 0u128..1_000_000,
    ) {
        let stack: Vec<AdjustmentCatalog> = rules
            .into_iter()
            .enumerate()
            .map(|(i, rule)| catalog(i, rule, i as u32, Exclusivity::Inclusive))
            .collect();

        let outcome = apply_adjustments(Winc::new(base), &stack, Winc::new(floor)).unwrap();
        prop_assert!(outcome.final_amount <= Winc::new(base));
        prop_assert!(outcome.final_amount >= Winc::new(base.min(floor)));
        prop_assert!(outcome.adjustments.iter().all(|a| a.adjustment_amount.value() <= 0));
    }
}

// =============================================================================
// Balance Ledger
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// No sequence of operations takes a balance below zero, and the audit
    /// log always adds up to the balance.
    #[test]
    fn balance_matches_audit_and_stays_non_negative(ops in prop::collection::vec(arb_op(), 1..40)) {
        let ledger = BalanceLedger::new(Arc::new(ManualClock::new(Utc::now())));
        let user = UserAddress::from("user");
        ledger.create_user(&user, UserAddressType::Arweave, Default::default()).unwrap();

        let mut expected: u128 = 0;
        for (i, op) in ops.iter().enumerate() {
            let id = format!("op-{i}");
            let (result, delta): (Result<_, LedgerError>, i128) = match *op {
                Op::Credit(amount) => (
                    ledger.credit(&user, Winc::new(amount), ChangeReason::Payment, Some(&id)),
                    amount as i128,
                ),
                Op::Refund(amount) => (
                    ledger.refund(&user, Winc::new(amount), ChangeReason::Refund, Some(&id)),
                    amount as i128,
                ),
                Op::Reserve(amount) => (
                    ledger.reserve(&user, Winc::new(amount), ChangeReason::Upload, Some(&id)),
                    -(amount as i128),
                ),
                Op::Chargeback(amount) => (
                    ledger.debit(&user, Winc::new(amount), ChangeReason::Chargeback, Some(&id)),
                    -(amount as i128),
                ),
            };

            let next = expected as i128 + delta;
            if next < 0 {
                prop_assert_eq!(result, Err(LedgerError::InsufficientBalance(user.clone())));
            } else {
                prop_assert!(result.is_ok());
                expected = next as u128;
            }
            prop_assert_eq!(ledger.get_balance(&user), Ok(Winc::new(expected)));
        }

        let audit: i128 = ledger
            .audit_log(&user)
            .unwrap()
            .iter()
            .map(|entry| entry.winston_credit_amount.value())
            .sum();
        prop_assert_eq!(audit, expected as i128);
    }

    /// Replaying any operation with its change id never changes the balance.
    #[test]
    fn replays_are_no_ops(amounts in prop::collection::vec(1u128..1_000, 1..20)) {
        let ledger = BalanceLedger::new(Arc::new(ManualClock::new(Utc::now())));
        let user = UserAddress::from("user");
        ledger.create_user(&user, UserAddressType::Arweave, Default::default()).unwrap();

        for (i, amount) in amounts.iter().enumerate() {
            let id = format!("receipt-{i}");
            ledger.credit(&user, Winc::new(*amount), ChangeReason::Payment, Some(&id)).unwrap();
        }
        let balance = ledger.get_balance(&user).unwrap();

        for (i, amount) in amounts.iter().enumerate() {
            let id = format!("receipt-{i}");
            ledger.credit(&user, Winc::new(*amount), ChangeReason::Payment, Some(&id)).unwrap();
        }
        prop_assert_eq!(ledger.get_balance(&user), Ok(balance));
    }
}

// =============================================================================
// Reservations
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The balance always equals the funding minus reservations that were
    /// not refunded; repeated data items reserve once.
    #[test]
    fn reservations_account_for_every_winc(
        requests in prop::collection::vec((0usize..8, 1u128..5_000, any::<bool>()), 1..30),
    ) {
        let engine = Engine::builder(EngineConfig::default())
            .clock(Arc::new(ManualClock::new(Utc::now())))
            .build();
        let user = UserAddress::from("uploader");
        engine.create_user(&user, UserAddressType::Arweave, Default::default()).unwrap();
        engine
            .ledger()
            .credit(&user, Winc::new(20_000), ChangeReason::Payment, Some("funding"))
            .unwrap();

        for (item, amount, refund) in requests {
            let data_item = DataItemId::new(format!("item-{item}"));
            let Ok(reservation) = engine.reserve_balance(&data_item, &user, Winc::new(amount)) else {
                continue;
            };
            if refund {
                engine.refund_reservation(&reservation.reservation_id).unwrap();
            } else {
                let _ = engine.finalize_reservation(&reservation.reservation_id);
            }
        }

        let held: u128 = (0..8)
            .filter_map(|item| {
                engine
                    .reservations()
                    .reservation_for_data_item(&DataItemId::new(format!("item-{item}")))
            })
            .filter(|reservation| reservation.status != ReservationStatus::Refunded)
            .map(|reservation| reservation.reserved_winc_amount.value())
            .sum();
        prop_assert_eq!(engine.get_balance(&user), Ok(Winc::new(20_000 - held)));
    }
}
