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

//! # Winc Ledger
//!
//! This library provides the balance reservation and adjustment engine of a
//! credit ledger. Balances are held in winc, an integer credit unit, and move
//! through top-up quotes, payment receipts, chargebacks and upload
//! reservations. Every balance change is recorded in an append-only audit
//! log.
//!
//! ## Core Components
//!
//! - [`Engine`]: Facade over the ledger, reservations and top-up quotes
//! - [`BalanceLedger`]: Owner of user balances and their audit logs
//! - [`apply_adjustments`]: Folds discount and fee catalogs over a price
//! - [`LedgerError`]: Every failure the engine reports
//!
//! ## Example
//!
//! ```
//! use winc_ledger_rs::{
//!     CreateQuoteParams, CurrencyType, DataItemId, Engine, PaymentProvider, PaymentReceiptId,
//!     RecordPaymentParams, UserAddress, UserAddressType, Winc,
//! };
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let user = UserAddress::from("alice");
//!
//! // Buy credits with 10.00 USD
//! let quote = engine
//!     .quote_top_up(CreateQuoteParams {
//!         destination_address: user.clone(),
//!         destination_address_type: UserAddressType::Arweave,
//!         payment_amount: dec!(1000),
//!         currency_type: CurrencyType::new("usd"),
//!         payment_provider: PaymentProvider::Stripe,
//!         promo_codes: vec![],
//!     })
//!     .unwrap();
//! engine
//!     .confirm_payment(RecordPaymentParams {
//!         top_up_quote_id: quote.top_up_quote_id.clone(),
//!         payment_receipt_id: PaymentReceiptId::from("receipt-1"),
//!         payment_amount: quote.quoted_payment_amount,
//!         currency_type: quote.currency_type.clone(),
//!         transaction_id: None,
//!     })
//!     .unwrap();
//!
//! // Hold credits for an upload
//! engine
//!     .reserve_balance(&DataItemId::from("item-1"), &user, Winc::new(1_000))
//!     .unwrap();
//! assert_eq!(
//!     engine.get_balance(&user).unwrap(),
//!     Winc::new(10_000_000_000 - 1_000)
//! );
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Sync`: share it between worker threads by reference or in
//! an `Arc`. Each user's balance is guarded by its own lock.

pub mod adjustment;
mod base;
pub mod catalog;
pub mod clock;
pub mod config;
mod engine;
pub mod error;
pub mod ledger;
mod money;
pub mod pricing;
pub mod promo;
pub mod quote;
pub mod reservation;
pub mod verification;

pub use adjustment::{Adjustment, AdjustmentOutcome, PaymentAdjustment, apply_adjustments};
pub use base::{
    CatalogId, ChargebackReceiptId, CurrencyType, DataItemId, PaymentProvider, PaymentReceiptId,
    ReservationId, TopUpQuoteId, UserAddress, UserAddressType,
};
pub use catalog::{AdjustmentCatalog, CatalogStore, InMemoryCatalogStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{AmountError, ErrorCategory, LedgerError};
pub use ledger::{Account, AuditLogEntry, BalanceLedger, ChangeReason, User};
pub use money::{Amount, PaymentAmount, SignedAmount, Winc, validate_payment_amount};
pub use quote::{
    ChargebackReceipt, CreateQuoteParams, FailedTopUpQuote, PaymentReceipt, RecordPaymentParams,
    TopUpQuote, TopUpStage,
};
pub use reservation::{BalanceReservation, ReservationStatus};
