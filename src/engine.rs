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

//! Credit ledger engine.
//!
//! The [`Engine`] wires the balance ledger, the reservation manager and the
//! top-up quote lifecycle to their collaborators and exposes the inbound
//! calls of the service.
//!
//! # Operations
//!
//! - **Quotes**: price a top-up with payment catalogs and promo codes.
//! - **Payments**: turn a paid quote into a receipt and credit the user.
//! - **Chargebacks**: reverse a receipted payment.
//! - **Reservations**: hold credits for an upload, then finalize or refund.
//!
//! # Thread Safety
//!
//! All state lives in [`DashMap`](dashmap::DashMap)s and per-account
//! [`Mutex`](parking_lot::Mutex)es, so the engine is shared across worker
//! threads by reference. Requests for different users never contend beyond
//! map shards.

use crate::base::{ChargebackReceiptId, DataItemId, ReservationId, TopUpQuoteId, UserAddress, UserAddressType};
use crate::catalog::{CatalogStore, InMemoryCatalogStore};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::LedgerError;
use crate::ledger::{AuditLogEntry, BalanceLedger, PromotionalInfo, User};
use crate::money::Winc;
use crate::pricing::{FixedRateOracle, WincOracle};
use crate::quote::{
    ChargebackReceipt, CreateQuoteParams, FailedTopUpQuote, PaymentReceipt, RecordPaymentParams,
    TopUpQuote, TopUpQuoteManager, TopUpStage,
};
use crate::reservation::{BalanceReservation, ReservationManager};
use crate::verification::{PaymentVerifier, StaticPaymentVerifier};
use std::sync::Arc;

/// Builds an [`Engine`], defaulting every collaborator it is not given.
///
/// | Collaborator | Default |
/// |--------------|---------|
/// | Clock | [`SystemClock`] |
/// | Catalog store | [`InMemoryCatalogStore`] seeded from `config.catalogs` |
/// | Oracle | [`FixedRateOracle`] from `config.currencies` |
/// | Verifier | empty [`StaticPaymentVerifier`] |
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    catalogs: Option<Arc<dyn CatalogStore>>,
    oracle: Option<Arc<dyn WincOracle>>,
    verifier: Option<Arc<dyn PaymentVerifier>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            catalogs: None,
            oracle: None,
            verifier: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn catalogs(mut self, catalogs: Arc<dyn CatalogStore>) -> Self {
        self.catalogs = Some(catalogs);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn WincOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn PaymentVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn build(self) -> Engine {
        let config = Arc::new(self.config);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let catalogs = self.catalogs.unwrap_or_else(|| {
            Arc::new(InMemoryCatalogStore::with_catalogs(config.catalogs.clone()))
        });
        let oracle = self
            .oracle
            .unwrap_or_else(|| Arc::new(FixedRateOracle::from_config(&config)));
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(StaticPaymentVerifier::new()));

        let ledger = Arc::new(BalanceLedger::new(clock.clone()));
        let reservations = ReservationManager::new(
            ledger.clone(),
            catalogs.clone(),
            clock.clone(),
            config.winc_floor,
        );
        let quotes = TopUpQuoteManager::new(
            config.clone(),
            ledger.clone(),
            catalogs,
            oracle,
            verifier,
            clock,
        );

        Engine {
            config,
            ledger,
            reservations,
            quotes,
        }
    }
}

/// Credit ledger engine.
///
/// # Invariants
///
/// - A balance never goes below zero after a committed operation.
/// - The audit entries of a user always add up to that user's balance.
/// - A data item reserves at most once; a quote is receipted at most once;
///   a receipt is charged back at most once.
/// - A promo code is never on more live quotes than its `max_uses`.
pub struct Engine {
    config: Arc<EngineConfig>,
    ledger: Arc<BalanceLedger>,
    reservations: ReservationManager,
    quotes: TopUpQuoteManager,
}

impl Engine {
    /// Creates an engine with default settings and collaborators.
    pub fn new() -> Self {
        Self::builder(EngineConfig::default()).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn quotes(&self) -> &TopUpQuoteManager {
        &self.quotes
    }

    /// Prices a top-up and stores it as a pending quote.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidPaymentAmount`] - Amount is not a positive whole number.
    /// - [`LedgerError::UnsupportedCurrencyType`] - Currency is not configured.
    /// - [`LedgerError::PaymentAmountTooSmall`] / [`LedgerError::PaymentAmountTooLarge`] - Outside the currency's bounds.
    /// - Promo errors, checked per code in order: not found, expired, max uses, user group, minimum payment.
    /// - [`LedgerError::CryptoPaymentTooSmall`] - Payment buys no winc.
    pub fn quote_top_up(&self, params: CreateQuoteParams) -> Result<TopUpQuote, LedgerError> {
        self.quotes.create_quote(params)
    }

    /// Records a settled payment and credits the quote's destination.
    ///
    /// Replays with the same receipt id return the original receipt.
    ///
    /// # Errors
    ///
    /// - Verification errors when a transaction id is given.
    /// - [`LedgerError::TopUpQuoteNotFound`] - Unknown quote.
    /// - [`LedgerError::GiftAlreadyRedeemed`] - Quote already paid under another receipt.
    /// - [`LedgerError::TopUpQuoteNotPending`] - Quote has failed.
    /// - [`LedgerError::TopUpQuoteExpired`] - Quote expired before the payment arrived.
    /// - [`LedgerError::BadRequest`] - Wrong currency or underpayment.
    /// - [`LedgerError::UserNotFoundWarning`] - Unknown destination and auto provisioning is off.
    pub fn confirm_payment(&self, params: RecordPaymentParams) -> Result<PaymentReceipt, LedgerError> {
        self.quotes.record_payment(params)
    }

    /// Reverses a receipted payment.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PaymentReceiptNotFound`] - Quote was never paid.
    /// - [`LedgerError::ChargebackAlreadyRecorded`] - Charged back under another id.
    /// - [`LedgerError::InsufficientBalance`] - Credits were already spent.
    pub fn record_chargeback(
        &self,
        quote_id: &TopUpQuoteId,
        chargeback_receipt_id: &ChargebackReceiptId,
        reason: &str,
    ) -> Result<ChargebackReceipt, LedgerError> {
        self.quotes
            .record_chargeback(quote_id, chargeback_receipt_id, reason)
    }

    /// Holds the adjusted price of an upload against the user's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientBalance`] - Balance is below the adjusted price.
    /// - [`LedgerError::UserNotFoundWarning`] - Unknown user.
    /// - [`LedgerError::BadRequest`] - Data item is reserved by another user.
    pub fn reserve_balance(
        &self,
        data_item_id: &DataItemId,
        user: &UserAddress,
        network_winc_amount: Winc,
    ) -> Result<BalanceReservation, LedgerError> {
        self.reservations
            .create_reservation(data_item_id, user, network_winc_amount)
    }

    pub fn finalize_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        self.reservations.finalize_reservation(reservation_id)
    }

    pub fn refund_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        self.reservations.refund_reservation(reservation_id)
    }

    pub fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        self.reservations.get_reservation(reservation_id)
    }

    pub fn get_balance(&self, user: &UserAddress) -> Result<Winc, LedgerError> {
        self.ledger.get_balance(user)
    }

    pub fn get_user(&self, user: &UserAddress) -> Result<User, LedgerError> {
        self.ledger.get_user(user)
    }

    pub fn create_user(
        &self,
        user: &UserAddress,
        address_type: UserAddressType,
        promotional_info: PromotionalInfo,
    ) -> Result<User, LedgerError> {
        self.ledger.create_user(user, address_type, promotional_info)
    }

    pub fn audit_log(&self, user: &UserAddress) -> Result<Vec<AuditLogEntry>, LedgerError> {
        self.ledger.audit_log(user)
    }

    pub fn get_quote(&self, quote_id: &TopUpQuoteId) -> Result<TopUpStage, LedgerError> {
        self.quotes.get_quote(quote_id)
    }

    pub fn expire_quote(&self, quote_id: &TopUpQuoteId) -> Result<TopUpStage, LedgerError> {
        self.quotes.expire_quote(quote_id)
    }

    /// Sweep for an external scheduler.
    pub fn expire_stale_quotes(&self) -> Vec<FailedTopUpQuote> {
        self.quotes.expire_stale_quotes()
    }

    /// Balances of every user, ordered by address.
    pub fn balances(&self) -> Vec<(UserAddress, Winc)> {
        self.ledger.balances()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
