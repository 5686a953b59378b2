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

//! Top-up quote lifecycle.
//!
//! ```text
//!   create_quote ──► Pending ──► Receipted ──► ChargedBack
//!                       └──────► Failed ("expired" or rejected)
//! ```
//!
//! Every quote id transitions at most once out of `Pending`, and a receipt is
//! charged back at most once. Receipts are the only event that credits a
//! balance; chargebacks are the only event that reverses one.
//!
//! Receipt and chargeback ids are unique across quotes: reusing one for a
//! different quote is rejected before the ledger is touched.
//!
//! Locks are always taken in the order promo redemption mutex, quote entry,
//! receipt index entry, user account.

use crate::adjustment::{PaymentAdjustment, apply_adjustments};
use crate::base::{
    ChargebackReceiptId, CurrencyType, PaymentProvider, PaymentReceiptId, TopUpQuoteId,
    UserAddress, UserAddressType,
};
use crate::catalog::CatalogStore;
use crate::clock::Clock;
use crate::config::{CurrencyKind, EngineConfig};
use crate::error::LedgerError;
use crate::ledger::{BalanceLedger, ChangeReason};
use crate::money::{PaymentAmount, Winc, validate_payment_amount};
use crate::pricing::WincOracle;
use crate::promo::{PromoCodeValidator, PromoContext, PromoRedemptions};
use crate::verification::PaymentVerifier;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const EXPIRED_REASON: &str = "expired";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpQuote {
    pub top_up_quote_id: TopUpQuoteId,
    pub destination_address: UserAddress,
    pub destination_address_type: UserAddressType,
    /// Requested amount, before payment adjustments.
    pub payment_amount: PaymentAmount,
    /// Amount the payer owes, after payment adjustments.
    pub quoted_payment_amount: PaymentAmount,
    pub currency_type: CurrencyType,
    /// Credits granted once paid.
    pub winston_credit_amount: Winc,
    pub quote_creation_date: DateTime<Utc>,
    pub quote_expiration_date: DateTime<Utc>,
    pub payment_provider: PaymentProvider,
    pub adjustments: Vec<PaymentAdjustment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTopUpQuote {
    #[serde(flatten)]
    pub quote: TopUpQuote,
    pub failed_reason: String,
    pub quote_failed_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    #[serde(flatten)]
    pub quote: TopUpQuote,
    pub payment_receipt_id: PaymentReceiptId,
    pub payment_receipt_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargebackReceipt {
    #[serde(flatten)]
    pub receipt: PaymentReceipt,
    pub chargeback_receipt_id: ChargebackReceiptId,
    pub chargeback_reason: String,
    pub chargeback_receipt_date: DateTime<Utc>,
}

/// Where a quote is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TopUpStage {
    Pending(TopUpQuote),
    Failed(FailedTopUpQuote),
    Receipted(PaymentReceipt),
    ChargedBack(ChargebackReceipt),
}

impl TopUpStage {
    pub fn quote(&self) -> &TopUpQuote {
        match self {
            Self::Pending(quote) => quote,
            Self::Failed(failed) => &failed.quote,
            Self::Receipted(receipt) => &receipt.quote,
            Self::ChargedBack(chargeback) => &chargeback.receipt.quote,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending(_) => "pending",
            Self::Failed(_) => "failed",
            Self::Receipted(_) => "receipted",
            Self::ChargedBack(_) => "charged_back",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A request for credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateQuoteParams {
    pub destination_address: UserAddress,
    pub destination_address_type: UserAddressType,
    /// Raw amount in minor units; validated on use.
    pub payment_amount: Decimal,
    pub currency_type: CurrencyType,
    pub payment_provider: PaymentProvider,
    pub promo_codes: Vec<String>,
}

/// A settled payment reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaymentParams {
    pub top_up_quote_id: TopUpQuoteId,
    pub payment_receipt_id: PaymentReceiptId,
    /// Amount the provider observed.
    pub payment_amount: PaymentAmount,
    pub currency_type: CurrencyType,
    /// On-chain transaction for crypto payments.
    pub transaction_id: Option<String>,
}

pub struct TopUpQuoteManager {
    quotes: DashMap<TopUpQuoteId, TopUpStage>,
    /// Quote each payment receipt was recorded for.
    receipts: DashMap<PaymentReceiptId, TopUpQuoteId>,
    /// Quote each chargeback receipt was recorded for.
    chargebacks: DashMap<ChargebackReceiptId, TopUpQuoteId>,
    redemptions: PromoRedemptions,
    validator: PromoCodeValidator,
    config: Arc<EngineConfig>,
    ledger: Arc<BalanceLedger>,
    catalogs: Arc<dyn CatalogStore>,
    oracle: Arc<dyn WincOracle>,
    verifier: Arc<dyn PaymentVerifier>,
    clock: Arc<dyn Clock>,
}

impl TopUpQuoteManager {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<BalanceLedger>,
        catalogs: Arc<dyn CatalogStore>,
        oracle: Arc<dyn WincOracle>,
        verifier: Arc<dyn PaymentVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quotes: DashMap::new(),
            receipts: DashMap::new(),
            chargebacks: DashMap::new(),
            redemptions: PromoRedemptions::new(),
            validator: PromoCodeValidator::new(catalogs.clone(), config.new_user_threshold_days),
            config,
            ledger,
            catalogs,
            oracle,
            verifier,
            clock,
        }
    }

    /// Prices a top-up and stores it as a pending quote.
    pub fn create_quote(&self, params: CreateQuoteParams) -> Result<TopUpQuote, LedgerError> {
        let now = self.clock.now();
        let payment_amount = validate_payment_amount(params.payment_amount)?;
        let currency = params.currency_type;
        let settings = self
            .config
            .currency(&currency)
            .ok_or_else(|| LedgerError::UnsupportedCurrencyType(currency.clone()))?;

        if payment_amount < settings.minimum {
            return Err(LedgerError::PaymentAmountTooSmall {
                amount: payment_amount.value(),
                currency: currency.clone(),
                minimum: settings.minimum.value(),
            });
        }
        if payment_amount > settings.maximum {
            return Err(LedgerError::PaymentAmountTooLarge {
                amount: payment_amount.value(),
                currency: currency.clone(),
                maximum: settings.maximum.value(),
            });
        }

        // Held until the quote is stored, so racing quotes see each other.
        let handles = self.redemptions.handles(&params.promo_codes);
        let mut redeemed: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();

        let user = self.ledger.get_user(&params.destination_address).ok();
        let ctx = PromoContext {
            address: &params.destination_address,
            user: user.as_ref(),
            payment_amount,
            currency: &currency,
            now,
        };
        let mut catalogs = self.catalogs.payment_catalogs(now);
        let mut promo_catalog_ids = Vec::with_capacity(handles.len());
        for (handle, quotes) in handles.iter().zip(redeemed.iter_mut()) {
            quotes.retain(|quote_id| self.is_live(quote_id));
            let promo = self.validator.validate(handle.code(), &ctx, quotes.len())?;
            promo_catalog_ids.push(promo.catalog.catalog_id().clone());
            catalogs.push(promo.catalog);
        }

        let outcome = apply_adjustments(payment_amount, &catalogs, self.config.payment_floor)?;
        let winston_credit_amount = self.oracle.winc_for_payment(payment_amount, &currency)?;
        if winston_credit_amount.is_zero() {
            return Err(match settings.kind {
                CurrencyKind::Crypto => LedgerError::CryptoPaymentTooSmall,
                CurrencyKind::Fiat => LedgerError::BadRequest(format!(
                    "Payment of {payment_amount} {currency} does not convert to any winc"
                )),
            });
        }

        let ttl = Duration::try_seconds(self.config.quote_ttl_secs)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let quote_expiration_date = now
            .checked_add_signed(ttl)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        let quote = TopUpQuote {
            top_up_quote_id: TopUpQuoteId::generate(),
            destination_address: params.destination_address,
            destination_address_type: params.destination_address_type,
            payment_amount,
            quoted_payment_amount: outcome.final_amount,
            winston_credit_amount,
            quote_creation_date: now,
            quote_expiration_date,
            payment_provider: params.payment_provider,
            adjustments: outcome.payment_adjustments(&catalogs, &currency),
            currency_type: currency,
        };
        self.quotes
            .insert(quote.top_up_quote_id.clone(), TopUpStage::Pending(quote.clone()));
        // A code only uses up a redemption when its catalog made it into the
        // line items; an exclusive discount can push it out.
        for (catalog_id, quotes) in promo_catalog_ids.iter().zip(redeemed.iter_mut()) {
            if outcome
                .adjustments
                .iter()
                .any(|adjustment| adjustment.catalog_id == *catalog_id)
            {
                quotes.push(quote.top_up_quote_id.clone());
            } else {
                log::debug!(
                    "promo catalog {catalog_id} not applied to quote {}",
                    quote.top_up_quote_id
                );
            }
        }

        log::info!(
            "quote {} for {}: pays {} {} for {} winc",
            quote.top_up_quote_id,
            quote.destination_address,
            quote.quoted_payment_amount,
            quote.currency_type,
            quote.winston_credit_amount
        );
        Ok(quote)
    }

    fn is_live(&self, quote_id: &TopUpQuoteId) -> bool {
        self.quotes
            .get(quote_id)
            .is_some_and(|stage| !stage.is_failed())
    }

    /// Fails a pending quote whose expiration date has passed. Any other
    /// quote is returned unchanged.
    pub fn expire_quote(&self, quote_id: &TopUpQuoteId) -> Result<TopUpStage, LedgerError> {
        let mut stage = self
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| LedgerError::TopUpQuoteNotFound(quote_id.clone()))?;
        expire_if_due(&mut stage, self.clock.now());
        Ok(stage.clone())
    }

    /// Fails every overdue pending quote, returning the ones failed now.
    pub fn expire_stale_quotes(&self) -> Vec<FailedTopUpQuote> {
        let now = self.clock.now();
        let mut failed: Vec<FailedTopUpQuote> = self
            .quotes
            .iter_mut()
            .filter_map(|mut stage| expire_if_due(stage.value_mut(), now))
            .collect();
        failed.sort_by(|a, b| a.quote.top_up_quote_id.cmp(&b.quote.top_up_quote_id));
        if !failed.is_empty() {
            log::info!("expired {} stale quotes", failed.len());
        }
        failed
    }

    /// Turns a paid quote into a receipt and credits the destination.
    ///
    /// Replaying the same receipt id returns the stored receipt.
    pub fn record_payment(&self, params: RecordPaymentParams) -> Result<PaymentReceipt, LedgerError> {
        let (observed_amount, observed_currency) = match &params.transaction_id {
            Some(transaction_id) => self.verify_transaction(transaction_id, &params.currency_type)?,
            None => (params.payment_amount, params.currency_type.clone()),
        };

        let quote_id = &params.top_up_quote_id;
        let mut stage = self
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| LedgerError::TopUpQuoteNotFound(quote_id.clone()))?;

        let quote = match &*stage {
            TopUpStage::Pending(quote) => quote,
            TopUpStage::Receipted(receipt) => {
                return replayed_receipt(receipt, &params.payment_receipt_id);
            }
            TopUpStage::ChargedBack(chargeback) => {
                return replayed_receipt(&chargeback.receipt, &params.payment_receipt_id);
            }
            TopUpStage::Failed(_) => {
                return Err(LedgerError::TopUpQuoteNotPending {
                    id: quote_id.clone(),
                    stage: stage.name().to_string(),
                });
            }
        };

        let now = self.clock.now();
        if now > quote.quote_expiration_date {
            log::warn!("payment {} arrived after quote {quote_id} expired", params.payment_receipt_id);
            return Err(LedgerError::TopUpQuoteExpired(quote_id.clone()));
        }
        if observed_currency != quote.currency_type {
            return Err(LedgerError::BadRequest(format!(
                "Payment currency '{observed_currency}' does not match quoted currency '{}'",
                quote.currency_type
            )));
        }
        if observed_amount < quote.quoted_payment_amount {
            return Err(LedgerError::BadRequest(format!(
                "Payment amount {observed_amount} is less than quoted amount {}",
                quote.quoted_payment_amount
            )));
        }

        let receipt_slot = match self.receipts.entry(params.payment_receipt_id.clone()) {
            Entry::Occupied(entry) => {
                log::warn!(
                    "payment receipt {} reused for quote {quote_id}, already recorded for {}",
                    entry.key(),
                    entry.get()
                );
                return Err(LedgerError::BadRequest(format!(
                    "Payment receipt '{}' was already recorded for another quote",
                    entry.key()
                )));
            }
            Entry::Vacant(entry) => entry,
        };

        let change_id = Some(params.payment_receipt_id.as_str());
        if self.config.auto_provision_users {
            self.ledger.credit_or_provision(
                &quote.destination_address,
                quote.destination_address_type.clone(),
                quote.winston_credit_amount,
                change_id,
            )?;
        } else {
            self.ledger.credit(
                &quote.destination_address,
                quote.winston_credit_amount,
                ChangeReason::Payment,
                change_id,
            )?;
        }

        let receipt = PaymentReceipt {
            quote: quote.clone(),
            payment_receipt_id: params.payment_receipt_id,
            payment_receipt_date: now,
        };
        receipt_slot.insert(quote_id.clone());
        *stage = TopUpStage::Receipted(receipt.clone());
        log::info!(
            "receipt {} credited {} winc to {}",
            receipt.payment_receipt_id,
            receipt.quote.winston_credit_amount,
            receipt.quote.destination_address
        );
        Ok(receipt)
    }

    /// Checks an on-chain payment and returns the amount and currency it moved.
    fn verify_transaction(
        &self,
        transaction_id: &str,
        currency: &CurrencyType,
    ) -> Result<(PaymentAmount, CurrencyType), LedgerError> {
        let transaction = self.verifier.verify(transaction_id)?;
        if !transaction.mined {
            return Err(LedgerError::PaymentTransactionNotMined(transaction_id.to_string()));
        }
        if !transaction.is_payment {
            return Err(LedgerError::TransactionNotAPaymentTransaction(
                transaction_id.to_string(),
            ));
        }

        let wallet = self
            .config
            .currency(currency)
            .ok_or_else(|| LedgerError::UnsupportedCurrencyType(currency.clone()))?
            .wallet_address
            .as_deref();
        if transaction.recipient.as_deref() != wallet {
            return Err(LedgerError::PaymentTransactionHasWrongTarget {
                transaction_id: transaction_id.to_string(),
                target: transaction.recipient,
            });
        }
        if self.config.is_excluded(&transaction.sender) {
            return Err(LedgerError::PaymentTransactionRecipientOnExcludedList {
                transaction_id: transaction_id.to_string(),
                sender: transaction.sender,
            });
        }
        Ok((transaction.amount, transaction.currency_type))
    }

    /// Reverses a receipted payment by debiting its credits.
    pub fn record_chargeback(
        &self,
        quote_id: &TopUpQuoteId,
        chargeback_receipt_id: &ChargebackReceiptId,
        reason: &str,
    ) -> Result<ChargebackReceipt, LedgerError> {
        let mut stage = self
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| LedgerError::TopUpQuoteNotFound(quote_id.clone()))?;

        let receipt = match &*stage {
            TopUpStage::Receipted(receipt) => receipt,
            TopUpStage::ChargedBack(chargeback) => {
                if chargeback.chargeback_receipt_id == *chargeback_receipt_id {
                    return Ok(chargeback.clone());
                }
                return Err(LedgerError::ChargebackAlreadyRecorded {
                    id: quote_id.clone(),
                    existing: chargeback.chargeback_receipt_id.clone(),
                });
            }
            TopUpStage::Pending(_) | TopUpStage::Failed(_) => {
                return Err(LedgerError::PaymentReceiptNotFound(quote_id.clone()));
            }
        };

        let chargeback_slot = match self.chargebacks.entry(chargeback_receipt_id.clone()) {
            Entry::Occupied(entry) => {
                log::warn!(
                    "chargeback {chargeback_receipt_id} reused for quote {quote_id}, already recorded for {}",
                    entry.get()
                );
                return Err(LedgerError::BadRequest(format!(
                    "Chargeback receipt '{chargeback_receipt_id}' was already recorded for another quote"
                )));
            }
            Entry::Vacant(entry) => entry,
        };

        self.ledger.debit(
            &receipt.quote.destination_address,
            receipt.quote.winston_credit_amount,
            ChangeReason::Chargeback,
            Some(chargeback_receipt_id.as_str()),
        )?;

        let chargeback = ChargebackReceipt {
            receipt: receipt.clone(),
            chargeback_receipt_id: chargeback_receipt_id.clone(),
            chargeback_reason: reason.to_string(),
            chargeback_receipt_date: self.clock.now(),
        };
        chargeback_slot.insert(quote_id.clone());
        *stage = TopUpStage::ChargedBack(chargeback.clone());
        log::warn!(
            "chargeback {chargeback_receipt_id} reversed {} winc from {}",
            chargeback.receipt.quote.winston_credit_amount,
            chargeback.receipt.quote.destination_address
        );
        Ok(chargeback)
    }

    pub fn get_quote(&self, quote_id: &TopUpQuoteId) -> Result<TopUpStage, LedgerError> {
        self.quotes
            .get(quote_id)
            .map(|stage| stage.value().clone())
            .ok_or_else(|| LedgerError::TopUpQuoteNotFound(quote_id.clone()))
    }

    /// Live quotes carrying `code`.
    pub fn promo_redemptions(&self, code: &str) -> usize {
        self.redemptions.count(code)
    }
}

fn replayed_receipt(
    receipt: &PaymentReceipt,
    payment_receipt_id: &PaymentReceiptId,
) -> Result<PaymentReceipt, LedgerError> {
    if receipt.payment_receipt_id == *payment_receipt_id {
        Ok(receipt.clone())
    } else {
        Err(LedgerError::GiftAlreadyRedeemed)
    }
}

fn expire_if_due(stage: &mut TopUpStage, now: DateTime<Utc>) -> Option<FailedTopUpQuote> {
    let TopUpStage::Pending(quote) = stage else {
        return None;
    };
    if now <= quote.quote_expiration_date {
        return None;
    }
    let failed = FailedTopUpQuote {
        quote: quote.clone(),
        failed_reason: EXPIRED_REASON.to_string(),
        quote_failed_date: now,
    };
    log::debug!("quote {} expired", failed.quote.top_up_quote_id);
    *stage = TopUpStage::Failed(failed.clone());
    Some(failed)
}
