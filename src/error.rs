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

//! Error types for ledger operations.

use crate::base::{
    ChargebackReceiptId, CurrencyType, DataItemId, ReservationId, TopUpQuoteId, UserAddress,
};
use thiserror::Error;

/// Failures of the money types themselves.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountError {
    /// Result or input would be below zero
    #[error("amount would be negative")]
    Negative,

    /// Input carries a fractional unit
    #[error("amount must be a whole number of units")]
    Fractional,

    /// Input is NaN or infinite
    #[error("amount is not a finite number")]
    NotFinite,

    /// Result does not fit the backing integer
    #[error("amount overflow")]
    Overflow,

    /// Persisted representation could not be parsed
    #[error("invalid amount representation")]
    Parse,
}

/// Recoverability class of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Promo,
    Balance,
    ExternalTransaction,
    Redemption,
    Lifecycle,
    Infrastructure,
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "The provided payment amount ({amount}) is invalid; it must be a positive non-decimal integer!"
    )]
    InvalidPaymentAmount { amount: String },

    #[error(
        "The provided payment amount ({amount}) is too small for the currency type \"{currency}\"; it must be above {minimum}!"
    )]
    PaymentAmountTooSmall {
        amount: u64,
        currency: CurrencyType,
        minimum: u64,
    },

    #[error(
        "The provided payment amount ({amount}) is too large for the currency type \"{currency}\"; it must be below or equal to {maximum}!"
    )]
    PaymentAmountTooLarge {
        amount: u64,
        currency: CurrencyType,
        maximum: u64,
    },

    #[error("The currency type '{0}' is currently not supported by this API!")]
    UnsupportedCurrencyType(CurrencyType),

    #[error("{0}")]
    BadRequest(String),

    #[error("Crypto payment amount is too small! Token value must convert to at least one winc")]
    CryptoPaymentTooSmall,

    #[error("The user '{user}' is ineligible for the promo code '{code}'")]
    UserIneligibleForPromoCode { user: UserAddress, code: String },

    #[error("No promo code found with code '{0}'")]
    PromoCodeNotFound(String),

    #[error("The promo code '{code}' expired on '{end_date}'")]
    PromoCodeExpired { code: String, end_date: String },

    #[error("The promo code '{code}' can only used on payments above '{minimum}'")]
    PaymentAmountTooSmallForPromoCode { code: String, minimum: u64 },

    #[error("The promo code '{code}' has already been used the maximum number of times ({max_uses})")]
    PromoCodeExceedsMaxUses { code: String, max_uses: u32 },

    /// Reservation or debit would take the balance below zero
    #[error("Insufficient balance for '{0}'")]
    InsufficientBalance(UserAddress),

    #[error("No user found in database with address '{0}'")]
    UserNotFoundWarning(UserAddress),

    /// Retryable after a delay
    #[error("Transaction with id '{0}' has not been mined yet!")]
    PaymentTransactionNotMined(String),

    #[error("No payment transaction found with id '{0}'")]
    PaymentTransactionNotFound(String),

    #[error("Transaction with id '{0}' is not a payment transaction!")]
    TransactionNotAPaymentTransaction(String),

    #[error("Payment transaction '{transaction_id}' has wrong target address '{}'", .target.as_deref().unwrap_or("undefined"))]
    PaymentTransactionHasWrongTarget {
        transaction_id: String,
        target: Option<String>,
    },

    #[error(
        "Payment transaction '{transaction_id}' has sender that is on the excluded address list: '{sender}'"
    )]
    PaymentTransactionRecipientOnExcludedList {
        transaction_id: String,
        sender: String,
    },

    #[error("{0}")]
    GiftRedemptionError(String),

    #[error("Gift has already been redeemed!")]
    GiftAlreadyRedeemed,

    #[error("No top up quote found with id '{0}'")]
    TopUpQuoteNotFound(TopUpQuoteId),

    #[error("Top up quote '{id}' is no longer pending (currently {stage})")]
    TopUpQuoteNotPending { id: TopUpQuoteId, stage: String },

    #[error("Top up quote '{0}' has expired")]
    TopUpQuoteExpired(TopUpQuoteId),

    #[error("No payment receipt found for top up quote '{0}'")]
    PaymentReceiptNotFound(TopUpQuoteId),

    #[error("Top up quote '{id}' was already charged back with receipt '{existing}'")]
    ChargebackAlreadyRecorded {
        id: TopUpQuoteId,
        existing: ChargebackReceiptId,
    },

    #[error("No balance reservation found for '{0}'")]
    ReservationNotFound(ReservationId),

    #[error("Balance reservation for data item '{0}' was already refunded")]
    ReservationAlreadyRefunded(DataItemId),

    /// Same change id replayed with a different delta
    #[error("Change '{change_id}' was already applied with a different amount for '{user}'")]
    ChangeIdConflict { user: UserAddress, change_id: String },

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    /// Storage collaborator is unreachable; retry with backoff
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        use LedgerError::*;
        match self {
            InvalidPaymentAmount { .. }
            | PaymentAmountTooSmall { .. }
            | PaymentAmountTooLarge { .. }
            | UnsupportedCurrencyType(_)
            | BadRequest(_)
            | CryptoPaymentTooSmall => ErrorCategory::Validation,
            UserIneligibleForPromoCode { .. }
            | PromoCodeNotFound(_)
            | PromoCodeExpired { .. }
            | PaymentAmountTooSmallForPromoCode { .. }
            | PromoCodeExceedsMaxUses { .. } => ErrorCategory::Promo,
            InsufficientBalance(_) | UserNotFoundWarning(_) => ErrorCategory::Balance,
            PaymentTransactionNotMined(_)
            | PaymentTransactionNotFound(_)
            | TransactionNotAPaymentTransaction(_)
            | PaymentTransactionHasWrongTarget { .. }
            | PaymentTransactionRecipientOnExcludedList { .. } => {
                ErrorCategory::ExternalTransaction
            }
            GiftRedemptionError(_) | GiftAlreadyRedeemed => ErrorCategory::Redemption,
            TopUpQuoteNotFound(_)
            | TopUpQuoteNotPending { .. }
            | TopUpQuoteExpired(_)
            | PaymentReceiptNotFound(_)
            | ChargebackAlreadyRecorded { .. }
            | ReservationNotFound(_)
            | ReservationAlreadyRefunded(_)
            | ChangeIdConflict { .. } => ErrorCategory::Lifecycle,
            ArithmeticOverflow | StorageUnavailable(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::PaymentTransactionNotMined(_) | LedgerError::StorageUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InsufficientBalance(UserAddress::from("abc")).to_string(),
            "Insufficient balance for 'abc'"
        );
        assert_eq!(
            LedgerError::UserNotFoundWarning(UserAddress::from("abc")).to_string(),
            "No user found in database with address 'abc'"
        );
        assert_eq!(
            LedgerError::UnsupportedCurrencyType(CurrencyType::new("xyz")).to_string(),
            "The currency type 'xyz' is currently not supported by this API!"
        );
        assert_eq!(
            LedgerError::PaymentAmountTooSmall {
                amount: 100,
                currency: CurrencyType::new("usd"),
                minimum: 500,
            }
            .to_string(),
            "The provided payment amount (100) is too small for the currency type \"usd\"; it must be above 500!"
        );
        assert_eq!(
            LedgerError::PromoCodeExceedsMaxUses {
                code: "TOKEN2049".to_string(),
                max_uses: 1,
            }
            .to_string(),
            "The promo code 'TOKEN2049' has already been used the maximum number of times (1)"
        );
        assert_eq!(
            LedgerError::GiftAlreadyRedeemed.to_string(),
            "Gift has already been redeemed!"
        );
        assert_eq!(
            LedgerError::CryptoPaymentTooSmall.to_string(),
            "Crypto payment amount is too small! Token value must convert to at least one winc"
        );
    }

    #[test]
    fn wrong_target_without_address() {
        let err = LedgerError::PaymentTransactionHasWrongTarget {
            transaction_id: "tx".to_string(),
            target: None,
        };
        assert_eq!(
            err.to_string(),
            "Payment transaction 'tx' has wrong target address 'undefined'"
        );
    }

    #[test]
    fn categories_and_retryability() {
        assert_eq!(
            LedgerError::CryptoPaymentTooSmall.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            LedgerError::PromoCodeNotFound("x".into()).category(),
            ErrorCategory::Promo
        );
        assert_eq!(
            LedgerError::GiftAlreadyRedeemed.category(),
            ErrorCategory::Redemption
        );
        assert!(LedgerError::PaymentTransactionNotMined("tx".into()).is_retryable());
        assert!(LedgerError::StorageUnavailable("down".into()).is_retryable());
        assert!(!LedgerError::PaymentTransactionNotFound("tx".into()).is_retryable());
        assert!(!LedgerError::InsufficientBalance(UserAddress::from("a")).is_retryable());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::InsufficientBalance(UserAddress::from("a"));
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
