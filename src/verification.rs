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

//! Payment-verification collaborator for crypto top-ups.

use crate::base::CurrencyType;
use crate::error::LedgerError;
use crate::money::PaymentAmount;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What the chain says about a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub transaction_id: String,
    pub mined: bool,
    /// `false` for transactions that move no tokens (data-only, contract calls).
    pub is_payment: bool,
    pub sender: String,
    pub recipient: Option<String>,
    pub amount: PaymentAmount,
    pub currency_type: CurrencyType,
}

pub trait PaymentVerifier: Send + Sync {
    /// Fails with [`LedgerError::PaymentTransactionNotFound`] for unknown ids.
    fn verify(&self, transaction_id: &str) -> Result<PaymentTransaction, LedgerError>;
}

/// Verifier backed by a fixed table of transactions.
#[derive(Debug, Default)]
pub struct StaticPaymentVerifier {
    transactions: DashMap<String, PaymentTransaction>,
}

impl StaticPaymentVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, transaction: PaymentTransaction) {
        self.transactions
            .insert(transaction.transaction_id.clone(), transaction);
    }
}

impl PaymentVerifier for StaticPaymentVerifier {
    fn verify(&self, transaction_id: &str) -> Result<PaymentTransaction, LedgerError> {
        self.transactions
            .get(transaction_id)
            .map(|tx| tx.value().clone())
            .ok_or_else(|| LedgerError::PaymentTransactionNotFound(transaction_id.to_string()))
    }
}
