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

//! Balance ledger.
//!
//! The ledger is the only owner of user balances. Every mutation runs under
//! the user's account lock, changes the balance, and appends exactly one
//! audit entry; on error nothing changes.
//!
//! ```text
//!   reserve / debit ──► balance -= amount   (fails below zero)
//!   credit / refund ──► balance += amount
//!   every mutation  ──► audit entry, sum(audit deltas) == balance
//! ```
//!
//! Mutations carrying a `change_id` are idempotent per `(reason, change_id)`:
//! a replay returns the original audit entry.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use winc_ledger_rs::{BalanceLedger, ChangeReason, SystemClock, UserAddress, UserAddressType, Winc};
//!
//! let ledger = BalanceLedger::new(Arc::new(SystemClock::new()));
//! let user = UserAddress::from("alice");
//! ledger.create_user(&user, UserAddressType::Arweave, Default::default()).unwrap();
//! ledger.credit(&user, Winc::new(100), ChangeReason::Payment, Some("receipt-1")).unwrap();
//! assert_eq!(ledger.get_balance(&user).unwrap(), Winc::new(100));
//! ```

use crate::base::{UserAddress, UserAddressType};
use crate::clock::Clock;
use crate::error::{AmountError, LedgerError};
use crate::money::{SignedAmount, Winc};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Free-form attributes consulted by promo rules.
pub type PromotionalInfo = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Upload,
    Payment,
    AccountCreation,
    Chargeback,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_address: UserAddress,
    pub user_address_type: UserAddressType,
    pub user_creation_date: DateTime<Utc>,
    pub winston_credit_balance: Winc,
    pub promotional_info: PromotionalInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_id: u64,
    pub user_address: UserAddress,
    /// Signed change applied to the balance.
    pub winston_credit_amount: SignedAmount,
    pub change_reason: ChangeReason,
    pub change_id: Option<String>,
    pub audit_date: DateTime<Utc>,
}

#[derive(Debug)]
struct AccountData {
    user: User,
    audit: Vec<AuditLogEntry>,
    /// `(reason, change_id)` to position in `audit`.
    applied: HashMap<(ChangeReason, String), usize>,
}

impl AccountData {
    fn new(user: User) -> Self {
        Self {
            user,
            audit: Vec::new(),
            applied: HashMap::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.audit
                .iter()
                .map(|entry| entry.winston_credit_amount.value())
                .sum::<i128>(),
            i128::try_from(self.user.winston_credit_balance.value()).unwrap_or(i128::MAX),
            "Invariant violated: audit log does not add up to the balance of {}",
            self.user.user_address
        );
    }

    fn find_applied(&self, reason: ChangeReason, change_id: &str) -> Option<&AuditLogEntry> {
        self.applied
            .get(&(reason, change_id.to_string()))
            .map(|&index| &self.audit[index])
    }

    /// Applies `delta` and appends its audit entry.
    fn apply(
        &mut self,
        delta: SignedAmount,
        reason: ChangeReason,
        change_id: Option<&str>,
        audit_id: u64,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, LedgerError> {
        if let Some(change_id) = change_id
            && let Some(prior) = self.find_applied(reason, change_id)
        {
            if prior.winston_credit_amount == delta {
                return Ok(prior.clone());
            }
            return Err(LedgerError::ChangeIdConflict {
                user: self.user.user_address.clone(),
                change_id: change_id.to_string(),
            });
        }

        let balance = self
            .user
            .winston_credit_balance
            .apply_delta(delta)
            .map_err(|e| match e {
                AmountError::Negative => {
                    LedgerError::InsufficientBalance(self.user.user_address.clone())
                }
                _ => LedgerError::ArithmeticOverflow,
            })?;
        self.user.winston_credit_balance = balance;

        let entry = AuditLogEntry {
            audit_id,
            user_address: self.user.user_address.clone(),
            winston_credit_amount: delta,
            change_reason: reason,
            change_id: change_id.map(str::to_string),
            audit_date: now,
        };
        if let Some(change_id) = change_id {
            self.applied
                .insert((reason, change_id.to_string()), self.audit.len());
        }
        self.audit.push(entry.clone());
        self.assert_invariants();
        Ok(entry)
    }
}

/// Ledger account of a single user.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    fn new(user: User) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user)),
        }
    }

    pub fn balance(&self) -> Winc {
        self.inner.lock().user.winston_credit_balance
    }

    pub fn user(&self) -> User {
        self.inner.lock().user.clone()
    }

    pub fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.inner.lock().audit.clone()
    }
}

/// Owner of all user balances.
pub struct BalanceLedger {
    accounts: DashMap<UserAddress, Account>,
    next_audit_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl BalanceLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: DashMap::new(),
            next_audit_id: AtomicU64::new(1),
            clock,
        }
    }

    fn next_audit_id(&self) -> u64 {
        self.next_audit_id.fetch_add(1, Ordering::SeqCst)
    }

    fn new_user(
        &self,
        address: &UserAddress,
        address_type: UserAddressType,
        promotional_info: PromotionalInfo,
    ) -> User {
        User {
            user_address: address.clone(),
            user_address_type: address_type,
            user_creation_date: self.clock.now(),
            winston_credit_balance: Winc::ZERO,
            promotional_info,
        }
    }

    fn mutate(
        &self,
        address: &UserAddress,
        delta: SignedAmount,
        reason: ChangeReason,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        let account = self
            .accounts
            .get(address)
            .ok_or_else(|| LedgerError::UserNotFoundWarning(address.clone()))?;
        let mut data = account.inner.lock();
        let entry = data.apply(delta, reason, change_id, self.next_audit_id(), self.clock.now())?;
        log::debug!(
            "{} {} for {} ({:?}), balance now {}",
            reason_verb(reason),
            delta,
            address,
            change_id,
            data.user.winston_credit_balance
        );
        Ok(entry)
    }

    /// Provisions a user with a zero balance. Returns the existing user if
    /// the address is already known.
    pub fn create_user(
        &self,
        address: &UserAddress,
        address_type: UserAddressType,
        promotional_info: PromotionalInfo,
    ) -> Result<User, LedgerError> {
        match self.accounts.entry(address.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().user()),
            Entry::Vacant(entry) => {
                let mut data =
                    AccountData::new(self.new_user(address, address_type, promotional_info));
                data.apply(
                    SignedAmount::ZERO,
                    ChangeReason::AccountCreation,
                    None,
                    self.next_audit_id(),
                    self.clock.now(),
                )?;
                let user = data.user.clone();
                entry.insert(Account {
                    inner: Mutex::new(data),
                });
                log::info!("created user {address}");
                Ok(user)
            }
        }
    }

    /// Atomically decrements the balance; fails with
    /// [`LedgerError::InsufficientBalance`] if it would go below zero.
    pub fn reserve(
        &self,
        address: &UserAddress,
        amount: Winc,
        reason: ChangeReason,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        let delta = amount
            .as_debit()
            .map_err(|_| LedgerError::ArithmeticOverflow)?;
        self.mutate(address, delta, reason, change_id)
    }

    /// Same check-and-decrement as [`reserve`](Self::reserve), for reversals.
    pub fn debit(
        &self,
        address: &UserAddress,
        amount: Winc,
        reason: ChangeReason,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        self.reserve(address, amount, reason, change_id)
    }

    /// Increments the balance of an existing user.
    pub fn credit(
        &self,
        address: &UserAddress,
        amount: Winc,
        reason: ChangeReason,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        let delta = amount
            .as_credit()
            .map_err(|_| LedgerError::ArithmeticOverflow)?;
        self.mutate(address, delta, reason, change_id)
    }

    /// Credits funds back; the reason should be `Refund` or `Chargeback`.
    pub fn refund(
        &self,
        address: &UserAddress,
        amount: Winc,
        reason: ChangeReason,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        self.credit(address, amount, reason, change_id)
    }

    /// Credits a payment, creating the user first if needed. A new user's
    /// first entry is an `AccountCreation` entry for the full amount.
    pub fn credit_or_provision(
        &self,
        address: &UserAddress,
        address_type: UserAddressType,
        amount: Winc,
        change_id: Option<&str>,
    ) -> Result<AuditLogEntry, LedgerError> {
        let delta = amount
            .as_credit()
            .map_err(|_| LedgerError::ArithmeticOverflow)?;

        match self.accounts.entry(address.clone()) {
            Entry::Occupied(entry) => {
                let mut data = entry.get().inner.lock();
                if let Some(change_id) = change_id
                    && let Some(prior) = data.find_applied(ChangeReason::AccountCreation, change_id)
                {
                    return Ok(prior.clone());
                }
                data.apply(
                    delta,
                    ChangeReason::Payment,
                    change_id,
                    self.next_audit_id(),
                    self.clock.now(),
                )
            }
            Entry::Vacant(entry) => {
                let mut data = AccountData::new(self.new_user(
                    address,
                    address_type,
                    PromotionalInfo::new(),
                ));
                let audit = data.apply(
                    delta,
                    ChangeReason::AccountCreation,
                    change_id,
                    self.next_audit_id(),
                    self.clock.now(),
                )?;
                entry.insert(Account {
                    inner: Mutex::new(data),
                });
                log::info!("created user {address} with {amount} winc");
                Ok(audit)
            }
        }
    }

    pub fn get_balance(&self, address: &UserAddress) -> Result<Winc, LedgerError> {
        self.accounts
            .get(address)
            .map(|account| account.balance())
            .ok_or_else(|| LedgerError::UserNotFoundWarning(address.clone()))
    }

    pub fn get_user(&self, address: &UserAddress) -> Result<User, LedgerError> {
        self.accounts
            .get(address)
            .map(|account| account.user())
            .ok_or_else(|| LedgerError::UserNotFoundWarning(address.clone()))
    }

    /// Audit entries of a user, oldest first.
    pub fn audit_log(&self, address: &UserAddress) -> Result<Vec<AuditLogEntry>, LedgerError> {
        self.accounts
            .get(address)
            .map(|account| account.audit_log())
            .ok_or_else(|| LedgerError::UserNotFoundWarning(address.clone()))
    }

    /// Balances of every user, ordered by address.
    pub fn balances(&self) -> Vec<(UserAddress, Winc)> {
        let mut balances: Vec<(UserAddress, Winc)> = self
            .accounts
            .iter()
            .map(|account| (account.key().clone(), account.balance()))
            .collect();
        balances.sort();
        balances
    }
}

fn reason_verb(reason: ChangeReason) -> &'static str {
    match reason {
        ChangeReason::Upload => "reserved",
        ChangeReason::Payment => "credited",
        ChangeReason::AccountCreation => "opened",
        ChangeReason::Chargeback => "charged back",
        ChangeReason::Refund => "refunded",
    }
}
