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

//! Balance reservations for pending uploads.
//!
//! ```text
//!   create ──► Reserved ──► Finalized
//!                  └──────► Refunded   (credits the reserved amount back)
//! ```
//!
//! The `data_item_id` is the idempotency key: one data item reserves at most
//! once, however often the request is repeated.

use crate::adjustment::{Adjustment, apply_adjustments};
use crate::base::{DataItemId, ReservationId, UserAddress};
use crate::catalog::{AdjustmentCatalog, CatalogStore};
use crate::clock::Clock;
use crate::error::LedgerError;
use crate::ledger::{BalanceLedger, ChangeReason};
use crate::money::Winc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Finalized,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReservation {
    pub reservation_id: ReservationId,
    pub data_item_id: DataItemId,
    pub user_address: UserAddress,
    pub reserved_date: DateTime<Utc>,
    /// Amount taken from the balance, after upload adjustments.
    pub reserved_winc_amount: Winc,
    /// Unadjusted network price.
    pub network_winc_amount: Winc,
    pub adjustments: Vec<Adjustment>,
    pub status: ReservationStatus,
}

pub struct ReservationManager {
    reservations: DashMap<DataItemId, BalanceReservation>,
    by_id: DashMap<ReservationId, DataItemId>,
    ledger: Arc<BalanceLedger>,
    catalogs: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    winc_floor: Winc,
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        catalogs: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        winc_floor: Winc,
    ) -> Self {
        Self {
            reservations: DashMap::new(),
            by_id: DashMap::new(),
            ledger,
            catalogs,
            clock,
            winc_floor,
        }
    }

    /// Reserves the adjusted price of `data_item_id` against `user`, using
    /// the upload catalogs active now.
    pub fn create_reservation(
        &self,
        data_item_id: &DataItemId,
        user: &UserAddress,
        network_winc_amount: Winc,
    ) -> Result<BalanceReservation, LedgerError> {
        let catalogs = self.catalogs.upload_catalogs(self.clock.now());
        self.create_reservation_with_catalogs(data_item_id, user, network_winc_amount, &catalogs)
    }

    /// Reserves using an explicit catalog set.
    ///
    /// A repeated `data_item_id` returns the stored reservation without
    /// touching the balance. A failed ledger reservation stores nothing.
    pub fn create_reservation_with_catalogs(
        &self,
        data_item_id: &DataItemId,
        user: &UserAddress,
        network_winc_amount: Winc,
        catalogs: &[AdjustmentCatalog],
    ) -> Result<BalanceReservation, LedgerError> {
        match self.reservations.entry(data_item_id.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.user_address != *user {
                    log::warn!(
                        "data item {data_item_id} already reserved by {}, rejected for {user}",
                        existing.user_address
                    );
                    return Err(LedgerError::BadRequest(format!(
                        "Data item '{data_item_id}' is already reserved by another user"
                    )));
                }
                log::debug!("data item {data_item_id} already reserved, returning existing reservation");
                Ok(existing.clone())
            }
            Entry::Vacant(entry) => {
                let outcome = apply_adjustments(network_winc_amount, catalogs, self.winc_floor)?;
                let reservation_id = ReservationId::generate();
                self.ledger.reserve(
                    user,
                    outcome.final_amount,
                    ChangeReason::Upload,
                    Some(reservation_id.as_str()),
                )?;

                let reservation = BalanceReservation {
                    reservation_id: reservation_id.clone(),
                    data_item_id: data_item_id.clone(),
                    user_address: user.clone(),
                    reserved_date: self.clock.now(),
                    reserved_winc_amount: outcome.final_amount,
                    network_winc_amount,
                    adjustments: outcome.adjustments,
                    status: ReservationStatus::Reserved,
                };
                self.by_id.insert(reservation_id, data_item_id.clone());
                entry.insert(reservation.clone());
                log::info!(
                    "reserved {} winc (network price {}) for {user}, data item {data_item_id}",
                    reservation.reserved_winc_amount,
                    network_winc_amount
                );
                Ok(reservation)
            }
        }
    }

    /// Marks the upload complete. The balance is not touched.
    pub fn finalize_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        let data_item_id = self.data_item_of(reservation_id)?;
        let mut reservation = self
            .reservations
            .get_mut(&data_item_id)
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.clone()))?;

        match reservation.status {
            ReservationStatus::Reserved => {
                reservation.status = ReservationStatus::Finalized;
                log::debug!("finalized reservation {reservation_id}");
            }
            ReservationStatus::Finalized => {}
            ReservationStatus::Refunded => {
                return Err(LedgerError::ReservationAlreadyRefunded(data_item_id));
            }
        }
        Ok(reservation.clone())
    }

    /// Returns the reserved credits to the user. Terminal reservations are
    /// returned unchanged.
    pub fn refund_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        let data_item_id = self.data_item_of(reservation_id)?;
        let mut reservation = self
            .reservations
            .get_mut(&data_item_id)
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.clone()))?;

        if reservation.status == ReservationStatus::Reserved {
            self.ledger.refund(
                &reservation.user_address,
                reservation.reserved_winc_amount,
                ChangeReason::Refund,
                Some(reservation_id.as_str()),
            )?;
            reservation.status = ReservationStatus::Refunded;
            log::info!(
                "refunded {} winc to {} for data item {data_item_id}",
                reservation.reserved_winc_amount,
                reservation.user_address
            );
        }
        Ok(reservation.clone())
    }

    pub fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<BalanceReservation, LedgerError> {
        let data_item_id = self.data_item_of(reservation_id)?;
        self.reservations
            .get(&data_item_id)
            .map(|reservation| reservation.value().clone())
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.clone()))
    }

    pub fn reservation_for_data_item(&self, data_item_id: &DataItemId) -> Option<BalanceReservation> {
        self.reservations
            .get(data_item_id)
            .map(|reservation| reservation.value().clone())
    }

    // The index guard is dropped before the caller touches `reservations`.
    fn data_item_of(&self, reservation_id: &ReservationId) -> Result<DataItemId, LedgerError> {
        self.by_id
            .get(reservation_id)
            .map(|data_item| data_item.value().clone())
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.clone()))
    }
}
