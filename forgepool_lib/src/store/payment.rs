// Copyright (C) 2025 Forgepool Developers (see AUTHORS)
//
// This file is part of Forgepool
//
// Forgepool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Forgepool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Forgepool. If not, see <https://www.gnu.org/licenses/>.

use crate::ids::{MinerId, PaymentId};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// An intent to pay a miner. The on-chain transaction is built elsewhere;
/// the pool records the intent and the dispatcher's outcome.
#[derive(Debug, Clone)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub miner_id: MinerId,
    /// Snapshot of the miner's payout address at creation time.
    pub payout_address: String,
    pub amount: u64,
    pub created_at: SystemTime,
    pub tx_hash: Option<[u8; 32]>,
    pub confirmed_at: Option<SystemTime>,
    pub status: PaymentStatus,
}
