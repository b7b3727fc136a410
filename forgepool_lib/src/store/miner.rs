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

use crate::ids::{MinerId, WorkerId};
use std::collections::BTreeSet;
use std::time::SystemTime;

/// A payout principal. Created on first authorize, lives for the server's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Miner {
    pub miner_id: MinerId,
    pub username: String,
    pub payout_address: String,
    pub email: Option<String>,

    /// Workers currently bound to this miner, by id.
    pub workers: BTreeSet<WorkerId>,

    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub blocks_found: u64,

    /// Base units credited but not yet paid out.
    pub unpaid_balance: u64,
    /// Base units moved into payments over the miner's lifetime.
    pub paid_balance: u64,
    pub last_payout: Option<SystemTime>,

    pub invalid_share_count: u64,
    pub banned: bool,
    pub ban_expires: Option<SystemTime>,

    pub registered_at: SystemTime,
    pub last_seen: SystemTime,
}

impl Miner {
    pub fn new(
        miner_id: MinerId,
        username: String,
        payout_address: String,
        email: Option<String>,
        now: SystemTime,
    ) -> Self {
        Self {
            miner_id,
            username,
            payout_address,
            email,
            workers: BTreeSet::new(),
            shares_accepted: 0,
            shares_rejected: 0,
            blocks_found: 0,
            unpaid_balance: 0,
            paid_balance: 0,
            last_payout: None,
            invalid_share_count: 0,
            banned: false,
            ban_expires: None,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Total submissions. Accepted and rejected partition every submission,
    /// so the total is derived rather than stored.
    pub fn shares_submitted(&self) -> u64 {
        self.shares_accepted + self.shares_rejected
    }

    /// An expired ban counts as no ban.
    pub fn is_banned(&self, now: SystemTime) -> bool {
        if !self.banned {
            return false;
        }
        match self.ban_expires {
            Some(expires) => now < expires,
            None => true,
        }
    }
}
