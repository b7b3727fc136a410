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

use crate::ids::{MinerId, RoundId};
use std::collections::HashMap;
use std::time::SystemTime;

/// The interval between two pool-found blocks. Exactly one round is open at
/// any instant; closing one opens the next atomically.
#[derive(Debug, Clone)]
pub struct Round {
    pub round_id: RoundId,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,

    pub shares_submitted: u64,
    /// Accepted shares per miner within this round.
    pub miner_shares: HashMap<MinerId, u64>,

    // Set on closure
    pub block_height: Option<u64>,
    /// None when the upstream node rejected our candidate block.
    pub block_hash: Option<[u8; 32]>,
    pub block_reward: u64,
    /// Miner whose share closed the round.
    pub found_by: Option<MinerId>,
    pub completed: bool,
}

impl Round {
    pub fn open(round_id: RoundId, now: SystemTime) -> Self {
        Self {
            round_id,
            started_at: now,
            ended_at: None,
            shares_submitted: 0,
            miner_shares: HashMap::new(),
            block_height: None,
            block_hash: None,
            block_reward: 0,
            found_by: None,
            completed: false,
        }
    }

    pub fn tally_share(&mut self, miner_id: MinerId) {
        self.shares_submitted += 1;
        *self.miner_shares.entry(miner_id).or_insert(0) += 1;
    }
}
