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
use std::net::IpAddr;
use std::time::SystemTime;

/// Recent-share timestamps kept per worker, newest last.
pub const RECENT_SHARE_WINDOW: usize = 100;

/// A single mining endpoint, bound to exactly one miner and one connection.
#[derive(Debug, Clone)]
pub struct Worker {
    pub worker_id: WorkerId,
    pub miner_id: MinerId,
    pub worker_name: String,
    pub user_agent: Option<String>,

    pub current_difficulty: u64,
    /// Bounded window of recent accepted-share times, newest last.
    pub recent_share_times: Vec<SystemTime>,
    pub last_share_time: Option<SystemTime>,

    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub shares_stale: u64,
    pub shares_duplicate: u64,
    pub blocks_found: u64,

    pub ip_address: IpAddr,
    pub port: Option<u16>,
    pub connected_at: SystemTime,
    pub last_activity: SystemTime,
    pub active: bool,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: WorkerId,
        miner_id: MinerId,
        worker_name: String,
        initial_difficulty: u64,
        ip_address: IpAddr,
        port: Option<u16>,
        now: SystemTime,
    ) -> Self {
        Self {
            worker_id,
            miner_id,
            worker_name,
            user_agent: None,
            current_difficulty: initial_difficulty,
            recent_share_times: Vec::new(),
            last_share_time: None,
            shares_accepted: 0,
            shares_rejected: 0,
            shares_stale: 0,
            shares_duplicate: 0,
            blocks_found: 0,
            ip_address,
            port,
            connected_at: now,
            last_activity: now,
            active: true,
        }
    }

    /// Record an accepted share's timestamp, evicting the oldest entry once
    /// the window is full.
    pub fn record_share_time(&mut self, timestamp: SystemTime) {
        self.recent_share_times.push(timestamp);
        if self.recent_share_times.len() > RECENT_SHARE_WINDOW {
            self.recent_share_times.remove(0);
        }
        self.last_share_time = Some(timestamp);
    }
}
