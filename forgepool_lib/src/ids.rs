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

//! Monotonic identifier allocation.
//!
//! Every mutable entity in the pool is keyed by an id handed out here. Ids
//! are never reused; exhausting a 64-bit stream is treated as memory
//! corruption and aborts the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(MinerId);
entity_id!(WorkerId);
entity_id!(ShareId);
entity_id!(RoundId);
entity_id!(PaymentId);
entity_id!(ConnId);

/// One independent counter per entity kind, all starting at 1.
#[derive(Debug, Default)]
pub struct IdAllocator {
    miners: AtomicU64,
    workers: AtomicU64,
    shares: AtomicU64,
    rounds: AtomicU64,
    payments: AtomicU64,
    connections: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(counter: &AtomicU64) -> u64 {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if previous == u64::MAX {
            // Wraparound would alias live entities and mis-attribute rewards.
            panic!("identifier stream exhausted");
        }
        previous + 1
    }

    pub fn next_miner_id(&self) -> MinerId {
        MinerId(Self::next(&self.miners))
    }

    pub fn next_worker_id(&self) -> WorkerId {
        WorkerId(Self::next(&self.workers))
    }

    pub fn next_share_id(&self) -> ShareId {
        ShareId(Self::next(&self.shares))
    }

    pub fn next_round_id(&self) -> RoundId {
        RoundId(Self::next(&self.rounds))
    }

    pub fn next_payment_id(&self) -> PaymentId {
        PaymentId(Self::next(&self.payments))
    }

    pub fn next_conn_id(&self) -> ConnId {
        ConnId(Self::next(&self.connections))
    }
}
