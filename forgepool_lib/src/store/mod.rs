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

//! The authoritative in-memory entity store.
//!
//! The store owns every miner, worker, share, round and payment. Other
//! components refer to entities by id only. The store is held exclusively by
//! the coordinator actor, which serializes all access; the `&mut self`
//! methods here are therefore atomic with respect to one another.

pub mod adapter;
pub mod miner;
pub mod payment;
pub mod round;
pub mod share;
pub mod worker;

use crate::ids::{IdAllocator, MinerId, PaymentId, WorkerId};
use crate::work::job::JobId;
use miner::Miner;
use payment::{Payment, PaymentStatus};
use round::Round;
use share::Share;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::info;

/// Shares kept in the global ring.
pub const SHARE_RING_CAPACITY: usize = 10_000;

/// How many of the oldest shares are dropped in one batch when the ring
/// overflows, keeping eviction amortized O(1).
pub const SHARE_RING_EVICTION_BATCH: usize = 1_000;

/// Closed rounds retained for the stats view.
pub const ROUND_HISTORY_CAPACITY: usize = 100;

/// A miner is active if it was seen within this window.
pub const ACTIVE_MINER_WINDOW: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Username already registered.
    AlreadyExists,
    /// Global miner cap reached.
    AtCapacity,
    /// Per-miner worker cap reached.
    PerMinerCap,
    UnknownMiner,
    UnknownWorker,
    UnknownPayment,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists => write!(f, "username already registered"),
            StoreError::AtCapacity => write!(f, "maximum miners limit reached"),
            StoreError::PerMinerCap => write!(f, "maximum workers per miner limit reached"),
            StoreError::UnknownMiner => write!(f, "miner not found"),
            StoreError::UnknownWorker => write!(f, "worker not found"),
            StoreError::UnknownPayment => write!(f, "payment not found"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Admission caps enforced by the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_miners: usize,
    pub max_workers_per_miner: usize,
}

/// Summary of a closed round, returned by [`PoolStore::close_round`].
#[derive(Debug, Clone)]
pub struct RoundStats {
    pub round: Round,
}

pub struct PoolStore {
    ids: Arc<IdAllocator>,
    limits: StoreLimits,

    miners: HashMap<MinerId, Miner>,
    username_index: HashMap<String, MinerId>,
    workers: HashMap<WorkerId, worker::Worker>,

    shares: VecDeque<Share>,
    current_round: Round,
    round_history: VecDeque<Round>,

    payments: Vec<Payment>,
    payment_index: HashMap<PaymentId, usize>,

    pub started_at: SystemTime,
}

impl PoolStore {
    pub fn new(ids: Arc<IdAllocator>, limits: StoreLimits, now: SystemTime) -> Self {
        let current_round = Round::open(ids.next_round_id(), now);
        Self {
            ids,
            limits,
            miners: HashMap::new(),
            username_index: HashMap::new(),
            workers: HashMap::new(),
            shares: VecDeque::with_capacity(SHARE_RING_CAPACITY),
            current_round,
            round_history: VecDeque::new(),
            payments: Vec::new(),
            payment_index: HashMap::new(),
            started_at: now,
        }
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    // ---- miners -----------------------------------------------------------

    pub fn register_miner(
        &mut self,
        username: &str,
        payout_address: &str,
        email: Option<String>,
        now: SystemTime,
    ) -> Result<MinerId, StoreError> {
        if self.username_index.contains_key(username) {
            return Err(StoreError::AlreadyExists);
        }
        if self.miners.len() >= self.limits.max_miners {
            return Err(StoreError::AtCapacity);
        }

        let miner_id = self.ids.next_miner_id();
        let miner = Miner::new(
            miner_id,
            username.to_string(),
            payout_address.to_string(),
            email,
            now,
        );
        self.miners.insert(miner_id, miner);
        self.username_index.insert(username.to_string(), miner_id);
        info!("Registered miner {} as {}", username, miner_id);
        Ok(miner_id)
    }

    pub fn get_miner(&self, miner_id: MinerId) -> Option<&Miner> {
        self.miners.get(&miner_id)
    }

    pub fn get_miner_mut(&mut self, miner_id: MinerId) -> Option<&mut Miner> {
        self.miners.get_mut(&miner_id)
    }

    pub fn get_miner_by_username(&self, username: &str) -> Option<&Miner> {
        self.username_index
            .get(username)
            .and_then(|id| self.miners.get(id))
    }

    pub fn update_payout_address(
        &mut self,
        miner_id: MinerId,
        new_address: &str,
    ) -> Result<(), StoreError> {
        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        miner.payout_address = new_address.to_string();
        Ok(())
    }

    pub fn miners(&self) -> impl Iterator<Item = &Miner> {
        self.miners.values()
    }

    pub fn miner_count(&self) -> usize {
        self.miners.len()
    }

    pub fn active_miner_count(&self, now: SystemTime) -> usize {
        self.miners
            .values()
            .filter(|m| {
                now.duration_since(m.last_seen)
                    .map(|age| age < ACTIVE_MINER_WINDOW)
                    .unwrap_or(true)
            })
            .count()
    }

    pub fn ban_miner(&mut self, miner_id: MinerId, until: SystemTime) -> Result<(), StoreError> {
        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        miner.banned = true;
        miner.ban_expires = Some(until);
        Ok(())
    }

    pub fn unban_miner(&mut self, miner_id: MinerId) -> Result<(), StoreError> {
        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        miner.banned = false;
        miner.ban_expires = None;
        miner.invalid_share_count = 0;
        Ok(())
    }

    // ---- workers ----------------------------------------------------------

    pub fn add_worker(
        &mut self,
        miner_id: MinerId,
        worker_name: &str,
        initial_difficulty: u64,
        ip_address: IpAddr,
        port: Option<u16>,
        now: SystemTime,
    ) -> Result<WorkerId, StoreError> {
        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        if miner.workers.len() >= self.limits.max_workers_per_miner {
            return Err(StoreError::PerMinerCap);
        }

        let worker_id = self.ids.next_worker_id();
        let worker = worker::Worker::new(
            worker_id,
            miner_id,
            worker_name.to_string(),
            initial_difficulty,
            ip_address,
            port,
            now,
        );
        miner.workers.insert(worker_id);
        miner.last_seen = now;
        self.workers.insert(worker_id, worker);
        Ok(worker_id)
    }

    /// Idempotent: removing an unknown worker is a no-op.
    pub fn remove_worker(&mut self, worker_id: WorkerId) {
        if let Some(worker) = self.workers.remove(&worker_id) {
            if let Some(miner) = self.miners.get_mut(&worker.miner_id) {
                miner.workers.remove(&worker_id);
            }
        }
    }

    pub fn get_worker(&self, worker_id: WorkerId) -> Option<&worker::Worker> {
        self.workers.get(&worker_id)
    }

    pub fn get_worker_mut(&mut self, worker_id: WorkerId) -> Option<&mut worker::Worker> {
        self.workers.get_mut(&worker_id)
    }

    pub fn miner_workers(&self, miner_id: MinerId) -> Vec<&worker::Worker> {
        self.workers
            .values()
            .filter(|w| w.miner_id == miner_id)
            .collect()
    }

    pub fn workers(&self) -> impl Iterator<Item = &worker::Worker> {
        self.workers.values()
    }

    pub fn active_worker_count(&self) -> usize {
        self.workers.values().filter(|w| w.active).count()
    }

    /// Workers idle past the timeout, for the inactivity sweep.
    pub fn inactive_workers(&self, timeout: Duration, now: SystemTime) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| {
                now.duration_since(w.last_activity)
                    .map(|idle| idle > timeout)
                    .unwrap_or(false)
            })
            .map(|w| w.worker_id)
            .collect()
    }

    // ---- shares -----------------------------------------------------------

    /// Append to the global ring and, if valid, the current round tally.
    pub fn record_share(&mut self, share: Share) {
        if share.valid {
            self.current_round.tally_share(share.miner_id);
        }
        self.shares.push_back(share);

        if self.shares.len() > SHARE_RING_CAPACITY {
            self.shares.drain(..SHARE_RING_EVICTION_BATCH);
        }
    }

    pub fn shares(&self) -> &VecDeque<Share> {
        &self.shares
    }

    /// Any earlier share with the same (job, nonce)?
    pub fn is_duplicate(&self, job_id: &JobId, nonce: u32) -> bool {
        self.shares
            .iter()
            .any(|s| s.nonce == nonce && s.job_id == *job_id)
    }

    pub fn recent_shares(&self, n: usize) -> Vec<&Share> {
        self.shares.iter().rev().take(n).collect()
    }

    pub fn miner_shares(&self, miner_id: MinerId, n: usize) -> Vec<&Share> {
        self.shares
            .iter()
            .rev()
            .filter(|s| s.miner_id == miner_id)
            .take(n)
            .collect()
    }

    /// The newest `n` valid shares, oldest first, for PPLNS windows.
    pub fn latest_valid_shares(&self, n: usize) -> Vec<&Share> {
        let mut shares: Vec<&Share> = self.shares.iter().rev().filter(|s| s.valid).take(n).collect();
        shares.reverse();
        shares
    }

    // ---- rounds -----------------------------------------------------------

    pub fn current_round(&self) -> &Round {
        &self.current_round
    }

    /// Close the open round and open a fresh one, atomically. A `None` block
    /// hash records a candidate the upstream node rejected.
    pub fn close_round(
        &mut self,
        height: u64,
        block_hash: Option<[u8; 32]>,
        reward: u64,
        found_by: Option<MinerId>,
        now: SystemTime,
    ) -> RoundStats {
        let next = Round::open(self.ids.next_round_id(), now);
        let mut closed = std::mem::replace(&mut self.current_round, next);
        closed.ended_at = Some(now);
        closed.block_height = Some(height);
        closed.block_hash = block_hash;
        closed.block_reward = reward;
        closed.found_by = found_by;
        closed.completed = true;

        if closed.ended_at < Some(closed.started_at) {
            panic!("round {} closed before it started", closed.round_id);
        }

        self.round_history.push_back(closed.clone());
        if self.round_history.len() > ROUND_HISTORY_CAPACITY {
            self.round_history.pop_front();
        }

        RoundStats { round: closed }
    }

    pub fn round_history(&self, n: usize) -> Vec<&Round> {
        self.round_history.iter().rev().take(n).collect()
    }

    /// Closed rounds that produced a block the node accepted, newest first.
    pub fn found_blocks(&self, n: usize) -> Vec<&Round> {
        self.round_history
            .iter()
            .rev()
            .filter(|r| r.block_hash.is_some())
            .take(n)
            .collect()
    }

    pub fn blocks_found_total(&self) -> u64 {
        self.round_history
            .iter()
            .filter(|r| r.block_hash.is_some())
            .count() as u64
    }

    // ---- payments ---------------------------------------------------------

    /// Credit reward base units to miners' unpaid balances.
    pub fn credit_rewards(&mut self, payouts: &HashMap<MinerId, u64>) {
        for (miner_id, amount) in payouts {
            if let Some(miner) = self.miners.get_mut(miner_id) {
                miner.unpaid_balance += amount;
            }
        }
    }

    /// Create a pending payment for the miner's full unpaid balance, moving
    /// it from unpaid to paid in the same operation.
    pub fn create_payment(
        &mut self,
        miner_id: MinerId,
        now: SystemTime,
    ) -> Result<Payment, StoreError> {
        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;

        let amount = miner.unpaid_balance;
        miner.unpaid_balance = 0;
        miner.paid_balance += amount;
        miner.last_payout = Some(now);

        let payment = Payment {
            payment_id: self.ids.next_payment_id(),
            miner_id,
            payout_address: miner.payout_address.clone(),
            amount,
            created_at: now,
            tx_hash: None,
            confirmed_at: None,
            status: PaymentStatus::Pending,
        };
        self.payment_index
            .insert(payment.payment_id, self.payments.len());
        self.payments.push(payment.clone());
        Ok(payment)
    }

    pub fn mark_payment_confirmed(
        &mut self,
        payment_id: PaymentId,
        tx_hash: [u8; 32],
        now: SystemTime,
    ) -> Result<(), StoreError> {
        let index = *self
            .payment_index
            .get(&payment_id)
            .ok_or(StoreError::UnknownPayment)?;
        let payment = &mut self.payments[index];
        payment.tx_hash = Some(tx_hash);
        payment.confirmed_at = Some(now);
        payment.status = PaymentStatus::Confirmed;
        Ok(())
    }

    /// Dispatch failed: reverse the unpaid/paid transfer and mark the record.
    pub fn mark_payment_failed(&mut self, payment_id: PaymentId) -> Result<(), StoreError> {
        let index = *self
            .payment_index
            .get(&payment_id)
            .ok_or(StoreError::UnknownPayment)?;
        let payment = &mut self.payments[index];
        if payment.status == PaymentStatus::Failed {
            return Ok(());
        }
        payment.status = PaymentStatus::Failed;
        let (miner_id, amount) = (payment.miner_id, payment.amount);

        let miner = self
            .miners
            .get_mut(&miner_id)
            .ok_or(StoreError::UnknownMiner)?;
        if miner.paid_balance < amount {
            panic!(
                "payment {} reversal underflows miner {} paid balance",
                payment_id, miner_id
            );
        }
        miner.paid_balance -= amount;
        miner.unpaid_balance += amount;
        Ok(())
    }

    pub fn payment_history(&self, n: usize) -> Vec<&Payment> {
        self.payments.iter().rev().take(n).collect()
    }

    pub fn miner_payments(&self, miner_id: MinerId, n: usize) -> Vec<&Payment> {
        self.payments
            .iter()
            .rev()
            .filter(|p| p.miner_id == miner_id)
            .take(n)
            .collect()
    }
}
