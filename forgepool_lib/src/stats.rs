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

//! Read-only aggregation over the entity store.
//!
//! Everything here is computed inside the coordinator actor, so one call
//! sees one consistent store snapshot. Hashrate, efficiency and luck are
//! display metrics and the only place floats are allowed.

use crate::store::{miner::Miner, payment::PaymentStatus, round::Round, PoolStore};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Window for pool and miner hashrate estimation.
const POOL_HASHRATE_WINDOW: Duration = Duration::from_secs(600);

/// Window for per-worker hashrate estimation.
const WORKER_HASHRATE_WINDOW: Duration = Duration::from_secs(300);

/// Confirmations at which a found block counts as final.
const CONFIRMATION_DEPTH: u64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_name: String,
    pub hashrate: f64,
    pub network_difficulty: u64,
    pub network_height: u64,
    pub active_miners: usize,
    pub active_workers: usize,
    pub blocks_found: u64,
    pub total_shares: u64,
    pub valid_shares_last_hour: u64,
    pub valid_shares_last_24h: u64,
    pub shares_this_round: u64,
    pub efficiency: f64,
    pub luck: f64,
    pub uptime_s: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockInfo {
    pub height: u64,
    pub hash_hex: Option<String>,
    pub timestamp_ms: u64,
    pub finder_address: Option<String>,
    pub reward_base_units: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInfo {
    pub payment_id: u64,
    pub miner_id: u64,
    pub address: String,
    pub amount_base_units: u64,
    pub tx_hash_hex: Option<String>,
    pub timestamp_ms: u64,
    pub is_confirmed: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopMinerInfo {
    pub address: String,
    pub hashrate: f64,
    pub workers: usize,
    pub accepted_shares: u64,
    pub unpaid_balance: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinerStatsInfo {
    pub address: String,
    pub hashrate: f64,
    pub accepted_shares: u64,
    pub unpaid_balance: u64,
    pub paid_balance: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundInfo {
    pub round_id: u64,
    pub started_at_ms: u64,
    pub shares_submitted: u64,
    pub miners: usize,
}

pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `Σ(share.difficulty) × 2³² / window` over valid shares in the window.
pub fn pool_hashrate(store: &PoolStore, now: SystemTime) -> f64 {
    hashrate_filtered(store, now, POOL_HASHRATE_WINDOW, |_| true)
}

pub fn miner_hashrate(store: &PoolStore, miner_id: crate::ids::MinerId, now: SystemTime) -> f64 {
    hashrate_filtered(store, now, POOL_HASHRATE_WINDOW, |s| s.miner_id == miner_id)
}

pub fn worker_hashrate(store: &PoolStore, worker_id: crate::ids::WorkerId, now: SystemTime) -> f64 {
    hashrate_filtered(store, now, WORKER_HASHRATE_WINDOW, |s| {
        s.worker_id == worker_id
    })
}

fn hashrate_filtered(
    store: &PoolStore,
    now: SystemTime,
    window: Duration,
    filter: impl Fn(&crate::store::share::Share) -> bool,
) -> f64 {
    let cutoff = now.checked_sub(window).unwrap_or(UNIX_EPOCH);
    let total_difficulty: u64 = store
        .shares()
        .iter()
        .filter(|s| s.valid && s.timestamp >= cutoff && filter(s))
        .map(|s| s.difficulty)
        .sum();
    (total_difficulty as f64 * 4_294_967_296.0) / window.as_secs_f64()
}

/// Valid shares / all shares over the ring.
pub fn efficiency(store: &PoolStore) -> f64 {
    let total = store.shares().len();
    if total == 0 {
        return 1.0;
    }
    let valid = store.shares().iter().filter(|s| s.valid).count();
    valid as f64 / total as f64
}

/// Actual blocks over expected blocks since the server started.
pub fn luck(
    store: &PoolStore,
    network_difficulty: u64,
    target_block_time: Duration,
    now: SystemTime,
) -> f64 {
    let elapsed = now
        .duration_since(store.started_at)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    if elapsed == 0.0 || network_difficulty == 0 {
        return 0.0;
    }
    let network_hashrate =
        (network_difficulty as f64 * 4_294_967_296.0) / target_block_time.as_secs_f64();
    if network_hashrate == 0.0 {
        return 0.0;
    }
    let expected = (pool_hashrate(store, now) / network_hashrate) * elapsed
        / target_block_time.as_secs_f64();
    if expected == 0.0 {
        return 0.0;
    }
    store.blocks_found_total() as f64 / expected
}

fn valid_shares_since(store: &PoolStore, cutoff: SystemTime) -> u64 {
    store
        .shares()
        .iter()
        .filter(|s| s.valid && s.timestamp >= cutoff)
        .count() as u64
}

pub fn pool_stats(
    store: &PoolStore,
    pool_name: &str,
    network_difficulty: u64,
    network_height: u64,
    target_block_time: Duration,
    now: SystemTime,
) -> PoolStats {
    PoolStats {
        pool_name: pool_name.to_string(),
        hashrate: pool_hashrate(store, now),
        network_difficulty,
        network_height,
        active_miners: store.active_miner_count(now),
        active_workers: store.active_worker_count(),
        blocks_found: store.blocks_found_total(),
        // Lifetime total; the ring only covers the recent window
        total_shares: store.miners().map(|m| m.shares_accepted).sum(),
        valid_shares_last_hour: valid_shares_since(
            store,
            now.checked_sub(Duration::from_secs(3_600)).unwrap_or(UNIX_EPOCH),
        ),
        valid_shares_last_24h: valid_shares_since(
            store,
            now.checked_sub(Duration::from_secs(86_400)).unwrap_or(UNIX_EPOCH),
        ),
        shares_this_round: store.current_round().shares_submitted,
        efficiency: efficiency(store),
        luck: luck(store, network_difficulty, target_block_time, now),
        uptime_s: now
            .duration_since(store.started_at)
            .unwrap_or(Duration::ZERO)
            .as_secs(),
    }
}

fn block_status(round: &Round, network_height: u64) -> String {
    let Some(height) = round.block_height else {
        return "pending".to_string();
    };
    if round.block_hash.is_none() {
        return "orphaned".to_string();
    }
    if network_height < height {
        return "pending".to_string();
    }
    let depth = network_height - height;
    if depth >= CONFIRMATION_DEPTH {
        "confirmed".to_string()
    } else if depth >= 1 {
        "confirming".to_string()
    } else {
        "pending".to_string()
    }
}

pub fn recent_blocks(store: &PoolStore, network_height: u64, limit: usize) -> Vec<BlockInfo> {
    store
        .found_blocks(limit)
        .into_iter()
        .map(|round| BlockInfo {
            height: round.block_height.unwrap_or(0),
            hash_hex: round.block_hash.map(hex::encode),
            timestamp_ms: round.ended_at.map(unix_millis).unwrap_or(0),
            finder_address: round
                .found_by
                .and_then(|id| store.get_miner(id))
                .map(|m| m.payout_address.clone()),
            reward_base_units: round.block_reward,
            status: block_status(round, network_height),
        })
        .collect()
}

pub fn recent_payments(store: &PoolStore, limit: usize) -> Vec<PaymentInfo> {
    store
        .payment_history(limit)
        .into_iter()
        .map(|payment| PaymentInfo {
            payment_id: payment.payment_id.0,
            miner_id: payment.miner_id.0,
            address: payment.payout_address.clone(),
            amount_base_units: payment.amount,
            tx_hash_hex: payment.tx_hash.map(hex::encode),
            timestamp_ms: unix_millis(payment.created_at),
            is_confirmed: payment.status == PaymentStatus::Confirmed,
            status: payment.status.as_str().to_string(),
        })
        .collect()
}

pub fn top_miners(store: &PoolStore, limit: usize, now: SystemTime) -> Vec<TopMinerInfo> {
    let mut miners: Vec<TopMinerInfo> = store
        .miners()
        .map(|miner| TopMinerInfo {
            address: miner.payout_address.clone(),
            hashrate: miner_hashrate(store, miner.miner_id, now),
            workers: miner.workers.len(),
            accepted_shares: miner.shares_accepted,
            unpaid_balance: miner.unpaid_balance,
        })
        .collect();
    miners.sort_by(|a, b| b.hashrate.total_cmp(&a.hashrate));
    miners.truncate(limit);
    miners
}

pub fn miner_stats(store: &PoolStore, miner: &Miner, now: SystemTime) -> MinerStatsInfo {
    MinerStatsInfo {
        address: miner.payout_address.clone(),
        hashrate: miner_hashrate(store, miner.miner_id, now),
        accepted_shares: miner.shares_accepted,
        unpaid_balance: miner.unpaid_balance,
        paid_balance: miner.paid_balance,
    }
}

pub fn current_round(store: &PoolStore) -> RoundInfo {
    let round = store.current_round();
    RoundInfo {
        round_id: round.round_id.0,
        started_at_ms: unix_millis(round.started_at),
        shares_submitted: round.shares_submitted,
        miners: round.miner_shares.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{IdAllocator, MinerId};
    use crate::store::share::Share;
    use crate::store::{PoolStore, StoreLimits};
    use crate::work::job::JobId;
    use std::sync::Arc;

    fn test_store(now: SystemTime) -> PoolStore {
        PoolStore::new(
            Arc::new(IdAllocator::new()),
            StoreLimits {
                max_miners: 100,
                max_workers_per_miner: 10,
            },
            now,
        )
    }

    fn seed_share(
        store: &mut PoolStore,
        miner_id: MinerId,
        difficulty: u64,
        timestamp: SystemTime,
        valid: bool,
    ) {
        let share = Share {
            share_id: store.ids().next_share_id(),
            miner_id,
            worker_id: crate::ids::WorkerId(1),
            worker_name: "rig0".to_string(),
            job_id: JobId([1u8; 32]),
            nonce: store.shares().len() as u32,
            extranonce2: "00000000".to_string(),
            hash: [0u8; 32],
            difficulty,
            timestamp,
            valid,
            is_block: false,
            reject_reason: None,
        };
        store.record_share(share);
    }

    #[test]
    fn test_pool_hashrate_window() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();

        // Two shares inside the window, one far outside
        seed_share(&mut store, miner_id, 10_000, now, true);
        seed_share(&mut store, miner_id, 10_000, now - Duration::from_secs(30), true);
        seed_share(&mut store, miner_id, 10_000, now - Duration::from_secs(3_600), true);

        let expected = (20_000f64 * 4_294_967_296.0) / 600.0;
        assert_eq!(pool_hashrate(&store, now), expected);
    }

    #[test]
    fn test_worker_hashrate_uses_short_window() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();

        // One share inside the 300s worker window, one outside it but
        // inside the 600s miner window
        seed_share(&mut store, miner_id, 10_000, now - Duration::from_secs(100), true);
        seed_share(&mut store, miner_id, 10_000, now - Duration::from_secs(400), true);

        let worker_id = crate::ids::WorkerId(1);
        let expected_worker = (10_000f64 * 4_294_967_296.0) / 300.0;
        assert_eq!(worker_hashrate(&store, worker_id, now), expected_worker);

        let expected_miner = (20_000f64 * 4_294_967_296.0) / 600.0;
        assert_eq!(miner_hashrate(&store, miner_id, now), expected_miner);
    }

    #[test]
    fn test_hashrate_ignores_invalid_shares() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();
        seed_share(&mut store, miner_id, 10_000, now, false);
        assert_eq!(pool_hashrate(&store, now), 0.0);
    }

    #[test]
    fn test_efficiency() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();
        assert_eq!(efficiency(&store), 1.0);

        seed_share(&mut store, miner_id, 10_000, now, true);
        seed_share(&mut store, miner_id, 10_000, now, true);
        seed_share(&mut store, miner_id, 10_000, now, false);
        assert!((efficiency(&store) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_block_status_tiers() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();
        store.close_round(1_000, Some([1u8; 32]), 5_000, Some(miner_id), now);

        // 0 confirmations past the block height
        let blocks = recent_blocks(&store, 1_000, 10);
        assert_eq!(blocks[0].status, "pending");

        let blocks = recent_blocks(&store, 1_001, 10);
        assert_eq!(blocks[0].status, "confirming");

        let blocks = recent_blocks(&store, 1_099, 10);
        assert_eq!(blocks[0].status, "confirming");

        let blocks = recent_blocks(&store, 1_100, 10);
        assert_eq!(blocks[0].status, "confirmed");
    }

    #[test]
    fn test_rejected_candidates_are_not_blocks() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        store.close_round(1_000, None, 0, None, now);
        assert!(recent_blocks(&store, 2_000, 10).is_empty());
        assert_eq!(store.blocks_found_total(), 0);
    }

    #[test]
    fn test_top_miners_sorted_by_hashrate() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let low = store
            .register_miner("loweraddressxxxxxxxxx", "low-addr", None, now)
            .unwrap();
        let high = store
            .register_miner("higheraddressxxxxxxxx", "high-addr", None, now)
            .unwrap();

        seed_share(&mut store, low, 10_000, now, true);
        seed_share(&mut store, high, 90_000, now, true);

        let top = top_miners(&store, 10, now);
        assert_eq!(top[0].address, "high-addr");
        assert_eq!(top[1].address, "low-addr");

        let top = top_miners(&store, 1, now);
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_current_round_info() {
        let now = SystemTime::now();
        let mut store = test_store(now);
        let miner_id = store
            .register_miner("mineraddressxxxxxxxxx", "a", None, now)
            .unwrap();
        seed_share(&mut store, miner_id, 10_000, now, true);

        let info = current_round(&store);
        assert_eq!(info.shares_submitted, 1);
        assert_eq!(info.miners, 1);
    }

    #[test]
    fn test_luck_zero_without_shares() {
        let now = SystemTime::now();
        let store = test_store(now - Duration::from_secs(60));
        assert_eq!(
            luck(&store, 1_000_000, Duration::from_secs(120), now),
            0.0
        );
    }
}
