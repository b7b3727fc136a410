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

//! Reward distribution arithmetic.
//!
//! Every calculator returns base units per miner. The pool fee comes off the
//! block reward first; the remainder is distributed and rounding drift
//! accrues to the pool. Integer arithmetic only — nothing here is allowed to
//! touch floating point.

use crate::ids::MinerId;
use serde::Deserialize;
use std::collections::HashMap;

/// Which calculator a pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayoutMethod {
    Pplns,
    Pps,
    Proportional,
    Solo,
}

/// The slice of a share the calculators care about.
#[derive(Debug, Clone, Copy)]
pub struct ShareSample {
    pub miner_id: MinerId,
}

/// `floor(amount * fee_percent / 100)`, through u128 so large rewards
/// cannot overflow the product. Percentages cap at 100.
pub fn pool_fee(amount: u64, fee_percent: u64) -> u64 {
    let fee_percent = fee_percent.min(100);
    ((amount as u128 * fee_percent as u128) / 100) as u64
}

fn split_by_counts(
    counts: &HashMap<MinerId, u64>,
    total: u64,
    net: u64,
) -> HashMap<MinerId, u64> {
    let mut payouts = HashMap::new();
    if total == 0 {
        return payouts;
    }
    for (miner_id, count) in counts {
        let amount = ((net as u128 * *count as u128) / total as u128) as u64;
        payouts.insert(*miner_id, amount);
    }
    payouts
}

/// Pay Per Last N Shares. `shares` must already be the latest
/// `min(N, total)` valid shares (the store's PPLNS window query).
pub fn pplns(
    shares: &[ShareSample],
    block_reward: u64,
    fee_percent: u64,
) -> HashMap<MinerId, u64> {
    let net = block_reward - pool_fee(block_reward, fee_percent);

    let mut counts: HashMap<MinerId, u64> = HashMap::new();
    for share in shares {
        *counts.entry(share.miner_id).or_insert(0) += 1;
    }
    split_by_counts(&counts, shares.len() as u64, net)
}

/// Pay Per Share: each valid share in the accounting batch is worth
/// `floor(net / expected_shares)` with `expected_shares =
/// max(network_difficulty / share_difficulty, 1)`. The batch arrives as a
/// per-miner tally of valid shares; invalid shares never reach it.
pub fn pps(
    valid_share_counts: &HashMap<MinerId, u64>,
    network_difficulty: u64,
    share_difficulty: u64,
    block_reward: u64,
    fee_percent: u64,
) -> HashMap<MinerId, u64> {
    let net = block_reward - pool_fee(block_reward, fee_percent);
    let expected_shares = if share_difficulty == 0 {
        1
    } else {
        (network_difficulty / share_difficulty).max(1)
    };
    let per_share = net / expected_shares;

    let mut payouts = HashMap::new();
    for (miner_id, count) in valid_share_counts {
        payouts.insert(*miner_id, per_share.saturating_mul(*count));
    }
    payouts
}

/// Proportional: the PPLNS formula restricted to the closing round's tally.
pub fn proportional(
    round_tally: &HashMap<MinerId, u64>,
    block_reward: u64,
    fee_percent: u64,
) -> HashMap<MinerId, u64> {
    let net = block_reward - pool_fee(block_reward, fee_percent);
    let total: u64 = round_tally.values().sum();
    split_by_counts(round_tally, total, net)
}

/// Solo: the block finder takes the whole net reward.
pub fn solo(finder: MinerId, block_reward: u64, fee_percent: u64) -> HashMap<MinerId, u64> {
    let net = block_reward - pool_fee(block_reward, fee_percent);
    let mut payouts = HashMap::new();
    payouts.insert(finder, net);
    payouts
}
