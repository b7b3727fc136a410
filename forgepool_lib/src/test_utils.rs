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

//! Fixtures shared by the unit and integration test suites: a scriptable
//! upstream node, canned templates, and a tiny CPU miner that works from
//! `mining.notify` params exactly the way a real miner would.

use crate::coordinator::PoolSettings;
use crate::rewards::PayoutMethod;
use crate::store::StoreLimits;
use crate::vardiff::VardiffConfig;
use crate::work::notify::swap_four_byte_chunks;
use bitcoin_hashes::{sha256d, Hash};
use noderpc::{NodeRpc, NodeRpcError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Coordinator settings with test-friendly knobs; tweak fields per test.
pub fn test_settings() -> PoolSettings {
    PoolSettings {
        pool_name: "testpool".to_string(),
        payout_address: "pooladdressxxxxxxxxxxxxx".to_string(),
        initial_difficulty: 16_000,
        vardiff: VardiffConfig {
            target_share_time: 10,
            retarget_interval: 30,
            variance: 0.3,
            min_difficulty: 1_000,
            max_difficulty: 1_000_000,
        },
        payout_method: PayoutMethod::Pplns,
        pplns_window: 1_000,
        pool_fee_percent: 1,
        min_payout: 1_000_000,
        payout_interval: Duration::from_secs(3_600),
        ban_on_invalid_share: false,
        max_invalid_shares: 50,
        ban_duration: Duration::from_secs(600),
        connection_timeout: Duration::from_secs(300),
        // Long enough that tests drive refreshes explicitly
        template_refresh_interval: Duration::from_secs(3_600),
        target_block_time: Duration::from_secs(120),
        limits: StoreLimits {
            max_miners: 100,
            max_workers_per_miner: 4,
        },
    }
}

/// A block template whose coinbase splits at offset 42 with an 8-byte
/// extranonce region. `prev_suffix` varies the previous-block reference so
/// tests can force (or avoid) clean-jobs rotations.
pub fn sample_template(height: u64, prev_suffix: u8) -> serde_json::Value {
    let coinbase_data = format!("{}{}{}", "01".repeat(42), "00".repeat(8), "02".repeat(20));
    serde_json::json!({
        "version": 2,
        "previousblockhash": format!("{}{:02x}", "00".repeat(31), prev_suffix),
        "transactions": [
            { "data": coinbase_data, "txid": "aa".repeat(32) },
        ],
        "extranonce_offset": 42,
        "coinbasevalue": 105_113_636u64,
        "target": "7fffff0000000000000000000000000000000000000000000000000000000000",
        "curtime": 1_700_000_000u64,
        // Regtest-style easy bits so tests can actually mine blocks
        "bits": "207fffff",
        "height": height,
    })
}

/// Scriptable upstream node.
pub struct StubNode {
    template: Mutex<Option<serde_json::Value>>,
    difficulty: Mutex<u64>,
    height: Mutex<u64>,
    fail_submit: AtomicBool,
    submitted: Mutex<Vec<String>>,
}

impl StubNode {
    /// A node that errors on every call.
    pub fn offline() -> Self {
        Self {
            template: Mutex::new(None),
            difficulty: Mutex::new(0),
            height: Mutex::new(0),
            fail_submit: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_template(template: serde_json::Value) -> Self {
        let node = Self::offline();
        *node.template.lock().unwrap() = Some(template);
        *node.difficulty.lock().unwrap() = 1_000_000;
        node
    }

    pub fn set_template(&self, template: serde_json::Value) {
        *self.template.lock().unwrap() = Some(template);
    }

    pub fn set_height(&self, height: u64) {
        *self.height.lock().unwrap() = height;
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// Block hexes the pool has submitted so far.
    pub fn submitted_blocks(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

impl NodeRpc for StubNode {
    async fn get_block_template(&self, _payout_address: &str) -> Result<String, NodeRpcError> {
        match self.template.lock().unwrap().clone() {
            Some(template) => Ok(template.to_string()),
            None => Err(NodeRpcError::Other("node offline".to_string())),
        }
    }

    async fn submit_block(&self, block_hex: &str) -> Result<(), NodeRpcError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(NodeRpcError::RpcError {
                code: -25,
                message: "bad-prevblk".to_string(),
            });
        }
        self.submitted.lock().unwrap().push(block_hex.to_string());
        Ok(())
    }

    async fn get_difficulty(&self) -> Result<u64, NodeRpcError> {
        Ok(*self.difficulty.lock().unwrap())
    }

    async fn get_best_height(&self) -> Result<u64, NodeRpcError> {
        Ok(*self.height.lock().unwrap())
    }
}

/// The notify fields a miner needs, parsed from a broadcast frame.
#[derive(Debug, Clone)]
pub struct MinerJob {
    pub job_id: String,
    pub prev_hash_display: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branches: Vec<String>,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub clean_jobs: bool,
}

impl MinerJob {
    /// Parse a serialized `mining.notify` line.
    pub fn from_notify_line(line: &str) -> Option<MinerJob> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        if value.get("method").and_then(|m| m.as_str()) != Some("mining.notify") {
            return None;
        }
        let params = value.get("params")?.as_array()?;
        Some(MinerJob {
            job_id: params[0].as_str()?.to_string(),
            prev_hash_display: swap_four_byte_chunks(params[1].as_str()?).ok()?,
            coinbase1: params[2].as_str()?.to_string(),
            coinbase2: params[3].as_str()?.to_string(),
            merkle_branches: params[4]
                .as_array()?
                .iter()
                .map(|b| b.as_str().unwrap_or_default().to_string())
                .collect(),
            version: u32::from_str_radix(params[5].as_str()?, 16).ok()?,
            nbits: u32::from_str_radix(params[6].as_str()?, 16).ok()?,
            ntime: u32::from_str_radix(params[7].as_str()?, 16).ok()?,
            clean_jobs: params[8].as_bool()?,
        })
    }

    /// Compute the big-endian header hash for one nonce, the way a miner
    /// does: coinbase from the split halves, merkle fold, 80-byte header.
    pub fn share_hash(&self, extranonce1: &str, extranonce2: &str, nonce: u32) -> [u8; 32] {
        let coinbase_hex = format!(
            "{}{}{}{}",
            self.coinbase1, extranonce1, extranonce2, self.coinbase2
        );
        let coinbase = hex::decode(&coinbase_hex).expect("coinbase hex");

        let mut root = sha256d::Hash::hash(&coinbase).to_byte_array();
        for branch in &self.merkle_branches {
            let branch_bytes: [u8; 32] = hex::decode(branch)
                .expect("branch hex")
                .try_into()
                .expect("branch length");
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&root);
            buf[32..].copy_from_slice(&branch_bytes);
            root = sha256d::Hash::hash(&buf).to_byte_array();
        }

        let prev_display = hex::decode(&self.prev_hash_display).expect("prev hex");
        let mut prev_internal = [0u8; 32];
        for (i, byte) in prev_display.iter().enumerate() {
            prev_internal[31 - i] = *byte;
        }

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&prev_internal);
        header[36..68].copy_from_slice(&root);
        header[68..72].copy_from_slice(&self.ntime.to_le_bytes());
        header[72..76].copy_from_slice(&self.nbits.to_le_bytes());
        header[76..80].copy_from_slice(&nonce.to_le_bytes());

        let mut hash = sha256d::Hash::hash(&header).to_byte_array();
        hash.reverse();
        hash
    }

    /// Grind nonces until `accept` holds for the hash. Returns the nonce.
    pub fn mine(
        &self,
        extranonce1: &str,
        extranonce2: &str,
        accept: impl Fn(&[u8; 32]) -> bool,
    ) -> Option<u32> {
        (0..1_000_000u32).find(|&nonce| accept(&self.share_hash(extranonce1, extranonce2, nonce)))
    }

    pub fn ntime_hex(&self) -> String {
        format!("{:08x}", self.ntime)
    }
}
