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

//! Jobs handed to miners and the reconstruction of their submissions.
//!
//! A job carries everything a miner needs to iterate nonces against one
//! block template: the coinbase split around the extranonce region, the
//! merkle branch for position zero, and the header fields. Submissions come
//! back as (extranonce2, ntime, nonce) and are rebuilt into the exact
//! 80-byte header the miner hashed.

use crate::difficulty;
use crate::work::gbt::{BlockTemplate, EXTRANONCE_REGION_SIZE};
use crate::work::WorkError;
use bitcoin_hashes::{sha256d, Hash};
use rand::RngCore;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Pool-assigned half of the extranonce region, bytes.
pub const EXTRANONCE1_SIZE: usize = 4;

/// Miner-controlled half of the extranonce region, bytes.
pub const EXTRANONCE2_SIZE: usize = 4;

/// Jobs kept around so lagging submissions can still validate.
pub const RECENT_JOBS_WINDOW: usize = 10;

/// Random 256-bit job identifier, hex on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub [u8; 32]);

impl JobId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        JobId(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 64 {
            return None;
        }
        let bytes = hex::decode(hex_str).ok()?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Some(JobId(id))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// One unit of distributable work.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    /// Display-order hex of the previous block hash, as the template gave it.
    pub prev_hash: String,
    pub version: u32,
    pub bits: u32,
    pub ntime: u32,
    pub height: u64,
    /// Coinbase serialization up to the extranonce region.
    pub coinbase_prefix: Vec<u8>,
    /// Coinbase serialization after the extranonce region.
    pub coinbase_suffix: Vec<u8>,
    /// Internal-order merkle branch for the coinbase position.
    pub merkle_branches: Vec<[u8; 32]>,
    /// Non-coinbase transactions, raw hex, consensus order.
    pub transactions: Vec<String>,
    pub network_target: [u8; 32],
    pub network_difficulty: u64,
    /// Block reward in base units, from the template's coinbase value.
    pub reward: u64,
    pub created_at: SystemTime,
    pub clean_jobs: bool,
}

impl Job {
    pub fn from_template(
        template: &BlockTemplate,
        network_difficulty: u64,
        clean_jobs: bool,
        now: SystemTime,
    ) -> Result<Self, WorkError> {
        let bits = u32::from_str_radix(&template.bits, 16)
            .map_err(|_| WorkError::new(format!("Bad compact bits: {}", template.bits)))?;

        let coinbase_bytes = hex::decode(&template.coinbase().data)
            .map_err(|_| WorkError::new("Coinbase data is not valid hex"))?;
        if template.extranonce_offset + EXTRANONCE_REGION_SIZE > coinbase_bytes.len() {
            return Err(WorkError::new("Extranonce offset out of range"));
        }
        let coinbase_prefix = coinbase_bytes[..template.extranonce_offset].to_vec();
        let coinbase_suffix =
            coinbase_bytes[template.extranonce_offset + EXTRANONCE_REGION_SIZE..].to_vec();

        let mut txids = Vec::with_capacity(template.transactions.len().saturating_sub(1));
        for tx in &template.transactions[1..] {
            txids.push(internal_order_txid(&tx.txid)?);
        }

        Ok(Job {
            job_id: JobId::random(),
            prev_hash: template.previousblockhash.clone(),
            version: template.version,
            bits,
            ntime: template.curtime as u32,
            height: template.height,
            coinbase_prefix,
            coinbase_suffix,
            merkle_branches: merkle_branches(txids),
            transactions: template.transactions[1..]
                .iter()
                .map(|tx| tx.data.clone())
                .collect(),
            network_target: difficulty::target_from_compact(bits),
            network_difficulty,
            reward: template.coinbasevalue,
            created_at: now,
            clean_jobs,
        })
    }

    /// Full coinbase for a submission:
    /// `prefix || extranonce1 || extranonce2 || suffix`.
    pub fn assemble_coinbase(
        &self,
        extranonce1_hex: &str,
        extranonce2_hex: &str,
    ) -> Result<Vec<u8>, WorkError> {
        let extranonce1 = decode_fixed_hex(extranonce1_hex, EXTRANONCE1_SIZE, "extranonce1")?;
        let extranonce2 = decode_fixed_hex(extranonce2_hex, EXTRANONCE2_SIZE, "extranonce2")?;

        let mut coinbase = Vec::with_capacity(
            self.coinbase_prefix.len() + EXTRANONCE_REGION_SIZE + self.coinbase_suffix.len(),
        );
        coinbase.extend_from_slice(&self.coinbase_prefix);
        coinbase.extend_from_slice(&extranonce1);
        coinbase.extend_from_slice(&extranonce2);
        coinbase.extend_from_slice(&self.coinbase_suffix);
        Ok(coinbase)
    }

    /// Merkle root (internal order) for a submission's coinbase.
    pub fn merkle_root(&self, coinbase: &[u8]) -> [u8; 32] {
        let mut root = sha256d::Hash::hash(coinbase).to_byte_array();
        for branch in &self.merkle_branches {
            root = sha256d_pair(&root, branch);
        }
        root
    }

    /// 80-byte header for a submission, little-endian fields on the wire.
    pub fn serialize_header(
        &self,
        merkle_root: &[u8; 32],
        ntime: u32,
        nonce: u32,
    ) -> Result<[u8; 80], WorkError> {
        let prev = internal_order_txid(&self.prev_hash)?;

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&prev);
        header[36..68].copy_from_slice(merkle_root);
        header[68..72].copy_from_slice(&ntime.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());
        header[76..80].copy_from_slice(&nonce.to_le_bytes());
        Ok(header)
    }

    /// Recompute the big-endian hash a miner's submission achieves.
    pub fn compute_share_hash(
        &self,
        extranonce1_hex: &str,
        extranonce2_hex: &str,
        ntime: u32,
        nonce: u32,
    ) -> Result<[u8; 32], WorkError> {
        let coinbase = self.assemble_coinbase(extranonce1_hex, extranonce2_hex)?;
        let merkle_root = self.merkle_root(&coinbase);
        let header = self.serialize_header(&merkle_root, ntime, nonce)?;

        let mut hash = sha256d::Hash::hash(&header).to_byte_array();
        hash.reverse();
        Ok(hash)
    }

    /// Serialize the full block for `submitblock`.
    pub fn assemble_block_hex(
        &self,
        extranonce1_hex: &str,
        extranonce2_hex: &str,
        ntime: u32,
        nonce: u32,
    ) -> Result<String, WorkError> {
        let coinbase = self.assemble_coinbase(extranonce1_hex, extranonce2_hex)?;
        let merkle_root = self.merkle_root(&coinbase);
        let header = self.serialize_header(&merkle_root, ntime, nonce)?;

        let mut block = Vec::new();
        block.extend_from_slice(&header);
        write_compact_size(&mut block, (self.transactions.len() + 1) as u64);
        block.extend_from_slice(&coinbase);
        for tx in &self.transactions {
            let bytes =
                hex::decode(tx).map_err(|_| WorkError::new("Transaction data is not valid hex"))?;
            block.extend_from_slice(&bytes);
        }
        Ok(hex::encode(block))
    }
}

/// Decode a display-order hash into internal (reversed) byte order.
fn internal_order_txid(display_hex: &str) -> Result<[u8; 32], WorkError> {
    let bytes = decode_fixed_hex(display_hex, 32, "hash")?;
    let mut internal = [0u8; 32];
    for (i, byte) in bytes.iter().enumerate() {
        internal[31 - i] = *byte;
    }
    Ok(internal)
}

fn decode_fixed_hex(hex_str: &str, len: usize, what: &str) -> Result<Vec<u8>, WorkError> {
    if hex_str.len() != len * 2 {
        return Err(WorkError::new(format!(
            "{} must be {} hex characters, got {}",
            what,
            len * 2,
            hex_str.len()
        )));
    }
    hex::decode(hex_str).map_err(|_| WorkError::new(format!("{what} is not valid hex")))
}

fn sha256d_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d::Hash::hash(&buf).to_byte_array()
}

/// Merkle branch for position zero: peel off the head of each level, fold
/// the remainder pairwise (odd tails pair with themselves).
pub fn merkle_branches(mut txids: Vec<[u8; 32]>) -> Vec<[u8; 32]> {
    let mut branches = Vec::new();
    while !txids.is_empty() {
        branches.push(txids[0]);
        let mut next = Vec::new();
        for i in (1..txids.len()).step_by(2) {
            let left = txids[i];
            let right = if i + 1 < txids.len() { txids[i + 1] } else { left };
            next.push(sha256d_pair(&left, &right));
        }
        txids = next;
    }
    branches
}

/// Bitcoin-style compact size prefix.
fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// The current job plus the bounded window of predecessors.
///
/// Installing a clean job (new round or new previous block) evicts the whole
/// window: submissions against pre-clean jobs must come back stale.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: VecDeque<Arc<Job>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, job: Job) -> Arc<Job> {
        if job.clean_jobs {
            self.jobs.clear();
        }
        let job = Arc::new(job);
        self.jobs.push_back(job.clone());
        if self.jobs.len() > RECENT_JOBS_WINDOW {
            self.jobs.pop_front();
        }
        job
    }

    pub fn current(&self) -> Option<&Arc<Job>> {
        self.jobs.back()
    }

    /// Resolve a submitted job id against the current job or the window.
    pub fn find(&self, job_id: &JobId) -> Option<Arc<Job>> {
        self.jobs.iter().rev().find(|j| j.job_id == *job_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> BlockTemplate {
        let coinbase_data = format!("{}{}{}", "01".repeat(42), "00".repeat(8), "02".repeat(20));
        BlockTemplate::from_json(
            &serde_json::json!({
                "version": 2,
                "previousblockhash": "000000000000000000000000000000000000000000000000000000000000beef",
                "transactions": [
                    { "data": coinbase_data, "txid": "aa".repeat(32) },
                    { "data": "0200ff", "txid": "bb".repeat(32) },
                    { "data": "0300ff", "txid": "cc".repeat(32) },
                ],
                "extranonce_offset": 42,
                "coinbasevalue": 5_000_000_000u64,
                "target": "00000000ffff0000000000000000000000000000000000000000000000000000",
                "curtime": 1_700_000_000u64,
                "bits": "1d00ffff",
                "height": 1234,
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_job_from_template() {
        let job = Job::from_template(&sample_template(), 1_000_000, true, SystemTime::now()).unwrap();

        assert_eq!(job.height, 1234);
        assert_eq!(job.bits, 0x1d00ffff);
        assert_eq!(job.ntime, 1_700_000_000);
        assert_eq!(job.coinbase_prefix.len(), 42);
        assert_eq!(job.coinbase_suffix.len(), 20);
        assert_eq!(job.transactions.len(), 2);
        assert_eq!(job.reward, 5_000_000_000);
        assert!(job.clean_jobs);
        // Two transactions collapse to a two-level branch
        assert_eq!(job.merkle_branches.len(), 2);
    }

    #[test]
    fn test_job_ids_are_random() {
        let template = sample_template();
        let a = Job::from_template(&template, 1, false, SystemTime::now()).unwrap();
        let b = Job::from_template(&template, 1, false, SystemTime::now()).unwrap();
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn test_job_id_hex_round_trip() {
        let id = JobId::random();
        let parsed = JobId::from_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(JobId::from_hex("abcd").is_none());
        assert!(JobId::from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn test_assemble_coinbase_layout() {
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        let coinbase = job.assemble_coinbase("0000002a", "deadbeef").unwrap();

        assert_eq!(coinbase.len(), 42 + 8 + 20);
        assert_eq!(&coinbase[..42], &job.coinbase_prefix[..]);
        assert_eq!(&coinbase[42..46], &[0x00, 0x00, 0x00, 0x2a]);
        assert_eq!(&coinbase[46..50], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&coinbase[50..], &job.coinbase_suffix[..]);
    }

    #[test]
    fn test_assemble_coinbase_rejects_bad_extranonce() {
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        assert!(job.assemble_coinbase("00", "deadbeef").is_err());
        assert!(job.assemble_coinbase("0000002a", "dead").is_err());
        assert!(job.assemble_coinbase("zzzzzzzz", "deadbeef").is_err());
    }

    #[test]
    fn test_merkle_branches_empty() {
        assert!(merkle_branches(vec![]).is_empty());
    }

    #[test]
    fn test_merkle_branches_single() {
        let txid = [1u8; 32];
        assert_eq!(merkle_branches(vec![txid]), vec![txid]);
    }

    #[test]
    fn test_merkle_branches_two() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let branches = merkle_branches(vec![a, b]);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0], a);
        assert_eq!(branches[1], sha256d_pair(&b, &b));
    }

    #[test]
    fn test_merkle_root_folds_branches() {
        // Folding by hand must agree with merkle_root
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        let coinbase = job.assemble_coinbase("00000001", "00000002").unwrap();

        let mut expected = sha256d::Hash::hash(&coinbase).to_byte_array();
        for branch in &job.merkle_branches {
            expected = sha256d_pair(&expected, branch);
        }
        assert_eq!(job.merkle_root(&coinbase), expected);
    }

    #[test]
    fn test_header_serialization_layout() {
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        let root = [7u8; 32];
        let header = job.serialize_header(&root, 0x11223344, 0x55667788).unwrap();

        assert_eq!(&header[0..4], &2u32.to_le_bytes());
        // prev hash is reversed into internal order
        assert_eq!(header[4], 0xef);
        assert_eq!(header[5], 0xbe);
        assert_eq!(&header[36..68], &root);
        assert_eq!(&header[68..72], &0x11223344u32.to_le_bytes());
        assert_eq!(&header[72..76], &0x1d00ffffu32.to_le_bytes());
        assert_eq!(&header[76..80], &0x55667788u32.to_le_bytes());
    }

    #[test]
    fn test_share_hash_is_deterministic_and_nonce_sensitive() {
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        let a = job.compute_share_hash("0000002a", "deadbeef", job.ntime, 1).unwrap();
        let b = job.compute_share_hash("0000002a", "deadbeef", job.ntime, 1).unwrap();
        let c = job.compute_share_hash("0000002a", "deadbeef", job.ntime, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_assemble_block_contains_header_and_txs() {
        let job = Job::from_template(&sample_template(), 1, false, SystemTime::now()).unwrap();
        let block_hex = job
            .assemble_block_hex("0000002a", "deadbeef", job.ntime, 99)
            .unwrap();
        let block = hex::decode(&block_hex).unwrap();

        // header + compact size (3 txs) + coinbase + 2 raw txs
        let coinbase_len = 42 + 8 + 20;
        assert_eq!(block.len(), 80 + 1 + coinbase_len + 3 + 3);
        assert_eq!(block[80], 3);
    }

    #[test]
    fn test_compact_size_boundaries() {
        let mut buf = Vec::new();
        write_compact_size(&mut buf, 0xfc);
        assert_eq!(buf, vec![0xfc]);

        buf.clear();
        write_compact_size(&mut buf, 0xfd);
        assert_eq!(buf, vec![0xfd, 0xfd, 0x00]);

        buf.clear();
        write_compact_size(&mut buf, 0x1_0000);
        assert_eq!(buf, vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_tracker_window_and_clean_eviction() {
        let template = sample_template();
        let mut tracker = JobTracker::new();

        let first = tracker.install(
            Job::from_template(&template, 1, false, SystemTime::now()).unwrap(),
        );
        for _ in 0..RECENT_JOBS_WINDOW {
            tracker.install(Job::from_template(&template, 1, false, SystemTime::now()).unwrap());
        }

        // First job aged out of the window
        assert!(tracker.find(&first.job_id).is_none());
        let current = tracker.current().unwrap().clone();
        assert!(tracker.find(&current.job_id).is_some());

        // A clean job evicts everything that came before it
        let clean = tracker.install(
            Job::from_template(&template, 1, true, SystemTime::now()).unwrap(),
        );
        assert!(tracker.find(&current.job_id).is_none());
        assert!(tracker.find(&clean.job_id).is_some());
        assert_eq!(tracker.current().unwrap().job_id, clean.job_id);
    }
}
