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

//! Stateless share validation.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! stale job, timestamp window, duplicate, low difficulty. A share that
//! passes is accepted; the return value says whether it is also a block.

use crate::difficulty;
use crate::store::share::{RejectReason, Share};
use crate::work::job::{Job, JobId};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// A share older than this relative to its job is stale.
pub const MAX_SHARE_AGE: Duration = Duration::from_secs(300);

/// The fields of a submission the validator looks at.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: JobId,
    pub nonce: u32,
    /// Big-endian hash recomputed from the submission.
    pub hash: [u8; 32],
    pub timestamp: SystemTime,
}

/// Validate a candidate share.
///
/// `resolved_job` is the job the submission referenced, if it is the current
/// job or still inside the recent-jobs window; `None` means it aged out or
/// never existed. Returns `Ok(is_block)` on acceptance.
pub fn validate(
    submission: &Submission,
    resolved_job: Option<&Job>,
    recent_shares: &VecDeque<Share>,
    worker_difficulty: u64,
) -> Result<bool, RejectReason> {
    let job = resolved_job.ok_or(RejectReason::Stale)?;

    match submission.timestamp.duration_since(job.created_at) {
        Ok(age) if age <= MAX_SHARE_AGE => {}
        // Either older than the window or before the job existed
        _ => return Err(RejectReason::Stale),
    }

    let duplicate = recent_shares
        .iter()
        .any(|s| s.nonce == submission.nonce && s.job_id == submission.job_id);
    if duplicate {
        return Err(RejectReason::Duplicate);
    }

    if difficulty::share_difficulty(&submission.hash) < worker_difficulty {
        return Err(RejectReason::LowDifficulty);
    }

    Ok(difficulty::meets_target(
        &submission.hash,
        &job.network_target,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MinerId, ShareId, WorkerId};
    use crate::work::gbt::BlockTemplate;

    fn test_job(created_at: SystemTime) -> Job {
        let coinbase_data = format!("{}{}{}", "01".repeat(42), "00".repeat(8), "02".repeat(20));
        let template = BlockTemplate::from_json(
            &serde_json::json!({
                "version": 2,
                "previousblockhash": "00".repeat(32),
                "transactions": [ { "data": coinbase_data, "txid": "aa".repeat(32) } ],
                "extranonce_offset": 42,
                "coinbasevalue": 5_000_000_000u64,
                "target": "00000000ffff0000000000000000000000000000000000000000000000000000",
                "curtime": 1_700_000_000u64,
                "bits": "1d00ffff",
                "height": 10,
            })
            .to_string(),
        )
        .unwrap();
        let mut job = Job::from_template(&template, 1_000_000, false, created_at).unwrap();
        job.created_at = created_at;
        job
    }

    fn hash_with_zero_bits(zero_bits: u32) -> [u8; 32] {
        let mut hash = [0u8; 32];
        hash[(zero_bits / 8) as usize] = 0x80 >> (zero_bits % 8);
        hash
    }

    fn submission(job: &Job, nonce: u32, hash: [u8; 32], timestamp: SystemTime) -> Submission {
        Submission {
            job_id: job.job_id,
            nonce,
            hash,
            timestamp,
        }
    }

    fn recorded_share(job_id: JobId, nonce: u32) -> Share {
        Share {
            share_id: ShareId(1),
            miner_id: MinerId(1),
            worker_id: WorkerId(1),
            worker_name: "rig0".to_string(),
            job_id,
            nonce,
            extranonce2: "00000000".to_string(),
            hash: [0u8; 32],
            difficulty: 10_000,
            timestamp: SystemTime::now(),
            valid: true,
            is_block: false,
            reject_reason: None,
        }
    }

    #[test]
    fn test_unresolved_job_is_stale() {
        let now = SystemTime::now();
        let job = test_job(now);
        let sub = submission(&job, 1, hash_with_zero_bits(33), now);
        let result = validate(&sub, None, &VecDeque::new(), 10_000);
        assert_eq!(result.unwrap_err(), RejectReason::Stale);
    }

    #[test]
    fn test_timestamp_window() {
        let created = SystemTime::now();
        let job = test_job(created);
        let hash = hash_with_zero_bits(33); // difficulty 131_072

        // Inside the window
        let ok = submission(&job, 1, hash, created + Duration::from_secs(299));
        assert!(validate(&ok, Some(&job), &VecDeque::new(), 10_000).is_ok());

        // Too old
        let old = submission(&job, 2, hash, created + Duration::from_secs(301));
        assert_eq!(
            validate(&old, Some(&job), &VecDeque::new(), 10_000).unwrap_err(),
            RejectReason::Stale
        );

        // Before the job existed
        let early = submission(&job, 3, hash, created - Duration::from_secs(1));
        assert_eq!(
            validate(&early, Some(&job), &VecDeque::new(), 10_000).unwrap_err(),
            RejectReason::Stale
        );
    }

    #[test]
    fn test_duplicate_detection() {
        let now = SystemTime::now();
        let job = test_job(now);
        let mut recent = VecDeque::new();
        recent.push_back(recorded_share(job.job_id, 42));

        let dup = submission(&job, 42, hash_with_zero_bits(33), now);
        assert_eq!(
            validate(&dup, Some(&job), &recent, 10_000).unwrap_err(),
            RejectReason::Duplicate
        );

        // Same nonce on a different job is fine
        let other = Submission {
            job_id: JobId([9u8; 32]),
            ..dup.clone()
        };
        // (different job would resolve differently; the duplicate check alone passes)
        assert!(!recent
            .iter()
            .any(|s| s.nonce == other.nonce && s.job_id == other.job_id));

        let fresh = submission(&job, 43, hash_with_zero_bits(33), now);
        assert!(validate(&fresh, Some(&job), &recent, 10_000).is_ok());
    }

    #[test]
    fn test_low_difficulty_rejected() {
        let now = SystemTime::now();
        let job = test_job(now);
        // 32 zero bits achieves 65_536; worker needs more
        let sub = submission(&job, 1, hash_with_zero_bits(32), now);
        assert_eq!(
            validate(&sub, Some(&job), &VecDeque::new(), 100_000).unwrap_err(),
            RejectReason::LowDifficulty
        );
    }

    #[test]
    fn test_check_order_stale_before_duplicate() {
        // A duplicate nonce against an unresolved job reports stale, not duplicate
        let now = SystemTime::now();
        let job = test_job(now);
        let mut recent = VecDeque::new();
        recent.push_back(recorded_share(job.job_id, 42));

        let sub = submission(&job, 42, hash_with_zero_bits(0), now);
        assert_eq!(
            validate(&sub, None, &recent, 10_000).unwrap_err(),
            RejectReason::Stale
        );
    }

    #[test]
    fn test_block_flag() {
        let now = SystemTime::now();
        let job = test_job(now);
        // Network target is 0x1d00ffff; 33 zero bits meets worker difficulty
        // but sits above the network target only when bytes 4.. are larger.
        let share_only = submission(&job, 1, hash_with_zero_bits(33), now);
        let is_block = validate(&share_only, Some(&job), &VecDeque::new(), 100_000).unwrap();
        // 0x0000000040... > 0x00000000ffff... is false, so this IS below target
        assert!(is_block);

        // A hash just above the network target: 0x00000001...
        let mut above = [0u8; 32];
        above[3] = 0x01;
        let not_block = submission(&job, 2, above, now);
        // difficulty of 31 zero bits is 1, so use a tiny worker difficulty
        let is_block = validate(&not_block, Some(&job), &VecDeque::new(), 1).unwrap();
        assert!(!is_block);
    }
}
