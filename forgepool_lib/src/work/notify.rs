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

//! Rendering jobs as `mining.notify` frames.

use crate::stratum::messages::{NotifyParams, Request};
use crate::work::job::Job;
use crate::work::WorkError;

/// Re-encode a 64-char hash hex with the byte order of each 4-byte chunk
/// reversed — the representation miners expect for `prevhash`.
pub fn swap_four_byte_chunks(hex_str: &str) -> Result<String, WorkError> {
    if hex_str.len() != 64 {
        return Err(WorkError::new("prevhash must be 64 hex characters"));
    }
    let bytes = hex::decode(hex_str).map_err(|_| WorkError::new("prevhash is not valid hex"))?;

    let mut swapped = Vec::with_capacity(32);
    for chunk in bytes.chunks(4) {
        swapped.extend(chunk.iter().rev());
    }
    Ok(hex::encode(swapped))
}

/// Notify parameters for a job.
pub fn notify_params(job: &Job) -> Result<NotifyParams, WorkError> {
    Ok(NotifyParams {
        job_id: job.job_id.to_string(),
        prev_hash: swap_four_byte_chunks(&job.prev_hash)?,
        coinbase1: hex::encode(&job.coinbase_prefix),
        coinbase2: hex::encode(&job.coinbase_suffix),
        merkle_branches: job.merkle_branches.iter().map(hex::encode).collect(),
        version: format!("{:08x}", job.version),
        nbits: format!("{:08x}", job.bits),
        ntime: format!("{:08x}", job.ntime),
        clean_jobs: job.clean_jobs,
    })
}

/// The complete `mining.notify` frame for a job.
pub fn notify_message(job: &Job) -> Result<Request, WorkError> {
    Ok(Request::new_notify(notify_params(job)?))
}
