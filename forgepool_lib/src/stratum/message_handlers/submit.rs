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

use crate::coordinator::PoolHandle;
use crate::stratum::error::Error;
use crate::stratum::messages::{Request, Response};
use crate::stratum::session::{Session, SessionState};
use serde_json::json;
use tracing::debug;

/// Handle `mining.submit`.
///
/// Message format:
/// `{"id": 4, "method": "mining.submit",
///   "params": ["worker", "job_id", "extranonce2", "ntime", "nonce"]}`
///
/// Accepted shares answer `true`; rejects answer the coded error triple.
pub async fn handle_submit(
    request: &Request,
    session: &mut Session,
    pool: &PoolHandle,
) -> Result<Response, Error> {
    debug!("Handling mining.submit on {}", session.conn_id);
    if !session.is_authorized() {
        return Err(Error::NotSubscribed);
    }
    if request.params.len() < 5 {
        return Err(Error::InvalidParams("submit takes 5 params".to_string()));
    }

    let job_id = request
        .string_param(1)
        .ok_or_else(|| Error::InvalidParams("bad job id".to_string()))?;
    let extranonce2 = request
        .string_param(2)
        .ok_or_else(|| Error::InvalidParams("bad extranonce2".to_string()))?;
    let ntime = request
        .string_param(3)
        .ok_or_else(|| Error::InvalidParams("bad ntime".to_string()))?;
    let nonce = request
        .string_param(4)
        .ok_or_else(|| Error::InvalidParams("bad nonce".to_string()))?;

    let outcome = pool
        .submit(
            session.conn_id,
            job_id.to_string(),
            extranonce2.to_string(),
            ntime.to_string(),
            nonce.to_string(),
        )
        .await?;

    // First accepted share marks the session active
    session.state = SessionState::Active;
    if outcome.is_block {
        debug!("Session {} found a block", session.conn_id);
    }
    Ok(Response::new_ok(request.id.clone(), json!(true)))
}
