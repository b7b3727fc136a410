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
use std::net::SocketAddr;
use tracing::debug;

/// Handle `mining.subscribe`.
///
/// Message format:
/// `{"id": 1, "method": "mining.subscribe", "params": ["agent/version"]}`
///
/// The response fixes this session's extranonce1 and the extranonce2 width:
/// `[[["mining.set_difficulty", id], ["mining.notify", id]], enonce1, size]`.
pub async fn handle_subscribe(
    request: &Request,
    session: &mut Session,
    addr: SocketAddr,
    pool: &PoolHandle,
) -> Result<Response, Error> {
    debug!("Handling mining.subscribe from {}", addr);
    if session.state != SessionState::Connected {
        return Err(Error::NotSubscribed);
    }

    let user_agent = request.string_param(0).map(|s| s.to_string());
    session.user_agent = user_agent.clone();

    let info = pool.subscribe(session.conn_id, addr, user_agent).await?;
    let extranonce1 = info.extranonce1.clone();
    session.extranonce1 = info.extranonce1;
    session.state = SessionState::Subscribed;

    Ok(Response::new_ok(
        request.id.clone(),
        json!([
            [
                ["mining.set_difficulty", extranonce1.clone()],
                ["mining.notify", extranonce1.clone()],
            ],
            extranonce1,
            info.extranonce2_size,
        ]),
    ))
}
