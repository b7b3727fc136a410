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

/// Handle `mining.authorize`.
///
/// Message format:
/// `{"id": 2, "method": "mining.authorize", "params": ["address.worker", "password"]}`
///
/// On success the coordinator binds a worker to this connection and queues
/// the initial `set_difficulty` and `notify` for it.
pub async fn handle_authorize(
    request: &Request,
    session: &mut Session,
    pool: &PoolHandle,
) -> Result<Response, Error> {
    debug!("Handling mining.authorize on {}", session.conn_id);
    if session.state != SessionState::Subscribed {
        return Err(Error::NotSubscribed);
    }

    let username = request
        .string_param(0)
        .ok_or_else(|| Error::InvalidParams("missing username".to_string()))?
        .to_string();
    let password = request.string_param(1).unwrap_or_default().to_string();

    let outcome = pool
        .authorize(session.conn_id, username.clone(), password)
        .await?;

    session.username = Some(username);
    session.miner_id = Some(outcome.miner_id);
    session.worker_id = Some(outcome.worker_id);
    session.state = SessionState::Authorized;

    Ok(Response::new_ok(request.id.clone(), json!(true)))
}
