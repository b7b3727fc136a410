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

pub mod authorize;
pub mod submit;
pub mod subscribe;

use crate::coordinator::PoolHandle;
use crate::stratum::error::Error;
use crate::stratum::messages::{Request, Response};
use crate::stratum::session::Session;
use authorize::handle_authorize;
use serde_json::json;
use std::net::SocketAddr;
use submit::handle_submit;
use subscribe::handle_subscribe;
use tracing::debug;

const SERVER_VERSION: &str = concat!("Forgepool/", env!("CARGO_PKG_VERSION"));

/// What the connection task does after a message is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Close,
}

/// Route one inbound request.
///
/// Every request gets a response; protocol violations are answered with the
/// coded error triple and, except for banning and admission failures, leave
/// the session in its current state.
pub async fn handle_message(
    request: Request,
    session: &mut Session,
    addr: SocketAddr,
    pool: &PoolHandle,
) -> (Response, Disposition) {
    let result = match request.method.as_str() {
        "mining.subscribe" => handle_subscribe(&request, session, addr, pool).await,
        "mining.authorize" => handle_authorize(&request, session, pool).await,
        "mining.submit" => handle_submit(&request, session, pool).await,
        "client.get_version" => Ok(Response::new_ok(request.id.clone(), json!(SERVER_VERSION))),
        method => Err(Error::UnknownMethod(method.to_string())),
    };

    match result {
        Ok(response) => (response, Disposition::Keep),
        Err(error) => {
            debug!("Rejecting {} from {}: {}", request.method, addr, error);
            let disposition = if error.closes_session() {
                Disposition::Close
            } else {
                Disposition::Keep
            };
            (
                Response::new_error(request.id, error.code(), error.message()),
                disposition,
            )
        }
    }
}
