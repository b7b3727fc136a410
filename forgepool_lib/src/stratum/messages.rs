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

//! Stratum v1 JSON-RPC frames.
//!
//! One newline-terminated JSON object per message. Requests carry `id`,
//! `method`, `params`; responses echo the request `id` with `result` and a
//! nullable error triple `[code, message, null]`; notifications are requests
//! with a null `id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC id: number, string, or null (notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Id::Number(a), Id::Number(b)) => a == b,
            (Id::String(a), Id::String(b)) => a == b,
            _ => false,
        }
    }
}

/// Stratum error triple: `[code, message, traceback]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorTriple(pub i32, pub String, pub Option<Value>);

impl ErrorTriple {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ErrorTriple(code, message.into(), None)
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

/// An inbound request or an outbound notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Id>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// An outbound response to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: Option<Id>,
    pub result: Option<Value>,
    pub error: Option<ErrorTriple>,
}

impl Request {
    pub fn parse(line: &str) -> Result<Request, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn new_subscribe(id: u64, user_agent: &str, version: &str) -> Self {
        Request {
            id: Some(Id::Number(id)),
            method: "mining.subscribe".to_string(),
            params: vec![json!(format!("{user_agent}/{version}"))],
        }
    }

    pub fn new_authorize(id: u64, username: &str, password: &str) -> Self {
        Request {
            id: Some(Id::Number(id)),
            method: "mining.authorize".to_string(),
            params: vec![json!(username), json!(password)],
        }
    }

    pub fn new_submit(
        id: u64,
        worker_name: &str,
        job_id: &str,
        extranonce2: &str,
        ntime: &str,
        nonce: &str,
    ) -> Self {
        Request {
            id: Some(Id::Number(id)),
            method: "mining.submit".to_string(),
            params: vec![
                json!(worker_name),
                json!(job_id),
                json!(extranonce2),
                json!(ntime),
                json!(nonce),
            ],
        }
    }

    pub fn new_set_difficulty(difficulty: u64) -> Self {
        Request {
            id: None,
            method: "mining.set_difficulty".to_string(),
            params: vec![json!(difficulty)],
        }
    }

    pub fn new_notify(params: NotifyParams) -> Self {
        Request {
            id: None,
            method: "mining.notify".to_string(),
            params: params.into_params(),
        }
    }

    pub fn new_reconnect(host: &str, port: u16, wait_s: u64) -> Self {
        Request {
            id: None,
            method: "client.reconnect".to_string(),
            params: vec![json!(host), json!(port), json!(wait_s)],
        }
    }

    pub fn new_show_message(text: &str) -> Self {
        Request {
            id: None,
            method: "client.show_message".to_string(),
            params: vec![json!(text)],
        }
    }

    /// String param at `index`, if present and a string.
    pub fn string_param(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(|v| v.as_str())
    }
}

impl Response {
    pub fn new_ok(id: Option<Id>, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn new_error(id: Option<Id>, code: i32, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(ErrorTriple::new(code, message)),
        }
    }
}

/// Parameters of a `mining.notify`, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyParams {
    pub job_id: String,
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branches: Vec<String>,
    pub version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_jobs: bool,
}

impl NotifyParams {
    fn into_params(self) -> Vec<Value> {
        vec![
            json!(self.job_id),
            json!(self.prev_hash),
            json!(self.coinbase1),
            json!(self.coinbase2),
            json!(self.merkle_branches),
            json!(self.version),
            json!(self.nbits),
            json!(self.ntime),
            json!(self.clean_jobs),
        ]
    }
}
