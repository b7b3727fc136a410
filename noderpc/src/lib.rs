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

//! JSON-RPC 1.0 client for the upstream full node.
//!
//! The pool only ever calls four methods: `getblocktemplate`, `submitblock`,
//! `getdifficulty` and `getbestheight`. The [`NodeRpc`] trait is the seam the
//! pool coordinator is generic over, so tests can run against a stub node.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Timeout applied to every upstream call.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC 1.0 request structure
#[derive(Serialize)]
struct JsonRpcRequest {
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC 1.0 response structure. Both `result` and `error` are always
/// present; one is the value, the other is null.
#[derive(Deserialize, Debug)]
struct JsonRpcResponse<T> {
    result: T,
    error: Option<JsonRpcError>,
}

/// JSON-RPC 1.0 error structure
#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Clone)]
pub struct NodeRpcConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Custom Debug to redact passwords
impl fmt::Debug for NodeRpcConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NodeRpcConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Error type for the NodeRpcClient
#[derive(Debug)]
pub enum NodeRpcError {
    HttpError { status_code: u16, message: String },
    ParseError { message: String },
    RpcError { code: i32, message: String },
    Other(String),
}

impl Error for NodeRpcError {}

impl fmt::Display for NodeRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRpcError::HttpError {
                status_code,
                message,
            } => {
                write!(f, "HTTP error {status_code}: {message}")
            }
            NodeRpcError::ParseError { message } => {
                write!(f, "Parse error: {message}")
            }
            NodeRpcError::RpcError { code, message } => {
                write!(f, "RPC error {code}: {message}")
            }
            NodeRpcError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// The upstream-node contract the pool depends on.
///
/// Implementations must be cheap to clone or share behind an Arc; the
/// coordinator holds one for the lifetime of the process.
pub trait NodeRpc: Send + Sync {
    /// Fetch a block template paying out to the given pool address.
    /// Returns the raw JSON so callers own the template schema.
    fn get_block_template(
        &self,
        payout_address: &str,
    ) -> impl Future<Output = Result<String, NodeRpcError>> + Send;

    /// Submit a fully serialized block (hex). Ok(()) means the node accepted it.
    fn submit_block(
        &self,
        block_hex: &str,
    ) -> impl Future<Output = Result<(), NodeRpcError>> + Send;

    /// Current network difficulty.
    fn get_difficulty(&self) -> impl Future<Output = Result<u64, NodeRpcError>> + Send;

    /// Height of the node's best chain tip.
    fn get_best_height(&self) -> impl Future<Output = Result<u64, NodeRpcError>> + Send;
}

#[derive(Debug, Clone)]
pub struct NodeRpcClient {
    client: reqwest::Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl NodeRpcClient {
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self, NodeRpcError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
                .parse()
                .map_err(|e| NodeRpcError::Other(format!("Invalid header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| NodeRpcError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            request_id: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn from_config(config: &NodeRpcConfig) -> Result<Self, NodeRpcError> {
        Self::new(&config.url, &config.username, &config.password)
    }

    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, NodeRpcError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = JsonRpcRequest {
            method: method.to_string(),
            params,
            id,
        };

        let response = match self.client.post(&self.url).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let status_code = e.status().map(|s| s.as_u16());
                error!(
                    "HTTP request to node failed: status={:?}, error={}",
                    status_code, e
                );
                return Err(NodeRpcError::Other(format!("HTTP request failed: {e}")));
            }
        };

        let status = response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                "Error reaching node with status={:?}. Message={:?}",
                status_code, error_body
            );
            return Err(NodeRpcError::HttpError {
                status_code,
                message: error_body,
            });
        }

        let rpc_response: JsonRpcResponse<T> =
            response.json().await.map_err(|e| NodeRpcError::ParseError {
                message: format!("Failed to parse response: {e}"),
            })?;

        // JSON-RPC 1.0: check error first, then return result
        if let Some(error) = rpc_response.error {
            return Err(NodeRpcError::RpcError {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }
}

impl NodeRpc for NodeRpcClient {
    async fn get_block_template(&self, payout_address: &str) -> Result<String, NodeRpcError> {
        let params = vec![serde_json::Value::String(payout_address.to_string())];
        debug!("Requesting getblocktemplate for {}", payout_address);

        // The template fetch runs on a timer; transient node hiccups are
        // retried with a short backoff before the caller gives up until the
        // next cycle.
        const MAX_RETRIES: u32 = 3;
        const INITIAL_BACKOFF_MS: u64 = 10;
        const MAX_BACKOFF_MS: u64 = 160;

        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut last_error = None;

        while attempt <= MAX_RETRIES {
            match self
                .request::<serde_json::Value>("getblocktemplate", params.clone())
                .await
            {
                Ok(result) => {
                    return Ok(result.to_string());
                }
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt > MAX_RETRIES {
                        break;
                    }

                    debug!(
                        "getblocktemplate attempt {} failed, retrying in {}ms",
                        attempt, backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = std::cmp::min(backoff_ms * 2, MAX_BACKOFF_MS);
                }
            }
        }

        Err(last_error.unwrap_or(NodeRpcError::Other(
            "Failed to get block template after all retries".to_string(),
        )))
    }

    async fn submit_block(&self, block_hex: &str) -> Result<(), NodeRpcError> {
        let params = vec![serde_json::Value::String(block_hex.to_string())];

        // submitblock returns null on success, an error string on rejection
        let result: serde_json::Value = self.request("submitblock", params).await?;
        if result.is_null() {
            Ok(())
        } else {
            Err(NodeRpcError::RpcError {
                code: -1,
                message: result.to_string(),
            })
        }
    }

    async fn get_difficulty(&self) -> Result<u64, NodeRpcError> {
        let params: Vec<serde_json::Value> = vec![];
        let result: serde_json::Value = self.request("getdifficulty", params).await?;
        result.as_u64().ok_or_else(|| NodeRpcError::ParseError {
            message: format!("getdifficulty returned a non-integer: {result}"),
        })
    }

    async fn get_best_height(&self) -> Result<u64, NodeRpcError> {
        let params: Vec<serde_json::Value> = vec![];
        let result: serde_json::Value = self.request("getbestheight", params).await?;
        result.as_u64().ok_or_else(|| NodeRpcError::ParseError {
            message: format!("getbestheight returned a non-integer: {result}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test_log::test(tokio::test)]
    async fn test_get_difficulty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!({"method": "getdifficulty"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": 123456u64,
                "error": null,
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        let difficulty = client.get_difficulty().await.unwrap();
        assert_eq!(difficulty, 123456);
    }

    #[tokio::test]
    async fn test_get_best_height() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "getbestheight"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": 4242u64,
                "error": null,
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        assert_eq!(client.get_best_height().await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_submit_block_success_returns_ok() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "submitblock"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": null,
                "error": null,
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        assert!(client.submit_block("00ff").await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_block_rejection_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "bad-prevblk",
                "error": null,
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        let result = client.submit_block("00ff").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rpc_error_is_propagated() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": null,
                "error": {"code": -32601, "message": "Method not found"},
                "id": 0
            })))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        match client.get_difficulty().await {
            Err(NodeRpcError::RpcError { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected RpcError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&mock_server)
            .await;

        let client = NodeRpcClient::new(&mock_server.uri(), "user", "pass").unwrap();
        match client.get_best_height().await {
            Err(NodeRpcError::HttpError { status_code, .. }) => assert_eq!(status_code, 401),
            other => panic!("Expected HttpError, got {other:?}"),
        }
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config = NodeRpcConfig {
            url: "http://localhost:18443".to_string(),
            username: "user".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }
}
