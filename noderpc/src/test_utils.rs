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

//! Wiremock helpers shared by crates that test against a fake upstream node.

use crate::NodeRpcConfig;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a wiremock server and return it together with a matching config.
pub async fn setup_mock_node_rpc() -> (MockServer, NodeRpcConfig) {
    let mock_server = MockServer::start().await;
    let config = NodeRpcConfig {
        url: mock_server.uri(),
        username: "testuser".to_string(),
        password: "testpass".to_string(),
    };
    (mock_server, config)
}

/// Answer any `submitblock` with success (null result).
pub async fn mock_submit_block_with_any_body(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(serde_json::json!({"method": "submitblock"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": null,
            "error": null,
            "id": 0
        })))
        .mount(mock_server)
        .await;
}

/// Answer `getblocktemplate` with the supplied template JSON.
pub async fn mock_block_template(mock_server: &MockServer, template: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(
            serde_json::json!({"method": "getblocktemplate"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": template,
            "error": null,
            "id": 0
        })))
        .mount(mock_server)
        .await;
}
