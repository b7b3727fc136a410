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

//! Full-stack tests over a real TCP socket: a miner client speaking line
//! JSON against the listener, the session state machine and the coordinator.

use forgepool_lib::banlist::Banlist;
use forgepool_lib::coordinator::start_pool_coordinator;
use forgepool_lib::ids::IdAllocator;
use forgepool_lib::stratum::client_connections::start_connections_actor;
use forgepool_lib::stratum::server::StratumServerBuilder;
use forgepool_lib::test_utils::{sample_template, test_settings, MinerJob, StubNode};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct TestPool {
    port: u16,
    node: Arc<StubNode>,
    _shutdown_tx: oneshot::Sender<()>,
}

async fn start_test_pool(max_connections_per_ip: usize) -> TestPool {
    let node = Arc::new(StubNode::with_template(sample_template(100, 1)));
    node.set_height(100);
    let ids = Arc::new(IdAllocator::new());
    let banlist = Arc::new(Banlist::new());
    let connections = start_connections_actor();

    let mut settings = test_settings();
    settings.initial_difficulty = 1;
    let pool = start_pool_coordinator(
        settings,
        node.clone(),
        ids.clone(),
        connections.clone(),
        banlist.clone(),
    );
    pool.refresh_work().await.unwrap();

    // Ephemeral port
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut server = StratumServerBuilder::default()
        .hostname("127.0.0.1".to_string())
        .port(port)
        .max_connections_per_ip(max_connections_per_ip)
        .connection_timeout(Duration::from_secs(300))
        .shutdown_rx(shutdown_rx)
        .connections(connections)
        .pool(pool)
        .banlist(banlist)
        .ids(ids)
        .build()
        .unwrap();

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = server.start(Some(ready_tx)).await;
    });
    ready_rx.await.expect("server should signal readiness");

    TestPool {
        port,
        node,
        _shutdown_tx: shutdown_tx,
    }
}

struct MinerClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl MinerClient {
    async fn connect(port: u16) -> MinerClient {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, writer) = stream.into_split();
        MinerClient {
            reader: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next_line())
            .await
            .expect("timed out reading line")
            .expect("read error")
            .expect("connection closed");
        serde_json::from_str(&line).expect("response is JSON")
    }

    /// Read frames until a `mining.notify` notification arrives.
    async fn recv_notify(&mut self) -> MinerJob {
        loop {
            let value = self.recv().await;
            let line = value.to_string();
            if let Some(job) = MinerJob::from_notify_line(&line) {
                return job;
            }
        }
    }

    /// Subscribe and authorize; returns the assigned extranonce1.
    async fn handshake(&mut self, username: &str) -> String {
        self.send(r#"{"id":1,"method":"mining.subscribe","params":["testminer/1.0"]}"#)
            .await;
        let response = self.recv().await;
        assert!(response["error"].is_null());
        let extranonce1 = response["result"][1].as_str().unwrap().to_string();
        assert_eq!(response["result"][2], 4);

        self.send(&format!(
            r#"{{"id":2,"method":"mining.authorize","params":["{username}","x"]}}"#
        ))
        .await;
        let response = self.recv().await;
        assert_eq!(response["result"], serde_json::json!(true));
        extranonce1
    }
}

const MINER_ADDRESS: &str = "fp1qmineraddressxxxxxxxxxxxx";

#[test_log::test(tokio::test)]
async fn test_subscribe_authorize_submit_over_tcp() {
    let pool = start_test_pool(8).await;
    let mut client = MinerClient::connect(pool.port).await;

    let extranonce1 = client.handshake(MINER_ADDRESS).await;

    // The session receives its difficulty and the current job
    let mut saw_set_difficulty = false;
    let job = loop {
        let value = client.recv().await;
        if value["method"] == "mining.set_difficulty" {
            assert_eq!(value["params"][0], 1);
            saw_set_difficulty = true;
            continue;
        }
        if let Some(job) = MinerJob::from_notify_line(&value.to_string()) {
            break job;
        }
    };
    assert!(saw_set_difficulty);
    assert!(job.clean_jobs);

    // Mine a share that is not a block (hash above the network target)
    let mut target = [0u8; 32];
    target[0] = 0x7f;
    target[1] = 0xff;
    target[2] = 0xff;
    let nonce = job
        .mine(&extranonce1, "00000000", |hash| hash > &target)
        .expect("share nonce");

    client
        .send(&format!(
            r#"{{"id":3,"method":"mining.submit","params":["{MINER_ADDRESS}","{}","00000000","{}","{:08x}"]}}"#,
            job.job_id,
            job.ntime_hex(),
            nonce
        ))
        .await;
    let response = client.recv().await;
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"], serde_json::json!(true));
    assert!(response["error"].is_null());
}

#[tokio::test]
async fn test_block_found_over_tcp_reaches_upstream_node() {
    let pool = start_test_pool(8).await;
    let mut client = MinerClient::connect(pool.port).await;

    let extranonce1 = client.handshake(MINER_ADDRESS).await;
    let job = client.recv_notify().await;

    let mut target = [0u8; 32];
    target[0] = 0x7f;
    target[1] = 0xff;
    target[2] = 0xff;
    let nonce = job
        .mine(&extranonce1, "00000000", |hash| hash <= &target)
        .expect("block nonce");

    client
        .send(&format!(
            r#"{{"id":4,"method":"mining.submit","params":["{MINER_ADDRESS}","{}","00000000","{}","{:08x}"]}}"#,
            job.job_id,
            job.ntime_hex(),
            nonce
        ))
        .await;
    let response = client.recv().await;
    assert_eq!(response["result"], serde_json::json!(true));

    // The round closure pushes a clean job to the session
    let next_job = client.recv_notify().await;
    assert!(next_job.clean_jobs);
    assert_ne!(next_job.job_id, job.job_id);

    assert_eq!(pool.node.submitted_blocks().len(), 1);
}

#[tokio::test]
async fn test_submit_without_authorize_gets_code_25() {
    let pool = start_test_pool(8).await;
    let mut client = MinerClient::connect(pool.port).await;

    client
        .send(r#"{"id":1,"method":"mining.submit","params":["w","00","00000000","00000000","00000000"]}"#)
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"][0], 25);
}

#[tokio::test]
async fn test_unknown_method_gets_code_20_and_session_survives() {
    let pool = start_test_pool(8).await;
    let mut client = MinerClient::connect(pool.port).await;

    client
        .send(r#"{"id":1,"method":"mining.wibble","params":[]}"#)
        .await;
    let response = client.recv().await;
    assert_eq!(response["error"][0], 20);

    // The same connection can still subscribe afterwards
    client
        .send(r#"{"id":2,"method":"mining.subscribe","params":["agent/1"]}"#)
        .await;
    let response = client.recv().await;
    assert!(response["error"].is_null());
}

#[tokio::test]
async fn test_invalid_json_gets_code_20() {
    let pool = start_test_pool(8).await;
    let mut client = MinerClient::connect(pool.port).await;

    client.send("this is not json").await;
    let response = client.recv().await;
    assert_eq!(response["error"][0], 20);
    assert!(response["id"].is_null());
}

#[tokio::test]
async fn test_per_ip_connection_cap() {
    let pool = start_test_pool(2).await;

    // Exactly the cap succeeds
    let mut first = MinerClient::connect(pool.port).await;
    let mut second = MinerClient::connect(pool.port).await;
    first
        .send(r#"{"id":1,"method":"mining.subscribe","params":["a/1"]}"#)
        .await;
    assert!(first.recv().await["error"].is_null());
    second
        .send(r#"{"id":1,"method":"mining.subscribe","params":["a/1"]}"#)
        .await;
    assert!(second.recv().await["error"].is_null());

    // One past the cap is dropped before the state machine
    let stream = TcpStream::connect(("127.0.0.1", pool.port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let _ = write_half
        .write_all(b"{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[]}\n")
        .await;
    let mut reader = BufReader::new(read_half).lines();
    let result = tokio::time::timeout(Duration::from_secs(5), reader.next_line()).await;
    match result {
        Ok(Ok(None)) => {}
        Ok(Ok(Some(line))) => panic!("expected drop, got response: {line}"),
        Ok(Err(_)) => {}
        Err(_) => panic!("expected immediate drop, timed out instead"),
    }
}
