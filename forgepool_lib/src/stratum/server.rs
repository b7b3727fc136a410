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

//! The Stratum TCP listener and per-connection loop.
//!
//! The accept loop screens banned IPs and the per-IP cap before a connection
//! ever enters the protocol state machine. Each accepted connection runs its
//! own read-parse-dispatch task; broadcasts arrive over the connections
//! actor's channel and are only forwarded once the session authorizes.

use crate::banlist::Banlist;
use crate::coordinator::PoolHandle;
use crate::ids::{ConnId, IdAllocator};
use crate::stratum::client_connections::ConnectionsHandle;
use crate::stratum::message_handlers::{handle_message, Disposition};
use crate::stratum::messages::{Request, Response};
use crate::stratum::session::{Session, SessionState};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info};

/// Lines longer than this close the connection (DoS guard).
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// How often a connection task checks its idle timer.
const IDLE_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Live connection count per peer IP, shared with every connection task.
type IpCounts = Arc<Mutex<HashMap<IpAddr, usize>>>;

pub struct StratumServer {
    pub hostname: String,
    pub port: u16,
    max_connections_per_ip: usize,
    connection_timeout: Duration,
    shutdown_rx: oneshot::Receiver<()>,
    connections: ConnectionsHandle,
    pool: PoolHandle,
    banlist: Arc<Banlist>,
    ids: Arc<IdAllocator>,
}

/// Builder for [`StratumServer`] so call sites do not depend on the full
/// config type.
#[derive(Default)]
pub struct StratumServerBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    max_connections_per_ip: Option<usize>,
    connection_timeout: Option<Duration>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    connections: Option<ConnectionsHandle>,
    pool: Option<PoolHandle>,
    banlist: Option<Arc<Banlist>>,
    ids: Option<Arc<IdAllocator>>,
}

impl StratumServerBuilder {
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = Some(hostname);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn max_connections_per_ip(mut self, max: usize) -> Self {
        self.max_connections_per_ip = Some(max);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn shutdown_rx(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    pub fn connections(mut self, connections: ConnectionsHandle) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn banlist(mut self, banlist: Arc<Banlist>) -> Self {
        self.banlist = Some(banlist);
        self
    }

    pub fn ids(mut self, ids: Arc<IdAllocator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<StratumServer, Box<dyn std::error::Error + Send + Sync>> {
        Ok(StratumServer {
            hostname: self.hostname.ok_or("hostname is required")?,
            port: self.port.ok_or("port is required")?,
            max_connections_per_ip: self
                .max_connections_per_ip
                .ok_or("max_connections_per_ip is required")?,
            connection_timeout: self
                .connection_timeout
                .ok_or("connection_timeout is required")?,
            shutdown_rx: self.shutdown_rx.ok_or("shutdown_rx is required")?,
            connections: self.connections.ok_or("connections is required")?,
            pool: self.pool.ok_or("pool is required")?,
            banlist: self.banlist.ok_or("banlist is required")?,
            ids: self.ids.ok_or("ids is required")?,
        })
    }
}

impl StratumServer {
    /// Run the accept loop until shutdown. `ready_tx` fires once the socket
    /// is bound and the server accepts connections.
    pub async fn start(
        &mut self,
        ready_tx: Option<oneshot::Sender<()>>,
    ) -> Result<(), Box<dyn std::error::Error + Send>> {
        info!("Starting Stratum server at {}:{}", self.hostname, self.port);

        let bind_address = format!("{}:{}", self.hostname, self.port);
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind to {}: {}", bind_address, e);
                return Err(Box::new(e));
            }
        };

        if let Some(ready_tx) = ready_tx {
            info!(
                "Stratum server is ready to accept connections on {}",
                bind_address
            );
            ready_tx.send(()).ok();
        }

        let ip_counts: IpCounts = Arc::new(Mutex::new(HashMap::new()));

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }
                connection = listener.accept() => {
                    match connection {
                        Ok((stream, addr)) => {
                            self.admit(stream, addr, ip_counts.clone()).await;
                        }
                        Err(e) => {
                            info!("Connection failed: {}", e);
                            continue;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Screen one accepted socket, then hand it to a connection task.
    async fn admit(&self, stream: tokio::net::TcpStream, addr: SocketAddr, ip_counts: IpCounts) {
        let ip = addr.ip();
        let now = SystemTime::now();

        if self.banlist.is_ip_banned(&ip, now) {
            info!("Dropping connection from banned IP {}", ip);
            return;
        }

        {
            let mut counts = ip_counts.lock().unwrap();
            let count = counts.entry(ip).or_insert(0);
            if *count >= self.max_connections_per_ip {
                info!("Dropping connection from {}: per-IP limit reached", ip);
                return;
            }
            *count += 1;
        }

        let conn_id = self.ids.next_conn_id();
        info!("New connection {} from {}", conn_id, addr);
        let (message_rx, shutdown_rx) = self.connections.add(conn_id).await;
        let (reader, writer) = stream.into_split();
        let buf_reader = BufReader::new(reader);

        let pool = self.pool.clone();
        let connections = self.connections.clone();
        let connection_timeout = self.connection_timeout;

        tokio::spawn(async move {
            if handle_connection(
                buf_reader,
                writer,
                conn_id,
                addr,
                message_rx,
                shutdown_rx,
                &pool,
                connection_timeout,
            )
            .await
            .is_err()
            {
                error!("Error on connection {}. Closing.", conn_id);
            }
            pool.disconnect(conn_id).await;
            connections.remove(conn_id).await;
            let mut counts = ip_counts.lock().unwrap();
            if let Some(count) = counts.get_mut(&ip) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&ip);
                }
            }
        });
    }
}

/// One connection's read-parse-dispatch loop.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    conn_id: ConnId,
    addr: SocketAddr,
    mut message_rx: mpsc::Receiver<Arc<String>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    pool: &PoolHandle,
    connection_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error + Send>>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut framed = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let session = &mut Session::new(conn_id, SystemTime::now());

    let mut monitor = tokio::time::interval(IDLE_MONITOR_INTERVAL);
    monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    monitor.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, closing connection from {}", addr);
                break;
            }
            // Broadcasts and targeted notifies from the coordinator
            Some(message) = message_rx.recv() => {
                if !session.is_authorized() {
                    continue;
                }
                debug!("Tx {} {}", addr, message);
                if let Err(e) = writer.write_all(format!("{message}\n").as_bytes()).await {
                    error!("Failed to write to {}: {}", addr, e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Failed to flush writer for {}: {}", addr, e);
                    break;
                }
            }
            line = framed.next() => {
                match line {
                    Some(Ok(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        debug!("Rx {} {}", addr, line);
                        session.touch(SystemTime::now());
                        match process_line(&line, &mut writer, session, addr, pool).await {
                            Ok(Disposition::Keep) => {}
                            Ok(Disposition::Close) => break,
                            Err(e) => {
                                error!("Error processing message from {}: {}", addr, e);
                                return Err(e);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error reading line from {}: {}", addr, e);
                        session.state = SessionState::Closed;
                        return Err(Box::new(e));
                    }
                    None => {
                        info!("Connection closed by client: {}", addr);
                        break;
                    }
                }
            }
            _ = monitor.tick() => {
                let idle = SystemTime::now()
                    .duration_since(session.last_activity)
                    .unwrap_or(Duration::ZERO);
                if idle > connection_timeout {
                    info!("{} inactive for {}s, disconnecting", addr, idle.as_secs());
                    break;
                }
            }
        }
    }
    session.state = SessionState::Closed;
    Ok(())
}

async fn process_line<W>(
    line: &str,
    writer: &mut W,
    session: &mut Session,
    addr: SocketAddr,
    pool: &PoolHandle,
) -> Result<Disposition, Box<dyn std::error::Error + Send>>
where
    W: AsyncWriteExt + Unpin,
{
    let (response, disposition) = match Request::parse(line) {
        Ok(request) => handle_message(request, session, addr, pool).await,
        Err(e) => {
            debug!("Failed to parse message from {}: {}", addr, e);
            let disposition = if session.record_parse_failure() {
                info!("Too many unparseable lines from {}, closing", addr);
                Disposition::Close
            } else {
                Disposition::Keep
            };
            (
                Response::new_error(None, 20, "Invalid JSON"),
                disposition,
            )
        }
    };

    let response_json = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize response for {}: {}", addr, e);
            return Err(Box::new(e));
        }
    };

    debug!("Tx {} {}", addr, response_json);
    if let Err(e) = writer
        .write_all(format!("{response_json}\n").as_bytes())
        .await
    {
        return Err(Box::new(e));
    }
    if let Err(e) = writer.flush().await {
        return Err(Box::new(e));
    }
    Ok(disposition)
}
