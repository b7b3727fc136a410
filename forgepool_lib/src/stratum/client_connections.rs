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

//! Broadcast fan-out to connected sessions.
//!
//! An actor owns the map from connection id to that connection's outbound
//! channel, so sends never take a lock. Broadcasts use `try_send`: a client
//! too slow to drain its buffer is disconnected rather than allowed to stall
//! the pool.

use crate::ids::ConnId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Buffer size for the per-client outbound channel.
const MSG_CHANNEL_SIZE: usize = 16;

/// Per-client channel endpoints.
struct ClientChannels {
    message_tx: mpsc::Sender<Arc<String>>,
    shutdown_tx: oneshot::Sender<()>,
}

/// Commands understood by the connections actor.
#[derive(Debug)]
pub enum ConnectionCommand {
    Add {
        conn_id: ConnId,
        response: oneshot::Sender<(mpsc::Receiver<Arc<String>>, oneshot::Receiver<()>)>,
    },
    Remove {
        conn_id: ConnId,
    },
    SendToAll {
        message: Arc<String>,
    },
    SendToClient {
        conn_id: ConnId,
        message: Arc<String>,
    },
    /// Force-close one connection (ban, admission failure).
    Shutdown {
        conn_id: ConnId,
    },
    ConnectionCount {
        response: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the connections actor.
#[derive(Debug, Clone)]
pub struct ConnectionsHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
}

impl ConnectionsHandle {
    /// Register a connection; returns its message stream and shutdown signal.
    pub async fn add(
        &self,
        conn_id: ConnId,
    ) -> (mpsc::Receiver<Arc<String>>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(ConnectionCommand::Add {
                conn_id,
                response: tx,
            })
            .await;
        rx.await.expect("connections actor has been dropped")
    }

    pub async fn remove(&self, conn_id: ConnId) {
        let _ = self.cmd_tx.send(ConnectionCommand::Remove { conn_id }).await;
    }

    /// Fire-and-forget broadcast to every connection.
    pub async fn send_to_all(&self, message: Arc<String>) {
        let _ = self
            .cmd_tx
            .send(ConnectionCommand::SendToAll { message })
            .await;
    }

    /// Fire-and-forget send to one connection.
    pub async fn send_to_client(&self, conn_id: ConnId, message: Arc<String>) {
        let _ = self
            .cmd_tx
            .send(ConnectionCommand::SendToClient { conn_id, message })
            .await;
    }

    /// Signal one connection's task to close.
    pub async fn shutdown_client(&self, conn_id: ConnId) {
        let _ = self.cmd_tx.send(ConnectionCommand::Shutdown { conn_id }).await;
    }

    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(ConnectionCommand::ConnectionCount { response: tx })
            .await;
        rx.await.unwrap_or(0)
    }
}

#[derive(Default)]
struct Connections {
    clients: HashMap<ConnId, ClientChannels>,
}

impl Connections {
    fn add(&mut self, conn_id: ConnId) -> (mpsc::Receiver<Arc<String>>, oneshot::Receiver<()>) {
        let (message_tx, message_rx) = mpsc::channel(MSG_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.clients.insert(
            conn_id,
            ClientChannels {
                message_tx,
                shutdown_tx,
            },
        );
        (message_rx, shutdown_rx)
    }

    fn remove(&mut self, conn_id: ConnId, signal_shutdown: bool) -> bool {
        if let Some(channels) = self.clients.remove(&conn_id) {
            if signal_shutdown {
                let _ = channels.shutdown_tx.send(());
            }
            true
        } else {
            false
        }
    }

    fn send_to_all(&mut self, message: Arc<String>) {
        let mut failed = Vec::new();
        for (conn_id, channels) in &self.clients {
            if channels.message_tx.try_send(message.clone()).is_err() {
                failed.push(*conn_id);
            }
        }
        // Slow consumers are cut loose
        for conn_id in failed {
            self.remove(conn_id, true);
        }
    }

    fn send_to_client(&mut self, conn_id: ConnId, message: Arc<String>) -> bool {
        if let Some(channels) = self.clients.get(&conn_id) {
            if channels.message_tx.try_send(message).is_ok() {
                return true;
            }
            self.remove(conn_id, true);
        }
        false
    }
}

/// Spawn the connections actor and return a handle to it.
pub fn start_connections_actor() -> ConnectionsHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ConnectionCommand>(64);
    let handle = ConnectionsHandle { cmd_tx };

    let mut connections = Connections::default();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                ConnectionCommand::Add { conn_id, response } => {
                    let channels = connections.add(conn_id);
                    let _ = response.send(channels);
                }
                ConnectionCommand::Remove { conn_id } => {
                    connections.remove(conn_id, false);
                }
                ConnectionCommand::SendToAll { message } => {
                    connections.send_to_all(message);
                }
                ConnectionCommand::SendToClient { conn_id, message } => {
                    connections.send_to_client(conn_id, message);
                }
                ConnectionCommand::Shutdown { conn_id } => {
                    connections.remove(conn_id, true);
                }
                ConnectionCommand::ConnectionCount { response } => {
                    let _ = response.send(connections.clients.len());
                }
            }
        }
    });
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let mut connections = Connections::default();

        let (_rx, _shutdown) = connections.add(ConnId(1));
        assert_eq!(connections.clients.len(), 1);

        assert!(connections.remove(ConnId(1), false));
        assert!(connections.clients.is_empty());
        assert!(!connections.remove(ConnId(1), false));
    }

    #[test]
    fn test_send_to_all_reaches_every_client() {
        let mut connections = Connections::default();
        let (mut rx1, _s1) = connections.add(ConnId(1));
        let (mut rx2, _s2) = connections.add(ConnId(2));

        let message = Arc::new("job".to_string());
        connections.send_to_all(message.clone());

        assert_eq!(rx1.try_recv().unwrap(), message);
        assert_eq!(rx2.try_recv().unwrap(), message);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_send_to_client_targets_one() {
        let mut connections = Connections::default();
        let (mut rx1, _s1) = connections.add(ConnId(1));
        let (mut rx2, _s2) = connections.add(ConnId(2));

        let message = Arc::new("difficulty".to_string());
        assert!(connections.send_to_client(ConnId(1), message.clone()));

        assert_eq!(rx1.try_recv().unwrap(), message);
        assert!(rx2.try_recv().is_err());
        assert!(!connections.send_to_client(ConnId(9), Arc::new("x".to_string())));
    }

    #[test]
    fn test_slow_consumer_is_disconnected() {
        let mut connections = Connections::default();
        let (_rx, mut shutdown_rx) = connections.add(ConnId(1));

        // Fill the buffer past capacity without draining
        for i in 0..(MSG_CHANNEL_SIZE + 1) {
            connections.send_to_all(Arc::new(format!("m{i}")));
        }

        assert!(connections.clients.is_empty());
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let handle = start_connections_actor();

        let (mut rx1, _shutdown1) = handle.add(ConnId(1)).await;
        let (mut rx2, _shutdown2) = handle.add(ConnId(2)).await;
        assert_eq!(handle.connection_count().await, 2);

        let message = Arc::new("notify".to_string());
        handle.send_to_all(message.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), message);
        assert_eq!(rx2.recv().await.unwrap(), message);

        handle.remove(ConnId(1)).await;
        assert_eq!(handle.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_actor_shutdown_signals_client() {
        let handle = start_connections_actor();
        let (_rx, shutdown_rx) = handle.add(ConnId(7)).await;

        handle.shutdown_client(ConnId(7)).await;
        shutdown_rx.await.expect("shutdown signal should arrive");
        assert_eq!(handle.connection_count().await, 0);
    }
}
