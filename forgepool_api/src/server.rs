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

use crate::error::ApiError;
use crate::handlers;
use crate::models::ApiState;
use axum::{routing::get, Router};
use forgepool_lib::coordinator::PoolHandle;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::info;

pub struct ApiServer {
    pool: PoolHandle,
    port: u16,
}

impl ApiServer {
    pub fn new(pool: PoolHandle, port: u16) -> Self {
        Self { pool, port }
    }

    fn router(pool: PoolHandle) -> Router {
        Router::new()
            .route("/api/pool/stats", get(handlers::pool_stats))
            .route("/api/pool/blocks", get(handlers::recent_blocks))
            .route("/api/pool/payments", get(handlers::recent_payments))
            .route("/api/pool/topminers", get(handlers::top_miners))
            .route("/api/pool/worker/{address}", get(handlers::worker_stats))
            .route("/health", get(handlers::health_check))
            .with_state(ApiState { pool })
    }

    /// Spawn the server in the background; the returned sender shuts it down.
    pub fn start(self) -> Result<oneshot::Sender<()>, ApiError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let app = Self::router(self.pool);
        tokio::spawn(async move { Self::run_server(addr, app, shutdown_rx).await });
        Ok(shutdown_tx)
    }

    async fn run_server(
        addr: SocketAddr,
        app: Router,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), ApiError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ApiError::BindError)?;
        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                info!("API shutdown signal received.");
            })
            .await
            .map_err(|e| ApiError::ServerError(e.to_string()))?;

        Ok(())
    }
}
