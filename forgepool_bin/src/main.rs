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

use clap::Parser;
use forgepool_api::ApiServer;
use forgepool_lib::banlist::Banlist;
use forgepool_lib::config::Config;
use forgepool_lib::coordinator::{start_pool_coordinator, PoolSettings};
use forgepool_lib::ids::IdAllocator;
use forgepool_lib::logging::setup_logging;
use forgepool_lib::stratum::client_connections::start_connections_actor;
use forgepool_lib::stratum::server::StratumServerBuilder;
use noderpc::NodeRpcClient;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return Err(format!("Failed to load config: {e}").into());
        }
    };

    let _log_guard = setup_logging(&config.logging)?;
    info!("Starting {}...", config.pool.pool_name);

    let node = Arc::new(NodeRpcClient::from_config(&config.noderpc)?);
    let ids = Arc::new(IdAllocator::new());
    let banlist = Arc::new(Banlist::new());
    let connections = start_connections_actor();

    let settings = PoolSettings::from(&config);
    let pool = start_pool_coordinator(
        settings,
        node,
        ids.clone(),
        connections.clone(),
        banlist.clone(),
    );

    let api_shutdown_tx = ApiServer::new(pool.clone(), config.api.port).start()?;

    let (stratum_shutdown_tx, stratum_shutdown_rx) = tokio::sync::oneshot::channel();
    let mut stratum_server = StratumServerBuilder::default()
        .hostname(config.stratum.hostname.clone())
        .port(config.stratum.port)
        .max_connections_per_ip(config.stratum.max_connections_per_ip)
        .connection_timeout(Duration::from_secs(config.stratum.connection_timeout_s))
        .shutdown_rx(stratum_shutdown_rx)
        .connections(connections)
        .pool(pool.clone())
        .banlist(banlist)
        .ids(ids)
        .build()
        .map_err(|e| format!("Failed to build Stratum server: {e}"))?;

    let server_handle = tokio::spawn(async move {
        info!("Starting Stratum server...");
        if let Err(e) = stratum_server.start(None).await {
            error!("Stratum server stopped with error: {}", e);
        }
        info!("Stratum server stopped");
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // Stop accepting first, then let sessions drain, then the API
    stratum_shutdown_tx.send(()).ok();
    let _ = server_handle.await;
    api_shutdown_tx.send(()).ok();

    info!("Goodbye");
    Ok(())
}
