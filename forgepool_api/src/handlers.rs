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

use crate::models::{ApiState, ErrorResponse, LimitQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use forgepool_lib::stats::{BlockInfo, MinerStatsInfo, PaymentInfo, PoolStats, TopMinerInfo};
use tracing::error;

const DEFAULT_LIMIT: usize = 25;
const MAX_LIMIT: usize = 100;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn unavailable(context: &str) -> (StatusCode, Json<ErrorResponse>) {
    error!("Coordinator unavailable while serving {}", context);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "unavailable".to_string(),
            message: "pool coordinator is not responding".to_string(),
        }),
    )
}

fn clamp_limit(query: &LimitQuery) -> usize {
    query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

pub async fn pool_stats(State(state): State<ApiState>) -> ApiResult<PoolStats> {
    state
        .pool
        .pool_stats()
        .await
        .map(Json)
        .map_err(|_| unavailable("pool_stats"))
}

pub async fn recent_blocks(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<BlockInfo>> {
    state
        .pool
        .recent_blocks(clamp_limit(&query))
        .await
        .map(Json)
        .map_err(|_| unavailable("recent_blocks"))
}

pub async fn recent_payments(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<PaymentInfo>> {
    state
        .pool
        .recent_payments(clamp_limit(&query))
        .await
        .map(Json)
        .map_err(|_| unavailable("recent_payments"))
}

pub async fn top_miners(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<TopMinerInfo>> {
    state
        .pool
        .top_miners(clamp_limit(&query))
        .await
        .map(Json)
        .map_err(|_| unavailable("top_miners"))
}

pub async fn worker_stats(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<MinerStatsInfo> {
    let found = state
        .pool
        .miner_stats(address.clone())
        .await
        .map_err(|_| unavailable("worker_stats"))?;

    match found {
        Some(stats) => Ok(Json(stats)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "not_found".to_string(),
                message: format!("no miner with address {address}"),
            }),
        )),
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}
