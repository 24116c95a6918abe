//! API Handlers
//!
//! HTTP request handlers for each admin endpoint. Every handler goes
//! through the [`Cache`] handle, so events, hooks and persistence
//! notifications fire exactly as they do for in-process callers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::cache::{Cache, HealthStatus, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::models::{
    BreakerResponse, DeleteResponse, GetResponse, HealthResponse, InvalidateResponse, KeysQuery,
    KeysResponse, PartitionsResponse, SetRequest, SetResponse,
};

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: Cache,
}

impl AppState {
    /// Creates a new AppState around an existing cache handle.
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState with a cache built from configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self::new(Cache::new(config))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value with optional TTL, stale window, dependencies and tags.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let options = req.options();
    state.cache.set(&req.key, req.value, options).await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state
        .cache
        .get(&key)
        .await
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
///
/// Deletes a key and everything depending on it.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let removed = state.cache.delete(&key).await;
    if removed.is_empty() {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key, removed)))
}

/// Handler for POST /invalidate/tag/:tag
pub async fn invalidate_tag_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.cache.invalidate_by_tag(&tag).await;
    Json(InvalidateResponse { tag, removed })
}

/// Handler for GET /keys?pattern=
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>> {
    let keys = state.cache.keys(query.pattern.as_deref()).await?;
    Ok(Json(KeysResponse::new(keys)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.cache.stats().await)
}

/// Handler for GET /partitions
pub async fn partitions_handler(State(state): State<AppState>) -> Json<PartitionsResponse> {
    let partitions = state.cache.partition_info().await;
    Json(PartitionsResponse {
        enabled: !partitions.is_empty(),
        balanced: state.cache.is_partition_balanced().await,
        partitions,
    })
}

/// Handler for GET /breaker
pub async fn breaker_handler(State(state): State<AppState>) -> Json<BreakerResponse> {
    let snapshot = state.cache.breaker_state();
    Json(BreakerResponse {
        enabled: snapshot.is_some(),
        state: snapshot,
    })
}

/// Handler for GET /health
///
/// Responds 503 when the engine reports itself unhealthy.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.cache.health().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (
        status,
        Json(HealthResponse::from_report(state.cache.namespace(), report)),
    )
}
