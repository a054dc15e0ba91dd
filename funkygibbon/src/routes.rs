//! HTTP transport (§6.1): the sync endpoint plus ancillary status/health
//! endpoints, wired up the way `romilpunetha-tao/src/bin/tao_server.rs`
//! assembles its `axum::Router`.

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Query, State};
use axum::http::{header, Method};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use inbetweenies::store::VersionedStore;
use inbetweenies::SyncRequest;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

pub fn router(state: AppState) -> Router {
    // §5: every request gets a deadline; on expiry the in-flight handler is
    // dropped (rolling back any uncommitted transaction) and the client
    // sees a 5xx it can retry as a transport failure rather than hanging.
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/api/v1/sync/", post(sync))
        .route("/api/v1/sync/status", get(sync_status))
        .route("/api/v1/sync/conflicts", get(sync_conflicts))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .with_state(state)
}

async fn handle_timeout_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::Internal("request exceeded the configured deadline".to_string())
    } else {
        AppError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn sync(
    State(state): State<AppState>,
    bearer: crate::auth::Bearer,
    Json(request): Json<SyncRequest>,
) -> AppResult<Json<inbetweenies::SyncResponse>> {
    bearer.require_authorized()?;
    let response = state.sync_engine.handle_sync(request).await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct StatusQuery {
    device_id: String,
}

#[derive(Serialize)]
struct StatusResponse {
    last_sync: Option<String>,
    pending_count: usize,
    vector_clock: inbetweenies::VectorClock,
}

async fn sync_status(State(state): State<AppState>, Query(params): Query<StatusQuery>) -> AppResult<Json<StatusResponse>> {
    let clock = state.store.device_clock().await.map_err(AppError::from)?;
    Ok(Json(StatusResponse {
        last_sync: clock.clocks.get(&params.device_id).map(|_| chrono::Utc::now().to_rfc3339()),
        pending_count: 0,
        vector_clock: clock,
    }))
}

async fn sync_conflicts(State(state): State<AppState>) -> AppResult<Json<Vec<inbetweenies::EntityVersion>>> {
    use inbetweenies::store::CurrentState;

    // Entities currently in `multi-leaf` state (§4.7) are the server's
    // outstanding conflicts; surface their leaves for operator inspection.
    let ids = state.store.all_entity_ids().await.map_err(AppError::from)?;
    let mut leaves = Vec::new();
    for id in ids {
        if let CurrentState::Conflicting(versions) = state.store.get_current(&id).await.map_err(AppError::from)? {
            for version in versions {
                if let Some(ev) = state.store.get_version(&id, &version).await.map_err(AppError::from)? {
                    leaves.push(ev);
                }
            }
        }
    }
    Ok(Json(leaves))
}
