use std::sync::Arc;
use std::time::Instant;
use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::protocol::API_PREFIX;
use shared::types::{LifetimeStats, VitalRecord, Vitals, WifiStatus};
use crate::binding::DeviceBinding;
use crate::device::DeviceClient;
use crate::discovery::Discover;
use crate::query::{self, QueryError};
use crate::store_manager::StoreHandle;

pub const NOT_CONNECTED: &str = "not connected to Tesla Wall Connector";
pub const NOT_FOUND: &str = "unable to find wall connector";

pub struct AppState<D> {
    pub store: StoreHandle,
    pub binding: DeviceBinding,
    pub discovery: Arc<D>,
    pub default_lookback: Arc<str>,
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            binding: self.binding.clone(),
            discovery: Arc::clone(&self.discovery),
            default_lookback: Arc::clone(&self.default_lookback),
        }
    }
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub ip: String,
}

#[derive(Serialize)]
pub struct FindResponse {
    pub ip: String,
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct VitalsQuery {
    pub duration: Option<String>,
}

/// JSON error body with a caller-safe message
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

pub fn router<D>(state: AppState<D>) -> Router
where
    D: Discover + 'static,
{
    let v1 = Router::new()
        .route("/vitals", get(get_vitals::<D>))
        .route("/wifi_status", get(get_wifi_status::<D>))
        .route("/lifetime", get(get_lifetime::<D>))
        .route("/info", get(get_info::<D>))
        .route("/find", get(find::<D>))
        .route("/query", get(query_vitals::<D>))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_device::<D>));

    Router::new()
        .nest(API_PREFIX, v1)
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        "{} {} ({}) {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// Short-circuit device routes while nothing is bound. `/find` always passes
/// since it is how a device gets bound at runtime.
async fn require_device<D>(
    State(state): State<AppState<D>>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path().ends_with("/find") || state.binding.current().is_some() {
        return next.run(req).await;
    }

    Json(json!({ "error": NOT_CONNECTED })).into_response()
}

fn bound<D>(state: &AppState<D>) -> Result<Arc<DeviceClient>, ApiError> {
    state
        .binding
        .current()
        .ok_or_else(|| ApiError(StatusCode::OK, NOT_CONNECTED.to_string()))
}

async fn get_vitals<D>(State(state): State<AppState<D>>) -> Result<Json<Vitals>, ApiError> {
    let device = bound(&state)?;

    let vitals = device.fetch_telemetry().await.map_err(|e| {
        tracing::error!("Failed to get wall connector vitals: {}", e);
        ApiError::internal("failed to get vitals")
    })?;

    // The live value is returned even when it cannot be recorded
    if let Err(e) = state
        .store
        .record_sample(device.ip().to_string(), vitals.clone())
        .await
    {
        tracing::warn!("Failed to record vitals from live request: {}", e);
    }

    Ok(Json(vitals))
}

async fn get_wifi_status<D>(
    State(state): State<AppState<D>>,
) -> Result<Json<WifiStatus>, ApiError> {
    let device = bound(&state)?;

    device.fetch_connectivity().await.map(Json).map_err(|e| {
        tracing::error!("Failed to get wall connector wifi status: {}", e);
        ApiError::internal("failed to get wifi status")
    })
}

async fn get_lifetime<D>(
    State(state): State<AppState<D>>,
) -> Result<Json<LifetimeStats>, ApiError> {
    let device = bound(&state)?;

    device.fetch_usage_counters().await.map(Json).map_err(|e| {
        tracing::error!("Failed to get wall connector lifetime stats: {}", e);
        ApiError::internal("failed to get lifetime stats")
    })
}

async fn get_info<D>(State(state): State<AppState<D>>) -> Result<Json<InfoResponse>, ApiError> {
    let device = bound(&state)?;
    Ok(Json(InfoResponse { ip: device.ip().to_string() }))
}

async fn find<D: Discover>(
    State(state): State<AppState<D>>,
) -> Result<Json<FindResponse>, ApiError> {
    let device = state
        .binding
        .bind_or_discover(&state.store, state.discovery.as_ref())
        .await
        .map_err(|e| {
            tracing::error!("Failed to find wall connector: {}", e);
            ApiError::internal(NOT_FOUND)
        })?;

    Ok(Json(FindResponse {
        ip: device.ip().to_string(),
        status: "connected",
    }))
}

async fn query_vitals<D>(
    State(state): State<AppState<D>>,
    params: Result<Query<VitalsQuery>, QueryRejection>,
) -> Result<Json<Vec<VitalRecord>>, ApiError> {
    let Query(params) = params.map_err(|e| {
        tracing::debug!("Rejected query parameters: {}", e);
        ApiError::internal("invalid query parameters")
    })?;

    let lookback = params
        .duration
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| state.default_lookback.to_string());

    query::query_range(&state.store, &lookback)
        .await
        .map(Json)
        .map_err(|e| match e {
            QueryError::InvalidDuration { .. } => ApiError::internal(e.to_string()),
            QueryError::Store(_) => {
                tracing::error!("Failed to query vitals: {}", e);
                ApiError::internal("failed to query vitals")
            }
        })
}
