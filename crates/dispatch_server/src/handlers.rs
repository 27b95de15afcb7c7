use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_core::error::MatchError;
use dispatch_core::ingest::IngestSnapshot;
use dispatch_core::model::{new_ride_id, LocationEvent, MatchResponse, RideRequest};
use dispatch_core::telemetry::TelemetrySnapshot;
use serde::Serialize;
use serde_json::json;

use crate::app::AppState;

/// Errors surfaced to HTTP callers as `{"error": ...}` bodies.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NoDrivers,
    Unavailable(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NoDrivers => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no drivers available".to_string(),
            ),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Accept a driver location ping and publish it on the location topic.
pub async fn post_location(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let mut event: LocationEvent =
        serde_json::from_slice(&body).map_err(|err| ApiError::BadRequest(err.to_string()))?;
    event.online = true;

    let payload = serde_json::to_vec(&event).map_err(|err| ApiError::BadRequest(err.to_string()))?;
    state.locations.send(payload).await.map_err(|_| {
        tracing::error!(driver_id = %event.id, "location topic closed");
        ApiError::Unavailable("location ingestion stopped")
    })?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn request_ride(State(state): State<AppState>, body: Bytes) -> Result<Json<MatchResponse>, ApiError> {
    let request: RideRequest =
        serde_json::from_slice(&body).map_err(|err| ApiError::BadRequest(err.to_string()))?;
    request
        .validate()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let ride_id = new_ride_id();
    match state.engine.match_ride(&ride_id, &request).await {
        Ok(offer) => Ok(Json(MatchResponse { ride_id, offer })),
        Err(MatchError::NoCandidates) => Err(ApiError::NoDrivers),
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatch: TelemetrySnapshot,
    pub ingest: IngestSnapshot,
    pub connected_drivers: usize,
    pub eta_cache_entries: usize,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        dispatch: state.telemetry.snapshot(),
        ingest: state.ingest_stats.snapshot(),
        connected_drivers: state.registry.connected(),
        eta_cache_entries: state.cache.as_ref().map_or(0, |cache| cache.len()),
    })
}
