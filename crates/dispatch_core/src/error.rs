//! Error types shared across the dispatch core.
//!
//! Only [`MatchError::NoCandidates`] ever reaches a ride-request caller. The rest are
//! absorbed where they occur (logged, counted or replaced by a fallback).

use thiserror::Error;

/// Malformed inbound event or request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("driver id must not be empty")]
    EmptyId,
    #[error("rider id must not be empty")]
    EmptyRiderId,
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("rating {0} outside [0, 5]")]
    RatingOutOfRange(f64),
}

/// Routing backend could not produce an estimate.
#[derive(Debug, Error)]
pub enum EtaError {
    #[error("route unavailable: {0}")]
    RouteUnavailable(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no live session for driver {0}")]
    NoSession(String),
    #[error("channel for driver {0} is closed")]
    ChannelClosed(String),
    #[error("channel for driver {0} is full")]
    ChannelFull(String),
    #[error("failed to write offer to driver {driver_id}: {reason}")]
    Write { driver_id: String, reason: String },
    #[error("failed to encode offer: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("push provider rejected offer: {0}")]
    Push(String),
}

/// Ride record could not be written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Geospatial backend failure (spatial write, metadata write or query).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoStoreError {
    #[error("geo store unavailable: {0}")]
    Unavailable(String),
    #[error("coordinate ({lat}, {lon}) cannot be indexed")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("no drivers available near the pickup point")]
    NoCandidates,
}

/// Bounded retry ran out of attempts; carries the final failure.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("undecodable location event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid location event: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted<GeoStoreError>),
}

impl IngestError {
    /// Decode and validation failures are never retried.
    pub fn is_invalid_message(&self) -> bool {
        matches!(self, IngestError::Decode(_) | IngestError::Validation(_))
    }
}
