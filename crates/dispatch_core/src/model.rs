//! Wire and domain types: coordinates, driver records, requests, offers and rides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Highest driver rating; also the reference point of the rating penalty.
pub const MAX_RATING: f64 = 5.0;

/// WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ValidationError::LongitudeOutOfRange(self.lon));
        }
        Ok(())
    }
}

/// Live state of one driver. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: String,
    pub loc: Coordinate,
    pub rating: f64,
    pub online: bool,
    pub updated: DateTime<Utc>,
}

impl DriverRecord {
    pub fn new(id: impl Into<String>, loc: Coordinate, rating: f64, online: bool) -> Self {
        Self {
            id: id.into(),
            loc,
            rating,
            online,
            updated: Utc::now(),
        }
    }
}

/// Location-update event as published on the location topic.
///
/// `updated` is optional on the wire; the index re-stamps it on upsert anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    pub id: String,
    pub loc: Coordinate,
    pub rating: f64,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl LocationEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        self.loc.validate()?;
        if !(0.0..=MAX_RATING).contains(&self.rating) {
            return Err(ValidationError::RatingOutOfRange(self.rating));
        }
        Ok(())
    }

    /// Validate and convert into the record the index stores.
    pub fn into_record(self) -> Result<DriverRecord, ValidationError> {
        self.validate()?;
        Ok(DriverRecord {
            id: self.id,
            loc: self.loc,
            rating: self.rating,
            online: self.online,
            updated: self.updated.unwrap_or_else(Utc::now),
        })
    }
}

impl From<&DriverRecord> for LocationEvent {
    fn from(record: &DriverRecord) -> Self {
        Self {
            id: record.id.clone(),
            loc: record.loc,
            rating: record.rating,
            online: record.online,
            updated: Some(record.updated),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub rider_id: String,
    pub origin: Coordinate,
    pub destination: Coordinate,
}

impl RideRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rider_id.trim().is_empty() {
            return Err(ValidationError::EmptyRiderId);
        }
        self.origin.validate()?;
        self.destination.validate()
    }
}

/// Proposal sent to the winning driver and returned to the rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOffer {
    pub driver_id: String,
    pub eta_seconds: f64,
    pub cost: f64,
}

/// Synchronous answer to a ride request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub ride_id: String,
    pub offer: MatchOffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Requested,
    Matched,
    Accepted,
    Ongoing,
    Completed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub driver_id: String,
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// Ride in `matched` state for the given winner.
    pub fn matched(ride_id: &str, request: &RideRequest, driver_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: ride_id.to_string(),
            rider_id: request.rider_id.clone(),
            driver_id: driver_id.to_string(),
            origin: request.origin,
            destination: request.destination,
            status: RideStatus::Matched,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Random 16-hex-character ride id.
pub fn new_ride_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
