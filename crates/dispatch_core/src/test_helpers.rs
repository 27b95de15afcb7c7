//! Test helpers for common test setup and utilities.
//!
//! Fakes for every pluggable seam of the core, shared by unit tests, the integration
//! tests and the server crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::dispatch::DispatchNotifier;
use crate::error::{DispatchError, EtaError, GeoStoreError, StoreError};
use crate::eta::EtaEstimator;
use crate::ingest::LocationSink;
use crate::model::{Coordinate, DriverRecord, MatchOffer, Ride};
use crate::spatial::{DriverMeta, GeoHit, GeoStore};
use crate::storage::TripRecorder;

/// Build a driver record stamped with the current time.
pub fn driver(id: &str, lat: f64, lon: f64, rating: f64, online: bool) -> DriverRecord {
    DriverRecord::new(id, Coordinate::new(lat, lon), rating, online)
}

/// Geo store whose every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGeoStore;

#[async_trait]
impl GeoStore for UnavailableGeoStore {
    async fn add_point(&self, _id: &str, _loc: Coordinate) -> Result<(), GeoStoreError> {
        Err(GeoStoreError::Unavailable("connection refused".into()))
    }

    async fn radius_query(
        &self,
        _center: Coordinate,
        _radius_m: f64,
        _limit: usize,
    ) -> Result<Vec<GeoHit>, GeoStoreError> {
        Err(GeoStoreError::Unavailable("connection refused".into()))
    }

    async fn put_meta(&self, _id: &str, _meta: &DriverMeta) -> Result<(), GeoStoreError> {
        Err(GeoStoreError::Unavailable("connection refused".into()))
    }

    async fn fetch_meta(&self, _id: &str) -> Result<Option<DriverMeta>, GeoStoreError> {
        Err(GeoStoreError::Unavailable("connection refused".into()))
    }
}

/// Location sink failing the first `fail_position` position writes and the first
/// `fail_metadata` metadata writes, then succeeding.
#[derive(Debug, Default)]
pub struct FlakySink {
    fail_position: usize,
    fail_metadata: usize,
    position_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
}

impl FlakySink {
    pub fn new(fail_position: usize, fail_metadata: usize) -> Self {
        Self {
            fail_position,
            fail_metadata,
            ..Self::default()
        }
    }

    pub fn position_calls(&self) -> usize {
        self.position_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationSink for FlakySink {
    async fn write_position(&self, _driver: &DriverRecord) -> Result<(), GeoStoreError> {
        let call = self.position_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_position {
            return Err(GeoStoreError::Unavailable("position write failed".into()));
        }
        Ok(())
    }

    async fn write_metadata(&self, _driver: &DriverRecord) -> Result<(), GeoStoreError> {
        let call = self.metadata_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_metadata {
            return Err(GeoStoreError::Unavailable("metadata write failed".into()));
        }
        Ok(())
    }
}

/// Notifier that records every offer, optionally failing each delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    offers: Mutex<Vec<(String, MatchOffer)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records offers but reports every one as undeliverable.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn offers(&self) -> Vec<(String, MatchOffer)> {
        self.offers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DispatchNotifier for RecordingNotifier {
    async fn offer(&self, ride_id: &str, offer: &MatchOffer) -> Result<(), DispatchError> {
        self.offers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((ride_id.to_string(), offer.clone()));
        if self.fail {
            return Err(DispatchError::NoSession(offer.driver_id.clone()));
        }
        Ok(())
    }
}

/// Trip recorder that rejects every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingTripStore;

#[async_trait]
impl TripRecorder for FailingTripStore {
    async fn save_ride(&self, ride: &Ride) -> Result<(), StoreError> {
        Err(StoreError::Persistence(format!("cannot save {}", ride.id)))
    }

    async fn update_ride(&self, ride: &Ride) -> Result<(), StoreError> {
        Err(StoreError::Persistence(format!("cannot update {}", ride.id)))
    }
}

/// Routing backend that is always down.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEstimator;

#[async_trait]
impl EtaEstimator for FailingEstimator {
    async fn estimate_seconds(&self, _from: Coordinate, _to: Coordinate) -> Result<f64, EtaError> {
        Err(EtaError::RouteUnavailable("routing backend down".into()))
    }
}

/// Routing backend returning a constant duration and counting its calls.
#[derive(Debug, Default)]
pub struct FixedEstimator {
    seconds: f64,
    calls: AtomicUsize,
}

impl FixedEstimator {
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EtaEstimator for FixedEstimator {
    async fn estimate_seconds(&self, _from: Coordinate, _to: Coordinate) -> Result<f64, EtaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.seconds)
    }
}
