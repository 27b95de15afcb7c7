//! Spatial operations: great-circle distance and the driver geo index.
//!
//! This module provides:
//!
//! - **haversine_m**: distance in metres on a 6,371 km sphere
//! - **GeoIndex**: the capability the matcher and ingestion depend on
//! - **InMemoryGeoIndex**: O(n) scan with partial selection, the default backend
//! - **StoreGeoIndex**: delegates to a [`GeoStore`] and fails open on backend errors
//! - **H3CellStore**: in-process [`GeoStore`] bucketing drivers by H3 cell

mod h3_store;
mod memory;
mod store;

use async_trait::async_trait;

use crate::error::GeoStoreError;
use crate::model::{Coordinate, DriverRecord};

pub use h3_store::H3CellStore;
pub use memory::InMemoryGeoIndex;
pub use store::{DriverMeta, GeoHit, GeoStore, StoreGeoIndex, DEFAULT_SEARCH_RADIUS_M};

/// Mean Earth radius used by every distance calculation.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in metres.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Live set of drivers answering nearest-driver queries.
///
/// Implementations must never return an offline driver from [`GeoIndex::nearby`].
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Insert or replace the record for `driver.id`, stamping last-update with now.
    async fn upsert(&self, driver: DriverRecord) -> Result<(), GeoStoreError>;

    /// At most `limit` online drivers, ascending by distance from `point`.
    async fn nearby(&self, point: Coordinate, limit: usize) -> Vec<DriverRecord>;
}
