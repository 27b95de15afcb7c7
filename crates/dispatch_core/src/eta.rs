//! Travel-time estimation between two coordinates.
//!
//! Two interchangeable strategies sit behind [`EtaEstimator`]:
//!
//! - **`NaiveEstimator`**: haversine distance over a constant speed. Never fails.
//! - **`OsrmEstimator`** (feature `osrm`): asks an OSRM HTTP endpoint for a driving route.
//!
//! [`EtaCache`] is a TTL cache that callers put in front of either strategy.

mod cache;
#[cfg(feature = "osrm")]
mod osrm;

use async_trait::async_trait;

use crate::error::EtaError;
use crate::model::Coordinate;
use crate::spatial::haversine_m;

pub use cache::{EtaCache, EtaCacheConfig};
#[cfg(feature = "osrm")]
pub use osrm::OsrmEstimator;

/// City speed substituted when a configured speed is not positive (~29 km/h).
pub const DEFAULT_SPEED_MPS: f64 = 8.0;

#[async_trait]
pub trait EtaEstimator: Send + Sync {
    /// Seconds to travel from `from` to `to`, or `RouteUnavailable`.
    async fn estimate_seconds(&self, from: Coordinate, to: Coordinate) -> Result<f64, EtaError>;
}

/// Haversine distance divided by `speed_mps`; non-positive speeds use [`DEFAULT_SPEED_MPS`].
pub fn naive_eta_seconds(from: Coordinate, to: Coordinate, speed_mps: f64) -> f64 {
    let speed = if speed_mps.is_finite() && speed_mps > 0.0 {
        speed_mps
    } else {
        DEFAULT_SPEED_MPS
    };
    haversine_m(from, to) / speed
}

#[derive(Debug, Clone, Copy)]
pub struct NaiveEstimator {
    speed_mps: f64,
}

impl NaiveEstimator {
    pub fn new(speed_mps: f64) -> Self {
        Self { speed_mps }
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}

impl Default for NaiveEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_MPS)
    }
}

#[async_trait]
impl EtaEstimator for NaiveEstimator {
    async fn estimate_seconds(&self, from: Coordinate, to: Coordinate) -> Result<f64, EtaError> {
        Ok(naive_eta_seconds(from, to, self.speed_mps))
    }
}
