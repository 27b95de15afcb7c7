#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::dispatch::{ChannelRegistry, MpscOfferChannel};
use dispatch_core::eta::{EtaCache, EtaCacheConfig, EtaEstimator};
use dispatch_core::matching::{MatcherConfig, MatchingEngine};
use dispatch_core::model::{Coordinate, RideRequest};
use dispatch_core::spatial::InMemoryGeoIndex;
use dispatch_core::storage::MemoryTripStore;
use dispatch_core::telemetry::DispatchTelemetry;
use tokio::sync::mpsc;

/// Fully wired in-memory dispatch stack.
pub struct TestDispatch {
    pub geo: Arc<InMemoryGeoIndex>,
    pub registry: Arc<ChannelRegistry>,
    pub trips: Arc<MemoryTripStore>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub cache: Arc<EtaCache>,
    pub engine: MatchingEngine,
}

impl TestDispatch {
    /// Register an in-process channel for `driver_id` and hand back its receiving end.
    pub fn connect(&self, driver_id: &str) -> mpsc::Receiver<String> {
        let (channel, rx) = MpscOfferChannel::new(driver_id, 8);
        self.registry.register(driver_id, Arc::new(channel));
        rx
    }
}

/// Builder configuration for reproducible dispatch stacks.
#[derive(Default)]
pub struct TestDispatchBuilder {
    matcher: MatcherConfig,
    cache: EtaCacheConfig,
    estimator: Option<Arc<dyn EtaEstimator>>,
}

impl TestDispatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_cache(mut self, cache: EtaCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn EtaEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn build(self) -> TestDispatch {
        let geo = Arc::new(InMemoryGeoIndex::new());
        let registry = Arc::new(ChannelRegistry::new());
        let trips = Arc::new(MemoryTripStore::new());
        let telemetry = Arc::new(DispatchTelemetry::new());
        let cache = Arc::new(EtaCache::new(self.cache));

        let mut engine = MatchingEngine::new(
            geo.clone(),
            registry.clone(),
            trips.clone(),
            self.matcher,
        )
        .with_cache(cache.clone())
        .with_telemetry(telemetry.clone());
        if let Some(estimator) = self.estimator {
            engine = engine.with_estimator(estimator);
        }

        TestDispatch {
            geo,
            registry,
            trips,
            telemetry,
            cache,
            engine,
        }
    }
}

pub fn ride_request(rider_id: &str, lat: f64, lon: f64) -> RideRequest {
    RideRequest {
        rider_id: rider_id.to_string(),
        origin: Coordinate::new(lat, lon),
        destination: Coordinate::new(lat + 0.02, lon + 0.02),
    }
}
