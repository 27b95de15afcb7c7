use std::sync::Arc;

use futures_util::future::join_all;

use super::cost_based::{select_best, ScoredCandidate, DEFAULT_RATING_WEIGHT};
use crate::dispatch::DispatchNotifier;
use crate::error::MatchError;
use crate::eta::{naive_eta_seconds, EtaCache, EtaEstimator};
use crate::model::{Coordinate, DriverRecord, MatchOffer, Ride, RideRequest};
use crate::spatial::GeoIndex;
use crate::storage::TripRecorder;
use crate::telemetry::DispatchTelemetry;

/// Candidates considered per request unless configured otherwise.
pub const DEFAULT_TOP_N: i32 = 8;
/// Used when the configured candidate count is not positive.
pub const FALLBACK_TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    pub top_n: i32,
    /// Speed for the naive fallback when routing is unavailable.
    pub default_speed_mps: f64,
    pub rating_weight: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            default_speed_mps: 10.0,
            rating_weight: DEFAULT_RATING_WEIGHT,
        }
    }
}

impl MatcherConfig {
    pub fn with_top_n(mut self, top_n: i32) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_default_speed_mps(mut self, speed_mps: f64) -> Self {
        self.default_speed_mps = speed_mps;
        self
    }

    pub fn with_rating_weight(mut self, rating_weight: f64) -> Self {
        self.rating_weight = rating_weight;
        self
    }

    pub fn effective_top_n(&self) -> usize {
        usize::try_from(self.top_n)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(FALLBACK_TOP_N)
    }
}

/// Picks the cheapest nearby driver for a ride request, records the ride and offers it.
///
/// Only an empty candidate set is an error. Routing, persistence and delivery failures
/// are logged and absorbed.
pub struct MatchingEngine {
    geo: Arc<dyn GeoIndex>,
    notifier: Arc<dyn DispatchNotifier>,
    trips: Arc<dyn TripRecorder>,
    estimator: Option<Arc<dyn EtaEstimator>>,
    cache: Option<Arc<EtaCache>>,
    telemetry: Option<Arc<DispatchTelemetry>>,
    config: MatcherConfig,
}

impl MatchingEngine {
    pub fn new(
        geo: Arc<dyn GeoIndex>,
        notifier: Arc<dyn DispatchNotifier>,
        trips: Arc<dyn TripRecorder>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            geo,
            notifier,
            trips,
            estimator: None,
            cache: None,
            telemetry: None,
            config,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn EtaEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_cache(mut self, cache: Arc<EtaCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<DispatchTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn match_ride(
        &self,
        ride_id: &str,
        request: &RideRequest,
    ) -> Result<MatchOffer, MatchError> {
        let candidates = self
            .geo
            .nearby(request.origin, self.config.effective_top_n())
            .await;
        if candidates.is_empty() {
            tracing::info!(ride_id, rider_id = %request.rider_id, "no candidates near pickup");
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_unmatched();
            }
            return Err(MatchError::NoCandidates);
        }

        let scored = join_all(
            candidates
                .into_iter()
                .map(|driver| self.score(driver, request.origin)),
        )
        .await;
        let best = select_best(scored).ok_or(MatchError::NoCandidates)?;
        let offer = best.into_offer();
        tracing::info!(
            ride_id,
            driver_id = %offer.driver_id,
            eta_seconds = offer.eta_seconds,
            cost = offer.cost,
            "ride matched"
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_match();
        }

        let ride = Ride::matched(ride_id, request, &offer.driver_id);
        if let Err(err) = self.trips.save_ride(&ride).await {
            tracing::error!(ride_id, error = %err, "failed to persist matched ride");
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_persistence_failure();
            }
        }

        let delivered = match self.notifier.offer(ride_id, &offer).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(ride_id, driver_id = %offer.driver_id, error = %err, "offer not delivered");
                false
            }
        };
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_offer(delivered);
        }

        Ok(offer)
    }

    async fn score(&self, driver: DriverRecord, pickup: Coordinate) -> ScoredCandidate {
        let eta_seconds = self.eta_seconds(driver.loc, pickup).await;
        ScoredCandidate::new(driver, eta_seconds, self.config.rating_weight)
    }

    /// Cache, then routed estimate (cached on success), then the naive fallback.
    async fn eta_seconds(&self, from: Coordinate, to: Coordinate) -> f64 {
        if let Some(seconds) = self.cache.as_ref().and_then(|cache| cache.get(from, to)) {
            return seconds;
        }

        if let Some(estimator) = &self.estimator {
            match estimator.estimate_seconds(from, to).await {
                Ok(seconds) => {
                    if let Some(cache) = &self.cache {
                        cache.set(from, to, seconds);
                    }
                    return seconds;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "routing failed; using naive estimate");
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_eta_fallback();
                    }
                }
            }
        }

        naive_eta_seconds(from, to, self.config.default_speed_mps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinate;
    use crate::spatial::InMemoryGeoIndex;
    use crate::storage::MemoryTripStore;
    use crate::test_helpers::{driver, FailingEstimator, FixedEstimator, RecordingNotifier};

    struct Fixture {
        geo: Arc<InMemoryGeoIndex>,
        notifier: Arc<RecordingNotifier>,
        trips: Arc<MemoryTripStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                geo: Arc::new(InMemoryGeoIndex::new()),
                notifier: Arc::new(RecordingNotifier::new()),
                trips: Arc::new(MemoryTripStore::new()),
            }
        }

        fn engine(&self, config: MatcherConfig) -> MatchingEngine {
            MatchingEngine::new(
                self.geo.clone(),
                self.notifier.clone(),
                self.trips.clone(),
                config,
            )
        }
    }

    fn request_at(lat: f64, lon: f64) -> RideRequest {
        RideRequest {
            rider_id: "rider-1".into(),
            origin: Coordinate::new(lat, lon),
            destination: Coordinate::new(lat + 0.01, lon + 0.01),
        }
    }

    #[test]
    fn non_positive_top_n_falls_back() {
        assert_eq!(MatcherConfig::default().effective_top_n(), 8);
        assert_eq!(MatcherConfig::default().with_top_n(0).effective_top_n(), 10);
        assert_eq!(MatcherConfig::default().with_top_n(-3).effective_top_n(), 10);
        assert_eq!(MatcherConfig::default().with_top_n(2).effective_top_n(), 2);
    }

    #[tokio::test]
    async fn empty_index_is_no_candidates() {
        let fixture = Fixture::new();
        let telemetry = Arc::new(DispatchTelemetry::new());
        let engine = fixture
            .engine(MatcherConfig::default())
            .with_telemetry(telemetry.clone());

        let err = engine
            .match_ride("ride-1", &request_at(0.0, 0.0))
            .await
            .unwrap_err();
        assert_eq!(err, MatchError::NoCandidates);
        assert!(fixture.trips.is_empty());
        assert!(fixture.notifier.offers().is_empty());
        assert_eq!(telemetry.snapshot().unmatched, 1);
    }

    #[tokio::test]
    async fn offline_drivers_are_never_matched() {
        let fixture = Fixture::new();
        fixture.geo.upsert_record(driver("d1", 0.0, 0.0, 5.0, false));
        let engine = fixture.engine(MatcherConfig::default());

        let result = engine.match_ride("ride-1", &request_at(0.0, 0.0)).await;
        assert_eq!(result, Err(MatchError::NoCandidates));
    }

    #[tokio::test]
    async fn better_rating_beats_slightly_shorter_eta() {
        let fixture = Fixture::new();
        // ~600 m vs ~800 m from the pickup at 10 m/s: 60 s vs 80 s
        let step = 600.0 / 111_194.93;
        fixture.geo.upsert_record(driver("A", 0.0, step, 4.0, true));
        fixture.geo.upsert_record(driver("B", 0.0, step * 80.0 / 60.0, 5.0, true));
        let engine = fixture.engine(MatcherConfig::default());

        let offer = engine
            .match_ride("ride-1", &request_at(0.0, 0.0))
            .await
            .expect("match");
        assert_eq!(offer.driver_id, "B");
        assert!((offer.eta_seconds - 80.0).abs() < 0.1, "{}", offer.eta_seconds);
        assert!((offer.cost - 80.0).abs() < 0.1, "{}", offer.cost);
    }

    #[tokio::test]
    async fn match_persists_ride_and_offers_to_winner() {
        let fixture = Fixture::new();
        fixture.geo.upsert_record(driver("d1", 0.0, 0.0, 4.5, true));
        let engine = fixture.engine(MatcherConfig::default());
        let request = request_at(0.0, 0.0);

        let offer = engine.match_ride("ride-1", &request).await.expect("match");
        let ride = fixture.trips.get("ride-1").expect("persisted");
        assert_eq!(ride.driver_id, "d1");
        assert_eq!(ride.rider_id, "rider-1");
        assert_eq!(ride.origin, request.origin);

        let offers = fixture.notifier.offers();
        assert_eq!(offers, vec![("ride-1".to_string(), offer)]);
    }

    #[tokio::test]
    async fn delivery_and_persistence_failures_do_not_fail_the_match() {
        let geo = Arc::new(InMemoryGeoIndex::new());
        geo.upsert_record(driver("d1", 0.0, 0.0, 4.5, true));
        let telemetry = Arc::new(DispatchTelemetry::new());
        let engine = MatchingEngine::new(
            geo,
            Arc::new(RecordingNotifier::failing()),
            Arc::new(crate::test_helpers::FailingTripStore),
            MatcherConfig::default(),
        )
        .with_telemetry(telemetry.clone());

        let offer = engine
            .match_ride("ride-1", &request_at(0.0, 0.0))
            .await
            .expect("match still succeeds");
        assert_eq!(offer.driver_id, "d1");

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.matches, 1);
        assert_eq!(snapshot.offers_failed, 1);
        assert_eq!(snapshot.persistence_failures, 1);
    }

    #[tokio::test]
    async fn routed_estimates_are_cached_and_reused() {
        let fixture = Fixture::new();
        fixture.geo.upsert_record(driver("d1", 0.0, 0.01, 5.0, true));
        let estimator = Arc::new(FixedEstimator::new(42.0));
        let cache = Arc::new(EtaCache::default());
        let engine = fixture
            .engine(MatcherConfig::default())
            .with_estimator(estimator.clone())
            .with_cache(cache.clone());

        let first = engine.match_ride("ride-1", &request_at(0.0, 0.0)).await.expect("match");
        let second = engine.match_ride("ride-2", &request_at(0.0, 0.0)).await.expect("match");
        assert_eq!(first.eta_seconds, 42.0);
        assert_eq!(second.eta_seconds, 42.0);
        assert_eq!(estimator.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn routing_failure_falls_back_to_naive_without_caching() {
        let fixture = Fixture::new();
        // ~1000 m east of the pickup
        fixture
            .geo
            .upsert_record(driver("d1", 0.0, 1000.0 / 111_194.93, 5.0, true));
        let cache = Arc::new(EtaCache::default());
        let engine = fixture
            .engine(MatcherConfig::default().with_default_speed_mps(10.0))
            .with_estimator(Arc::new(FailingEstimator))
            .with_cache(cache.clone());

        let offer = engine
            .match_ride("ride-1", &request_at(0.0, 0.0))
            .await
            .expect("match");
        assert!((offer.eta_seconds - 100.0).abs() < 0.1, "{}", offer.eta_seconds);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn top_n_limits_candidates() {
        let fixture = Fixture::new();
        // nearest driver has the worst rating; a far 5-star driver would win if considered
        fixture.geo.upsert_record(driver("near", 0.0, 0.0, 1.0, true));
        fixture.geo.upsert_record(driver("far", 0.0, 0.001, 5.0, true));
        let engine = fixture.engine(MatcherConfig::default().with_top_n(1));

        let offer = engine
            .match_ride("ride-1", &request_at(0.0, 0.0))
            .await
            .expect("match");
        assert_eq!(offer.driver_id, "near");
    }
}
