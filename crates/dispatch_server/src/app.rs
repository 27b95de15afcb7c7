//! Service wiring: builds the core components from [`ServiceConfig`] and the HTTP router
//! that exposes them.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dispatch_core::dispatch::{
    ChannelRegistry, DispatchNotifier, HttpPushNotifier, SessionFirstNotifier,
};
use dispatch_core::eta::{EtaCache, OsrmEstimator};
use dispatch_core::ingest::{IngestStats, LocationIngestor, LocationSink};
use dispatch_core::matching::MatchingEngine;
use dispatch_core::spatial::{GeoIndex, H3CellStore, InMemoryGeoIndex, StoreGeoIndex};
use dispatch_core::storage::MemoryTripStore;
use dispatch_core::telemetry::DispatchTelemetry;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{GeoBackend, ServiceConfig};
use crate::{handlers, ws};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to build HTTP client for {backend}: {source}")]
    HttpClient {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestShutdownError {
    #[error("location ingestion did not drain within {0:?}")]
    TimedOut(Duration),
    #[error("location ingestion task failed: {0}")]
    Task(#[from] JoinError),
}

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine>,
    pub registry: Arc<ChannelRegistry>,
    pub locations: mpsc::Sender<Vec<u8>>,
    pub ingest_stats: Arc<IngestStats>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub cache: Option<Arc<EtaCache>>,
}

/// Everything a running process needs: handler state plus the ingestion side of the
/// location topic.
pub struct Dispatcher {
    pub state: AppState,
    pub ingestor: LocationIngestor,
    pub locations: mpsc::Receiver<Vec<u8>>,
}

impl Dispatcher {
    pub fn build(config: &ServiceConfig) -> Result<Self, BuildError> {
        let (geo, sink) = match config.geo_backend {
            GeoBackend::Memory => split_index(Arc::new(InMemoryGeoIndex::new())),
            GeoBackend::H3 => split_index(Arc::new(
                StoreGeoIndex::new(Arc::new(H3CellStore::new()))
                    .with_radius_m(config.geo_search_radius_m),
            )),
        };

        let registry = Arc::new(ChannelRegistry::new());
        let notifier: Arc<dyn DispatchNotifier> = match &config.push_endpoint {
            Some(endpoint) => {
                let push = HttpPushNotifier::new(endpoint.as_str()).map_err(|err| {
                    BuildError::HttpClient {
                        backend: "push",
                        source: err,
                    }
                })?;
                Arc::new(SessionFirstNotifier::new(registry.clone(), Arc::new(push)))
            }
            None => registry.clone(),
        };

        let telemetry = Arc::new(DispatchTelemetry::new());
        let cache = config.eta_cache.map(|cache| Arc::new(EtaCache::new(cache)));
        let mut engine = MatchingEngine::new(
            geo,
            notifier,
            Arc::new(MemoryTripStore::new()),
            config.matcher,
        )
        .with_telemetry(telemetry.clone());
        if let Some(cache) = &cache {
            engine = engine.with_cache(cache.clone());
        }
        if let Some(endpoint) = &config.osrm_endpoint {
            let estimator = OsrmEstimator::new(endpoint).map_err(|err| BuildError::HttpClient {
                backend: "osrm",
                source: err,
            })?;
            engine = engine.with_estimator(Arc::new(estimator));
        }

        let ingest_stats = Arc::new(IngestStats::new());
        let ingestor = LocationIngestor::new(sink, config.ingest_retry).with_stats(ingest_stats.clone());
        let (tx, rx) = mpsc::channel(config.ingest_queue_capacity.max(1));

        tracing::info!(
            geo_backend = ?config.geo_backend,
            routed_eta = config.osrm_endpoint.is_some(),
            push_dispatch = config.push_endpoint.is_some(),
            eta_cache = cache.is_some(),
            "dispatch services built"
        );

        Ok(Self {
            state: AppState {
                engine: Arc::new(engine),
                registry,
                locations: tx,
                ingest_stats,
                telemetry,
                cache,
            },
            ingestor,
            locations: rx,
        })
    }
}

/// Location ingestion running in the background, fed by the HTTP intake queue.
pub struct IngestTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl IngestTask {
    pub fn spawn(ingestor: LocationIngestor, locations: mpsc::Receiver<Vec<u8>>) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut events = ReceiverStream::new(locations);
            ingestor
                .run_until(&mut events, async {
                    let _ = stopped.await;
                })
                .await;
            // Live sockets still hold senders; close the queue and drain what it holds.
            events.close();
            ingestor.run(events).await;
        });
        Self { stop, handle }
    }

    /// Stop accepting events, process the ones already queued and wait at most
    /// `timeout` for that to finish.
    pub async fn finish(self, timeout: Duration) -> Result<(), IngestShutdownError> {
        let _ = self.stop.send(());
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(joined) => Ok(joined?),
            Err(_) => Err(IngestShutdownError::TimedOut(timeout)),
        }
    }
}

/// The matcher reads and the ingestor writes the same index.
fn split_index<I>(index: Arc<I>) -> (Arc<dyn GeoIndex>, Arc<dyn LocationSink>)
where
    I: GeoIndex + LocationSink + 'static,
{
    (index.clone(), index)
}

/// Random 16-hex-character request ids for requests that arrive without one.
#[derive(Clone, Copy, Default)]
struct RandomRequestId;

impl MakeRequestId for RandomRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = format!("{:016x}", rand::random::<u64>());
        id.parse().ok().map(RequestId::new)
    }
}

/// Logged 500 instead of a dropped connection.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

/// Request id, tracing and panic recovery around any set of routes.
pub fn with_middleware<S>(routes: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), RandomRequestId))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(CatchPanicLayer::custom(handle_panic));

    routes.layer(middleware)
}

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/internal/driver/locations", post(handlers::post_location))
        .route("/api/v1/rides/request", post(handlers::request_ride))
        .route("/ws/{driver_id}", get(ws::driver_socket))
        .route("/healthz", get(handlers::healthz))
        .route("/stats", get(handlers::stats));
    with_middleware(routes).with_state(state)
}
