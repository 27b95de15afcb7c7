//! Location ingestion: decode raw location events and apply them to the driver index.
//!
//! Each event is handled to completion before the next one is read. Undecodable or
//! out-of-range events are counted and dropped. Valid events are written with a
//! [`RetryPolicy`]; every attempt performs both the position and the metadata write,
//! and an event whose attempts run out is logged, counted and abandoned.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::error::{GeoStoreError, IngestError};
use crate::model::{DriverRecord, LocationEvent};
use crate::retry::RetryPolicy;
use crate::spatial::{InMemoryGeoIndex, StoreGeoIndex};

/// Destination of location updates, split into its two writes.
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn write_position(&self, driver: &DriverRecord) -> Result<(), GeoStoreError>;
    async fn write_metadata(&self, driver: &DriverRecord) -> Result<(), GeoStoreError>;
}

#[async_trait]
impl LocationSink for InMemoryGeoIndex {
    // The in-memory record holds position and metadata together.
    async fn write_position(&self, driver: &DriverRecord) -> Result<(), GeoStoreError> {
        self.upsert_record(driver.clone());
        Ok(())
    }

    async fn write_metadata(&self, _driver: &DriverRecord) -> Result<(), GeoStoreError> {
        Ok(())
    }
}

#[async_trait]
impl LocationSink for StoreGeoIndex {
    async fn write_position(&self, driver: &DriverRecord) -> Result<(), GeoStoreError> {
        StoreGeoIndex::write_position(self, driver).await
    }

    async fn write_metadata(&self, driver: &DriverRecord) -> Result<(), GeoStoreError> {
        StoreGeoIndex::write_metadata(self, driver).await
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    consumed: AtomicU64,
    invalid: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub consumed: u64,
    pub invalid: u64,
    pub updated: u64,
    pub failed: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decode and validate one raw event.
pub fn decode_event(payload: &[u8]) -> Result<DriverRecord, IngestError> {
    let event: LocationEvent = serde_json::from_slice(payload)?;
    Ok(event.into_record()?)
}

/// Write `driver` to `sink`, retrying both writes together under `policy`.
pub async fn apply_with_retry(
    sink: &dyn LocationSink,
    driver: &DriverRecord,
    policy: &RetryPolicy,
) -> Result<(), IngestError> {
    policy
        .run(|_| async move {
            sink.write_position(driver).await?;
            sink.write_metadata(driver).await?;
            Ok::<(), GeoStoreError>(())
        })
        .await?;
    Ok(())
}

pub struct LocationIngestor {
    sink: Arc<dyn LocationSink>,
    policy: RetryPolicy,
    stats: Arc<IngestStats>,
}

impl LocationIngestor {
    pub fn new(sink: Arc<dyn LocationSink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Share counters with another owner, e.g. a stats endpoint.
    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Process one raw event, updating the counters.
    pub async fn handle(&self, payload: &[u8]) -> Result<(), IngestError> {
        IngestStats::bump(&self.stats.consumed);

        let driver = match decode_event(payload) {
            Ok(driver) => driver,
            Err(err) => {
                IngestStats::bump(&self.stats.invalid);
                tracing::warn!(error = %err, "dropping invalid location event");
                return Err(err);
            }
        };

        match apply_with_retry(self.sink.as_ref(), &driver, &self.policy).await {
            Ok(()) => {
                IngestStats::bump(&self.stats.updated);
                tracing::trace!(driver_id = %driver.id, "location applied");
                Ok(())
            }
            Err(err) => {
                IngestStats::bump(&self.stats.failed);
                tracing::error!(driver_id = %driver.id, error = %err, "location update abandoned");
                Err(err)
            }
        }
    }

    /// Consume until the stream ends.
    pub async fn run<S, B>(&self, events: S)
    where
        S: Stream<Item = B> + Send,
        B: AsRef<[u8]> + Send,
    {
        self.run_until(events, std::future::pending::<()>()).await;
    }

    /// Consume until the stream ends or `shutdown` resolves. An event already being
    /// handled finishes first.
    pub async fn run_until<S, B, F>(&self, events: S, shutdown: F)
    where
        S: Stream<Item = B> + Send,
        B: AsRef<[u8]> + Send,
        F: Future<Output = ()> + Send,
    {
        futures_util::pin_mut!(events);
        futures_util::pin_mut!(shutdown);
        loop {
            let payload = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("location ingestor shutting down");
                    break;
                }
                next = events.next() => match next {
                    Some(payload) => payload,
                    None => {
                        tracing::info!("location stream ended");
                        break;
                    }
                },
            };
            // outcome is already counted and logged
            let _ = self.handle(payload.as_ref()).await;
        }
    }
}
