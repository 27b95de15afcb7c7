use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoIndex;
use crate::error::GeoStoreError;
use crate::model::{Coordinate, DriverRecord};

/// Radius used by [`StoreGeoIndex`] nearest-driver queries.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 5_000.0;

/// Per-driver metadata kept beside the spatial point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverMeta {
    pub rating: f64,
    pub online: bool,
    pub updated: DateTime<Utc>,
}

/// One radius-query result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub id: String,
    pub loc: Coordinate,
    pub distance_m: f64,
}

/// Contract of an external geospatial store: points plus a side key-value lookup.
#[async_trait]
pub trait GeoStore: Send + Sync {
    async fn add_point(&self, id: &str, loc: Coordinate) -> Result<(), GeoStoreError>;

    /// Up to `limit` points within `radius_m` of `center`, ascending by distance.
    async fn radius_query(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<GeoHit>, GeoStoreError>;

    async fn put_meta(&self, id: &str, meta: &DriverMeta) -> Result<(), GeoStoreError>;

    async fn fetch_meta(&self, id: &str) -> Result<Option<DriverMeta>, GeoStoreError>;
}

/// Driver index backed by a [`GeoStore`].
///
/// Fails open: a radius-query error yields an empty candidate list, which callers
/// already treat as "no candidates". Offline drivers and drivers whose metadata
/// cannot be read are skipped; the query window grows past them.
pub struct StoreGeoIndex {
    store: Arc<dyn GeoStore>,
    radius_m: f64,
}

impl StoreGeoIndex {
    pub fn new(store: Arc<dyn GeoStore>) -> Self {
        Self {
            store,
            radius_m: DEFAULT_SEARCH_RADIUS_M,
        }
    }

    pub fn with_radius_m(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    /// Spatial half of an update.
    pub async fn write_position(&self, driver: &DriverRecord) -> Result<(), GeoStoreError> {
        self.store.add_point(&driver.id, driver.loc).await
    }

    /// Metadata half of an update, stamped with now.
    pub async fn write_metadata(&self, driver: &DriverRecord) -> Result<(), GeoStoreError> {
        let meta = DriverMeta {
            rating: driver.rating,
            online: driver.online,
            updated: Utc::now(),
        };
        self.store.put_meta(&driver.id, &meta).await
    }

    async fn online_driver(&self, hit: GeoHit) -> Option<DriverRecord> {
        let meta = match self.store.fetch_meta(&hit.id).await {
            Ok(Some(meta)) => meta,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(driver_id = %hit.id, error = %err, "metadata fetch failed");
                return None;
            }
        };
        meta.online.then(|| DriverRecord {
            id: hit.id,
            loc: hit.loc,
            rating: meta.rating,
            online: meta.online,
            updated: meta.updated,
        })
    }
}

#[async_trait]
impl GeoIndex for StoreGeoIndex {
    async fn upsert(&self, driver: DriverRecord) -> Result<(), GeoStoreError> {
        self.write_position(&driver).await?;
        self.write_metadata(&driver).await
    }

    async fn nearby(&self, point: Coordinate, limit: usize) -> Vec<DriverRecord> {
        let mut drivers = Vec::with_capacity(limit);
        let mut seen = 0;
        let mut fetch = limit;

        // Offline drivers occupy query slots, so widen the window until `limit`
        // online drivers are found or the radius holds no more points.
        while drivers.len() < limit {
            let hits = match self.store.radius_query(point, self.radius_m, fetch).await {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(error = %err, "geo store query failed; returning no candidates");
                    return Vec::new();
                }
            };
            let exhausted = hits.len() < fetch;

            for hit in hits.into_iter().skip(seen) {
                seen += 1;
                if let Some(driver) = self.online_driver(hit).await {
                    drivers.push(driver);
                    if drivers.len() == limit {
                        break;
                    }
                }
            }

            if exhausted {
                break;
            }
            fetch = fetch.saturating_mul(2);
        }
        drivers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::H3CellStore;
    use crate::test_helpers::{driver, UnavailableGeoStore};

    #[tokio::test]
    async fn nearby_fails_open_on_store_error() {
        let index = StoreGeoIndex::new(Arc::new(UnavailableGeoStore));
        let result = index.nearby(Coordinate::new(0.0, 0.0), 5).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn upsert_surfaces_store_error() {
        let index = StoreGeoIndex::new(Arc::new(UnavailableGeoStore));
        let err = index
            .upsert(driver("d1", 0.0, 0.0, 4.0, true))
            .await
            .expect_err("store is down");
        assert!(matches!(err, GeoStoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn nearby_joins_metadata_and_drops_offline() {
        let index = StoreGeoIndex::new(Arc::new(H3CellStore::new()));
        index
            .upsert(driver("on", 52.5200, 13.4050, 4.8, true))
            .await
            .expect("upsert");
        index
            .upsert(driver("off", 52.5201, 13.4051, 5.0, false))
            .await
            .expect("upsert");

        let result = index.nearby(Coordinate::new(52.5200, 13.4050), 5).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "on");
        assert_eq!(result[0].rating, 4.8);
        assert!(result[0].online);
    }

    #[tokio::test]
    async fn point_without_metadata_is_skipped() {
        let store = Arc::new(H3CellStore::new());
        store
            .add_point("ghost", Coordinate::new(52.52, 13.405))
            .await
            .expect("add");
        let index = StoreGeoIndex::new(store);
        assert!(index.nearby(Coordinate::new(52.52, 13.405), 5).await.is_empty());
    }

    #[tokio::test]
    async fn offline_drivers_do_not_hide_an_online_driver() {
        let index = StoreGeoIndex::new(Arc::new(H3CellStore::new()));
        let pickup = Coordinate::new(52.5200, 13.4050);
        for i in 0..8 {
            let id = format!("off-{i}");
            let lat = 52.5200 + 0.00001 * i as f64;
            index
                .upsert(driver(&id, lat, 13.4050, 5.0, false))
                .await
                .expect("upsert");
        }
        // roughly 1 km north of the pickup
        index
            .upsert(driver("on", 52.5290, 13.4050, 4.2, true))
            .await
            .expect("upsert");

        let result = index.nearby(pickup, 8).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "on");
    }

    #[tokio::test]
    async fn nearby_stops_at_limit_online_drivers() {
        let index = StoreGeoIndex::new(Arc::new(H3CellStore::new()));
        for i in 0..6 {
            let online = i % 2 == 1;
            let id = format!("d{i}");
            let lat = 52.5200 + 0.001 * i as f64;
            index
                .upsert(driver(&id, lat, 13.4050, 4.0, online))
                .await
                .expect("upsert");
        }

        let result = index.nearby(Coordinate::new(52.5200, 13.4050), 2).await;
        let ids: Vec<&str> = result.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d3"]);
    }
}
