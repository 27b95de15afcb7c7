use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{haversine_m, GeoIndex};
use crate::error::GeoStoreError;
use crate::model::{Coordinate, DriverRecord};

/// Default in-process driver index.
///
/// Queries scan every online driver and pick the `limit` nearest by partial selection
/// (O(n·limit)), which beats a full sort while `limit` stays small relative to the fleet.
#[derive(Debug, Default)]
pub struct InMemoryGeoIndex {
    drivers: RwLock<HashMap<String, DriverRecord>>,
}

impl InMemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, stamping it with the current time.
    pub fn upsert_record(&self, mut driver: DriverRecord) {
        driver.updated = Utc::now();
        let mut drivers = self.drivers.write().unwrap_or_else(PoisonError::into_inner);
        drivers.insert(driver.id.clone(), driver);
    }

    pub fn get(&self, id: &str) -> Option<DriverRecord> {
        let drivers = self.drivers.read().unwrap_or_else(PoisonError::into_inner);
        drivers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn online_count(&self) -> usize {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|d| d.online)
            .count()
    }

    /// Nearest online drivers, ascending by distance. Equal distances order by id.
    pub fn nearest(&self, point: Coordinate, limit: usize) -> Vec<DriverRecord> {
        let drivers = self.drivers.read().unwrap_or_else(PoisonError::into_inner);
        let mut candidates: Vec<(f64, &DriverRecord)> = drivers
            .values()
            .filter(|d| d.online)
            .map(|d| (haversine_m(point, d.loc), d))
            .collect();

        let n = limit.min(candidates.len());
        for i in 0..n {
            let mut min_idx = i;
            for j in (i + 1)..candidates.len() {
                if closer(&candidates[j], &candidates[min_idx]) {
                    min_idx = j;
                }
            }
            candidates.swap(i, min_idx);
        }

        candidates
            .into_iter()
            .take(n)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

fn closer(a: &(f64, &DriverRecord), b: &(f64, &DriverRecord)) -> bool {
    a.0.total_cmp(&b.0)
        .then_with(|| a.1.id.cmp(&b.1.id))
        .is_lt()
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn upsert(&self, driver: DriverRecord) -> Result<(), GeoStoreError> {
        self.upsert_record(driver);
        Ok(())
    }

    async fn nearby(&self, point: Coordinate, limit: usize) -> Vec<DriverRecord> {
        self.nearest(point, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::driver;

    fn seeded_index() -> InMemoryGeoIndex {
        let index = InMemoryGeoIndex::new();
        index.upsert_record(driver("far", 0.0, 0.05, 4.0, true));
        index.upsert_record(driver("near", 0.0, 0.001, 4.0, true));
        index.upsert_record(driver("mid", 0.0, 0.01, 4.0, true));
        index.upsert_record(driver("offline", 0.0, 0.0, 5.0, false));
        index.upsert_record(driver("farthest", 0.0, 0.2, 4.0, true));
        index
    }

    #[test]
    fn nearest_excludes_offline_and_sorts_by_distance() {
        let index = seeded_index();
        let origin = Coordinate::new(0.0, 0.0);
        let ids: Vec<String> = index.nearest(origin, 10).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["near", "mid", "far", "farthest"]);
    }

    #[test]
    fn nearest_respects_limit() {
        let index = seeded_index();
        let result = index.nearest(Coordinate::new(0.0, 0.0), 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "near");
        assert_eq!(result[1].id, "mid");
        assert!(index.nearest(Coordinate::new(0.0, 0.0), 0).is_empty());
    }

    #[test]
    fn upsert_replaces_whole_record_and_restamps() {
        let index = InMemoryGeoIndex::new();
        let mut stale = driver("d1", 0.0, 0.0, 4.0, true);
        stale.updated = Utc::now() - chrono::Duration::hours(1);
        index.upsert_record(stale.clone());
        let stored = index.get("d1").expect("stored");
        assert!(stored.updated > stale.updated);

        index.upsert_record(driver("d1", 1.0, 1.0, 2.5, false));
        let stored = index.get("d1").expect("stored");
        assert_eq!(stored.loc, Coordinate::new(1.0, 1.0));
        assert_eq!(stored.rating, 2.5);
        assert!(!stored.online);
        assert_eq!(index.len(), 1);
        assert_eq!(index.online_count(), 0);
        assert!(index.nearest(Coordinate::new(1.0, 1.0), 5).is_empty());
    }

    #[test]
    fn equal_distances_order_by_id() {
        let index = InMemoryGeoIndex::new();
        index.upsert_record(driver("b", 0.0, 0.0, 4.0, true));
        index.upsert_record(driver("a", 0.0, 0.0, 4.0, true));
        index.upsert_record(driver("c", 0.0, 0.0, 4.0, true));
        let ids: Vec<String> = index
            .nearest(Coordinate::new(0.0, 0.0), 3)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
