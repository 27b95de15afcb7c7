use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use h3o::{CellIndex, LatLng, Resolution};

use super::store::{DriverMeta, GeoHit, GeoStore};
use super::haversine_m;
use crate::error::GeoStoreError;
use crate::model::Coordinate;

/// Largest grid disk walked before a radius query falls back to a full scan.
const MAX_GRID_DISK_K: u32 = 64;

/// In-process [`GeoStore`] that buckets points by H3 cell.
///
/// Radius queries collect the grid disk around the centre cell that is guaranteed to
/// cover the radius, then rank the exact haversine distances. Default resolution is 9
/// (~174 m edge), suitable for city-scale fleets.
#[derive(Debug)]
pub struct H3CellStore {
    resolution: Resolution,
    state: RwLock<CellState>,
}

#[derive(Debug, Default)]
struct CellState {
    /// H3 cell → ids of points in that cell
    ids_by_cell: HashMap<CellIndex, Vec<String>>,
    /// Reverse mapping: id → (position, cell) for efficient moves
    points: HashMap<String, (Coordinate, CellIndex)>,
    meta: HashMap<String, DriverMeta>,
}

impl CellState {
    fn insert_point(&mut self, id: &str, loc: Coordinate, cell: CellIndex) {
        if let Some((_, old_cell)) = self.points.get(id).copied() {
            if old_cell != cell {
                self.remove_from_cell(id, old_cell);
                self.ids_by_cell.entry(cell).or_default().push(id.to_string());
            }
        } else {
            self.ids_by_cell.entry(cell).or_default().push(id.to_string());
        }
        self.points.insert(id.to_string(), (loc, cell));
    }

    fn remove_from_cell(&mut self, id: &str, cell: CellIndex) {
        if let Some(ids) = self.ids_by_cell.get_mut(&cell) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.ids_by_cell.remove(&cell);
            }
        }
    }
}

impl H3CellStore {
    pub fn new() -> Self {
        Self::with_resolution(Resolution::Nine)
    }

    pub fn with_resolution(resolution: Resolution) -> Self {
        Self {
            resolution,
            state: RwLock::new(CellState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, loc: Coordinate) -> Result<CellIndex, GeoStoreError> {
        loc.validate()
            .ok()
            .and_then(|_| LatLng::new(loc.lat, loc.lon).ok())
            .map(|ll| ll.to_cell(self.resolution))
            .ok_or(GeoStoreError::InvalidCoordinate {
                lat: loc.lat,
                lon: loc.lon,
            })
    }

    /// Grid distance whose disk covers every point within `radius_m` of the centre
    /// cell. Hex centres `k` steps apart are at least `1.5 · edge · k` metres apart;
    /// dividing by one edge instead leaves room for H3 cell-size distortion.
    fn rings_for_radius(&self, radius_m: f64) -> Option<u32> {
        let edge_m = self.resolution.edge_length_m();
        let k = ((radius_m + edge_m) / edge_m).ceil() + 1.0;
        (k.is_finite() && k <= f64::from(MAX_GRID_DISK_K)).then(|| k.max(0.0) as u32)
    }
}

impl Default for H3CellStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoStore for H3CellStore {
    async fn add_point(&self, id: &str, loc: Coordinate) -> Result<(), GeoStoreError> {
        let cell = self.cell_for(loc)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.insert_point(id, loc, cell);
        Ok(())
    }

    async fn radius_query(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<GeoHit>, GeoStoreError> {
        let origin = self.cell_for(center)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let candidate_ids: Vec<&String> = match self.rings_for_radius(radius_m) {
            Some(k) => origin
                .grid_disk::<Vec<_>>(k)
                .iter()
                .filter_map(|cell| state.ids_by_cell.get(cell))
                .flatten()
                .collect(),
            None => state.points.keys().collect(),
        };

        let mut hits: Vec<GeoHit> = candidate_ids
            .into_iter()
            .filter_map(|id| {
                let (loc, _) = state.points.get(id)?;
                let distance_m = haversine_m(center, *loc);
                (distance_m <= radius_m).then(|| GeoHit {
                    id: id.clone(),
                    loc: *loc,
                    distance_m,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn put_meta(&self, id: &str, meta: &DriverMeta) -> Result<(), GeoStoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.meta.insert(id.to_string(), meta.clone());
        Ok(())
    }

    async fn fetch_meta(&self, id: &str) -> Result<Option<DriverMeta>, GeoStoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.meta.get(id).cloned())
    }
}
