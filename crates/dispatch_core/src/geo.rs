//! Geo math and H3-based driver bucketing.
//!
//! This module provides:
//!
//! - **GeoPoint**: validated decimal-degree coordinates
//! - **Distance calculations**: haversine great-circle distance in km
//! - **GeoIndex**: H3 resolution wrapper, grid disks and ring clearance bounds
//! - **SpatialIndex**: H3 cell → driver entity mappings for cell-search matching
//!
//! Default resolution is 9 (~175m edge), suitable for city-scale dispatch.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use bevy_ecs::prelude::{Entity, Resource};
use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> DispatchResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(DispatchError::validation(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(DispatchError::validation(format!(
                "longitude {lng} outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// H3 cell containing this point at the given resolution.
    pub fn cell(&self, resolution: Resolution) -> Option<CellIndex> {
        LatLng::new(self.lat, self.lng)
            .ok()
            .map(|ll| ll.to_cell(resolution))
    }
}

/// Great-circle distance in kilometers (haversine, unrounded).
///
/// Points are put in a canonical order first so the result is bit-for-bit
/// symmetric.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (a, b) = if (a.lat, a.lng) <= (b.lat, b.lng) {
        (a, b)
    } else {
        (b, a)
    };
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Round to two decimals for anything persisted or surfaced.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Resource)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn from_level(level: u8) -> DispatchResult<Self> {
        Resolution::try_from(level)
            .map(Self::new)
            .map_err(|_| DispatchError::validation(format!("invalid H3 resolution {level}")))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn grid_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        debug_assert_eq!(
            origin.resolution(),
            self.resolution,
            "origin resolution must match GeoIndex resolution"
        );
        origin.grid_disk::<Vec<_>>(k)
    }

    /// Lower bound (km) on the distance between any point of an origin cell
    /// and any point of a cell at grid distance >= `k`.
    ///
    /// Hex centers `k` steps apart are at least `1.5 * k * edge` apart; each
    /// endpoint can sit up to one edge away from its center. Half the average
    /// edge is used to absorb H3 cell-size distortion.
    pub fn ring_clearance_km(&self, k: u32) -> f64 {
        let edge = self.resolution.edge_length_km() * 0.5;
        ((1.5 * k as f64) - 2.0).max(0.0) * edge
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
        }
    }
}

/// Grid disk cache for cell-search matching.
pub struct GridDiskCache {
    geo: GeoIndex,
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    pub fn new(geo: GeoIndex, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            geo,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn geo(&self) -> GeoIndex {
        self.geo
    }

    pub fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            // Poisoned: compute without the cache.
            Err(_) => return self.geo.grid_disk(origin, k),
        };
        cache
            .get_or_insert((origin, k), || self.geo.grid_disk(origin, k))
            .clone()
    }
}

impl std::fmt::Debug for GridDiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridDiskCache")
            .field("resolution", &self.geo.resolution())
            .finish_non_exhaustive()
    }
}

/// Spatial index for driver lookups by H3 cell.
///
/// Maintained by `update_spatial_index_system` from `GridCell` changes; it
/// only knows where drivers are, eligibility is checked by the registry.
#[derive(Debug, Resource, Default)]
pub struct SpatialIndex {
    /// Map from H3 cell to driver entities in that cell
    drivers_by_cell: HashMap<CellIndex, Vec<Entity>>,
    /// Reverse mapping: driver entity → current cell (for efficient updates)
    driver_entity_to_cell: HashMap<Entity, CellIndex>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_driver(&mut self, entity: Entity, cell: CellIndex) {
        self.drivers_by_cell.entry(cell).or_default().push(entity);
        self.driver_entity_to_cell.insert(entity, cell);
    }

    pub fn remove_driver(&mut self, entity: Entity) {
        if let Some(cell) = self.driver_entity_to_cell.remove(&entity) {
            self.detach(entity, cell);
        }
    }

    /// Move a driver between cells (no-op when the cell is unchanged).
    pub fn update_driver_position(&mut self, entity: Entity, new_cell: CellIndex) {
        match self.driver_entity_to_cell.get(&entity).copied() {
            Some(old_cell) if old_cell == new_cell => {}
            Some(old_cell) => {
                self.detach(entity, old_cell);
                self.insert_driver(entity, new_cell);
            }
            None => self.insert_driver(entity, new_cell),
        }
    }

    fn detach(&mut self, entity: Entity, cell: CellIndex) {
        if let Some(entities) = self.drivers_by_cell.get_mut(&cell) {
            entities.retain(|&e| e != entity);
            if entities.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }

    pub fn drivers_in_cells(&self, cells: &[CellIndex]) -> Vec<Entity> {
        let mut result = Vec::new();
        for cell in cells {
            if let Some(entities) = self.drivers_by_cell.get(cell) {
                result.extend(entities.iter().copied());
            }
        }
        result
    }

    pub fn driver_cell(&self, entity: Entity) -> Option<CellIndex> {
        self.driver_entity_to_cell.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.driver_entity_to_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.driver_entity_to_cell.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).expect("valid point")
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let a = point(33.51, 36.29);
        let b = point(33.52, 36.30);
        assert_eq!(distance_km(a, b), distance_km(b, a));
        assert_eq!(distance_km(a, a), 0.0);
        assert!(distance_km(a, b) > 0.0);
    }

    #[test]
    fn damascus_pair_is_about_one_and_a_half_km() {
        let d = round2(distance_km(point(33.51, 36.29), point(33.52, 36.30)));
        assert!((1.40..=1.50).contains(&d), "unexpected distance {d}");
    }

    #[test]
    fn quarter_meridian_matches_radius() {
        let d = distance_km(point(0.0, 0.0), point(90.0, 0.0));
        let expected = std::f64::consts::FRAC_PI_2 * EARTH_RADIUS_KM;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn grid_disk_returns_neighbors_within_k() {
        let geo = GeoIndex::default();
        let origin = point(33.51, 36.29).cell(geo.resolution()).expect("cell");
        let cells = geo.grid_disk(origin, 1);

        assert!(cells.contains(&origin));
        for cell in cells {
            let distance = origin.grid_distance(cell).expect("grid distance");
            assert!(distance <= 1);
        }
    }

    #[test]
    fn ring_clearance_grows_with_k() {
        let geo = GeoIndex::default();
        assert_eq!(geo.ring_clearance_km(1), 0.0);
        assert!(geo.ring_clearance_km(4) < geo.ring_clearance_km(5));
    }

    #[test]
    fn spatial_index_moves_driver_between_cells() {
        let geo = GeoIndex::default();
        let a = point(33.51, 36.29).cell(geo.resolution()).expect("cell");
        let b = point(33.60, 36.40).cell(geo.resolution()).expect("cell");
        let entity = Entity::from_raw(7);

        let mut index = SpatialIndex::new();
        index.update_driver_position(entity, a);
        assert_eq!(index.drivers_in_cells(&[a]), vec![entity]);

        index.update_driver_position(entity, b);
        assert!(index.drivers_in_cells(&[a]).is_empty());
        assert_eq!(index.driver_cell(entity), Some(b));

        index.remove_driver(entity);
        assert!(index.is_empty());
    }
}
