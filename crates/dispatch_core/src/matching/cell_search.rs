use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use h3o::CellIndex;

use crate::geo::{GeoIndex, GeoPoint, GridDiskCache};
use crate::model::{DriverId, VehicleCategory};

use super::algorithm::{CandidateSource, MatchingAlgorithm};
use super::types::{pick_nearest, MatchCandidate};

const DISK_CACHE_CAPACITY: usize = 1_024;

/// Ring-by-ring H3 search around the pickup cell.
///
/// Expands grid disks until the best candidate found so far is provably closer
/// than anything outside the searched disk, so the pick always equals the
/// exhaustive scan. Falls back to the exhaustive scan after `max_rings`.
#[derive(Debug)]
pub struct CellSearchMatching {
    disks: GridDiskCache,
    max_rings: u32,
}

impl CellSearchMatching {
    pub fn new(geo: GeoIndex, max_rings: u32) -> Self {
        Self {
            disks: GridDiskCache::new(geo, DISK_CACHE_CAPACITY),
            max_rings,
        }
    }
}

fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    a.pickup_distance_km
        .total_cmp(&b.pickup_distance_km)
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}

impl MatchingAlgorithm for CellSearchMatching {
    fn select_best_driver(
        &self,
        source: &mut dyn CandidateSource,
        origin: GeoPoint,
        category: VehicleCategory,
        excluded: &BTreeSet<DriverId>,
    ) -> Option<MatchCandidate> {
        let geo = self.disks.geo();
        if let Some(origin_cell) = origin.cell(geo.resolution()) {
            let mut searched: HashSet<CellIndex> = HashSet::new();
            let mut best: Option<MatchCandidate> = None;

            for k in 0..=self.max_rings {
                let ring: Vec<CellIndex> = self
                    .disks
                    .get_or_compute(origin_cell, k)
                    .into_iter()
                    .filter(|cell| searched.insert(*cell))
                    .collect();
                let found = source.eligible_in_cells(category, &ring);
                if let Some(candidate) = pick_nearest(origin, &found, excluded) {
                    best = match best {
                        Some(current) if rank(&current, &candidate).is_le() => Some(current),
                        _ => Some(candidate),
                    };
                }
                if let Some(current) = best {
                    if geo.ring_clearance_km(k + 1) > current.pickup_distance_km {
                        return best;
                    }
                }
            }
        }

        let drivers = source.eligible(category);
        pick_nearest(origin, &drivers, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::nearest::NearestDriverMatching;
    use crate::matching::types::EligibleDriver;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Slice-backed source that indexes drivers by cell like the registry does.
    struct SliceSource {
        geo: GeoIndex,
        drivers: Vec<EligibleDriver>,
        cell_lookups: usize,
        full_scans: usize,
    }

    impl SliceSource {
        fn new(geo: GeoIndex, drivers: Vec<EligibleDriver>) -> Self {
            Self {
                geo,
                drivers,
                cell_lookups: 0,
                full_scans: 0,
            }
        }
    }

    impl CandidateSource for SliceSource {
        fn eligible(&mut self, _category: VehicleCategory) -> Vec<EligibleDriver> {
            self.full_scans += 1;
            self.drivers.clone()
        }

        fn eligible_in_cells(
            &mut self,
            _category: VehicleCategory,
            cells: &[CellIndex],
        ) -> Vec<EligibleDriver> {
            self.cell_lookups += 1;
            self.drivers
                .iter()
                .filter(|driver| {
                    driver
                        .position
                        .cell(self.geo.resolution())
                        .is_some_and(|cell| cells.contains(&cell))
                })
                .copied()
                .collect()
        }
    }

    fn scatter(rng: &mut StdRng, count: usize, spread_deg: f64) -> Vec<EligibleDriver> {
        (0..count)
            .map(|i| EligibleDriver {
                driver_id: DriverId::from_u128(i as u128 + 1),
                position: GeoPoint::new(
                    33.51 + rng.gen_range(-spread_deg..spread_deg),
                    36.29 + rng.gen_range(-spread_deg..spread_deg),
                )
                .expect("point"),
            })
            .collect()
    }

    #[test]
    fn agrees_with_exhaustive_scan() {
        let geo = GeoIndex::default();
        let cell_search = CellSearchMatching::new(geo, 16);
        let mut rng = StdRng::seed_from_u64(42);

        for round in 0..50 {
            let drivers = scatter(&mut rng, 40, 0.05);
            let origin = GeoPoint::new(
                33.51 + rng.gen_range(-0.03..0.03),
                36.29 + rng.gen_range(-0.03..0.03),
            )
            .expect("point");
            let excluded: BTreeSet<DriverId> = drivers
                .iter()
                .take(round % 5)
                .map(|driver| driver.driver_id)
                .collect();

            let mut source = SliceSource::new(geo, drivers.clone());
            let fast = cell_search.select_best_driver(
                &mut source,
                origin,
                VehicleCategory::Taxi,
                &excluded,
            );
            let mut source = SliceSource::new(geo, drivers);
            let slow = NearestDriverMatching.select_best_driver(
                &mut source,
                origin,
                VehicleCategory::Taxi,
                &excluded,
            );

            assert_eq!(
                fast.map(|c| c.driver_id),
                slow.map(|c| c.driver_id),
                "round {round} disagrees"
            );
        }
    }

    #[test]
    fn nearby_driver_found_without_full_scan() {
        let geo = GeoIndex::default();
        let cell_search = CellSearchMatching::new(geo, 16);
        let origin = GeoPoint::new(33.51, 36.29).expect("point");
        let drivers = vec![
            EligibleDriver {
                driver_id: DriverId::from_u128(1),
                position: GeoPoint::new(33.5101, 36.2901).expect("point"),
            },
            EligibleDriver {
                driver_id: DriverId::from_u128(2),
                position: GeoPoint::new(34.5, 37.0).expect("point"),
            },
        ];
        let mut source = SliceSource::new(geo, drivers);
        let picked = cell_search
            .select_best_driver(&mut source, origin, VehicleCategory::Taxi, &BTreeSet::new())
            .expect("candidate");

        assert_eq!(picked.driver_id, DriverId::from_u128(1));
        assert_eq!(source.full_scans, 0);
        assert!(source.cell_lookups > 0);
    }

    #[test]
    fn falls_back_to_full_scan_for_distant_drivers() {
        let geo = GeoIndex::default();
        let cell_search = CellSearchMatching::new(geo, 2);
        let origin = GeoPoint::new(33.51, 36.29).expect("point");
        let far = EligibleDriver {
            driver_id: DriverId::from_u128(5),
            position: GeoPoint::new(34.0, 36.9).expect("point"),
        };
        let mut source = SliceSource::new(geo, vec![far]);
        let picked = cell_search.select_best_driver(
            &mut source,
            origin,
            VehicleCategory::Taxi,
            &BTreeSet::new(),
        );

        assert_eq!(picked.map(|c| c.driver_id), Some(DriverId::from_u128(5)));
        assert_eq!(source.full_scans, 1);
    }
}
