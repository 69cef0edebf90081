use std::collections::BTreeSet;

use crate::geo::GeoPoint;
use crate::model::{DriverId, VehicleCategory};

use super::algorithm::{CandidateSource, MatchingAlgorithm};
use super::types::{pick_nearest, MatchCandidate};

/// Exhaustive nearest-driver scan.
///
/// Time complexity: O(n) in the number of eligible drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestDriverMatching;

impl MatchingAlgorithm for NearestDriverMatching {
    fn select_best_driver(
        &self,
        source: &mut dyn CandidateSource,
        origin: GeoPoint,
        category: VehicleCategory,
        excluded: &BTreeSet<DriverId>,
    ) -> Option<MatchCandidate> {
        let drivers = source.eligible(category);
        pick_nearest(origin, &drivers, excluded)
    }
}
