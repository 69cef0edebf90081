use std::collections::BTreeSet;

use h3o::CellIndex;

use crate::geo::GeoPoint;
use crate::model::{DriverId, VehicleCategory};

use super::types::{EligibleDriver, MatchCandidate};

/// Where matching algorithms read eligible drivers from.
///
/// Implemented by the driver registry over the ECS world; tests can implement
/// it over a plain slice.
pub trait CandidateSource {
    /// Every eligible driver of `category`.
    fn eligible(&mut self, category: VehicleCategory) -> Vec<EligibleDriver>;

    /// Eligible drivers of `category` whose indexed cell is one of `cells`.
    fn eligible_in_cells(
        &mut self,
        category: VehicleCategory,
        cells: &[CellIndex],
    ) -> Vec<EligibleDriver>;
}

/// Trait for strategies that pick the driver to offer a request to.
///
/// Implementations are pure with respect to the source: they read candidates
/// and return a pick, never mutate. All strategies must return the same driver
/// the exhaustive scan would (nearest by unrounded distance, ties to the
/// lowest driver id); they differ only in how many candidates they look at.
pub trait MatchingAlgorithm: Send + Sync {
    /// Select the best driver for a pickup at `origin`.
    ///
    /// # Arguments
    ///
    /// * `source` - Registry view supplying eligible drivers
    /// * `origin` - Pickup point of the request
    /// * `category` - Vehicle category the request requires
    /// * `excluded` - Drivers that already rejected or let this request expire
    ///
    /// # Returns
    ///
    /// `None` when no eligible driver remains after exclusion.
    fn select_best_driver(
        &self,
        source: &mut dyn CandidateSource,
        origin: GeoPoint,
        category: VehicleCategory,
        excluded: &BTreeSet<DriverId>,
    ) -> Option<MatchCandidate>;
}
