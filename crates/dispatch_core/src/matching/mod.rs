pub mod algorithm;
pub mod types;
pub mod nearest;
pub mod cell_search;

use bevy_ecs::prelude::Resource;

use crate::config::{MatchingAlgorithmType, MatchingConfig};
use crate::error::DispatchResult;
use crate::geo::GeoIndex;

pub use algorithm::{CandidateSource, MatchingAlgorithm};
pub use types::{pick_nearest, EligibleDriver, MatchCandidate};
pub use nearest::NearestDriverMatching;
pub use cell_search::CellSearchMatching;

/// Resource wrapper for the matching algorithm trait object.
#[derive(Resource)]
pub struct MatchingAlgorithmResource(pub Box<dyn MatchingAlgorithm>);

impl MatchingAlgorithmResource {
    pub fn new(algorithm: Box<dyn MatchingAlgorithm>) -> Self {
        Self(algorithm)
    }
}

impl std::ops::Deref for MatchingAlgorithmResource {
    type Target = dyn MatchingAlgorithm;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Build the configured matching strategy.
pub fn build_matching_algorithm(
    config: &MatchingConfig,
) -> DispatchResult<Box<dyn MatchingAlgorithm>> {
    Ok(match config.algorithm {
        MatchingAlgorithmType::Nearest => Box::new(NearestDriverMatching),
        MatchingAlgorithmType::CellSearch => Box::new(CellSearchMatching::new(
            GeoIndex::from_level(config.resolution)?,
            config.max_rings,
        )),
    })
}
