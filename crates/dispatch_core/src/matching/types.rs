use std::collections::BTreeSet;

use crate::geo::{distance_km, GeoPoint};
use crate::model::DriverId;

/// Driver that passed the registry's eligibility filter, with its last fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EligibleDriver {
    pub driver_id: DriverId,
    pub position: GeoPoint,
}

/// Scored candidate for one matching attempt. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub driver_id: DriverId,
    /// Unrounded great-circle distance to the pickup point.
    pub pickup_distance_km: f64,
}

/// Nearest non-excluded driver; equal distances go to the lowest driver id.
pub fn pick_nearest(
    origin: GeoPoint,
    drivers: &[EligibleDriver],
    excluded: &BTreeSet<DriverId>,
) -> Option<MatchCandidate> {
    drivers
        .iter()
        .filter(|driver| !excluded.contains(&driver.driver_id))
        .map(|driver| MatchCandidate {
            driver_id: driver.driver_id,
            pickup_distance_km: distance_km(origin, driver.position),
        })
        .min_by(|a, b| {
            a.pickup_distance_km
                .total_cmp(&b.pickup_distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(id: u128, lat: f64, lng: f64) -> EligibleDriver {
        EligibleDriver {
            driver_id: DriverId::from_u128(id),
            position: GeoPoint::new(lat, lng).expect("point"),
        }
    }

    #[test]
    fn equal_distances_break_to_lowest_id() {
        let origin = GeoPoint::new(33.51, 36.29).expect("point");
        // Same spot, listed highest id first.
        let drivers = vec![
            driver(30, 33.52, 36.30),
            driver(10, 33.52, 36.30),
            driver(20, 33.52, 36.30),
        ];
        let picked = pick_nearest(origin, &drivers, &BTreeSet::new()).expect("candidate");
        assert_eq!(picked.driver_id, DriverId::from_u128(10));
    }

    #[test]
    fn excluded_drivers_are_skipped() {
        let origin = GeoPoint::new(33.51, 36.29).expect("point");
        let drivers = vec![driver(1, 33.511, 36.291), driver(2, 33.60, 36.40)];
        let excluded = BTreeSet::from([DriverId::from_u128(1)]);
        let picked = pick_nearest(origin, &drivers, &excluded).expect("candidate");
        assert_eq!(picked.driver_id, DriverId::from_u128(2));

        let all = BTreeSet::from([DriverId::from_u128(1), DriverId::from_u128(2)]);
        assert!(pick_nearest(origin, &drivers, &all).is_none());
    }
}
