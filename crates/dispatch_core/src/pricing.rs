//! Fare calculation for ride and delivery requests.
//!
//! Formula: `fare = max(base_fare, distance_km * per_km_rate)`. Delivery adds the
//! product amount on top when the driver pays for the product.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::geo::round2;
use crate::model::VehicleCategory;

/// Default base fare in currency units.
pub const DEFAULT_BASE_FARE: f64 = 10_000.0;

/// Default per-kilometer rate in currency units.
pub const DEFAULT_PER_KM_RATE: f64 = 5_000.0;

/// Tunable rates for one request kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarePolicy {
    pub base_fare: f64,
    pub per_km_rate: f64,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            base_fare: DEFAULT_BASE_FARE,
            per_km_rate: DEFAULT_PER_KM_RATE,
        }
    }
}

impl FarePolicy {
    /// Distance fare, never below the base fare.
    pub fn fare(&self, distance_km: f64) -> f64 {
        round2((distance_km.max(0.0) * self.per_km_rate).max(self.base_fare))
    }
}

/// Ride and delivery policies; rates differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct PricingConfig {
    pub ride: FarePolicy,
    pub delivery: FarePolicy,
}

impl PricingConfig {
    pub fn policy(&self, category: VehicleCategory) -> &FarePolicy {
        match category {
            VehicleCategory::Taxi => &self.ride,
            VehicleCategory::Delivery => &self.delivery,
        }
    }

    pub fn price(
        &self,
        distance_km: f64,
        category: VehicleCategory,
        extras: ExtraOptions,
    ) -> Quote {
        quote(distance_km, self.policy(category), extras)
    }
}

/// Optional charges on top of the distance fare.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExtraOptions {
    /// Driver pays the merchant for the product and collects it on delivery.
    pub driver_pays: bool,
    pub product_amount: f64,
}

/// Priced request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Distance-based fare (delivery fee for deliveries).
    pub fare: f64,
    /// Flat product amount carried by the driver, zero otherwise.
    pub extras: f64,
    /// What the requester is charged; the estimated price.
    pub total: f64,
}

pub fn quote(distance_km: f64, policy: &FarePolicy, extras: ExtraOptions) -> Quote {
    let fare = policy.fare(distance_km);
    let extras = if extras.driver_pays && extras.product_amount > 0.0 {
        round2(extras.product_amount)
    } else {
        0.0
    };
    Quote {
        fare,
        extras,
        total: round2(fare + extras),
    }
}
