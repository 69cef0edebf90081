//! Ride and delivery requests: payloads, pricing capability and lifecycle state.
//!
//! Both kinds share one state machine; what differs is captured by
//! [RequestKind]: which vehicle category serves it, how it is priced, and how
//! its payload is validated.

use bevy_ecs::prelude::Component;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::model::{DriverId, Place, RequestStatus, VehicleCategory};
use crate::pricing::{ExtraOptions, PricingConfig, Quote};

/// Capability set a request payload supplies to the lifecycle.
pub trait RequestKind {
    fn vehicle_category(&self) -> VehicleCategory;

    fn quote(&self, distance_km: f64, pricing: &PricingConfig) -> Quote;

    fn validate(&self) -> DispatchResult<()> {
        Ok(())
    }
}

/// Passenger ride. Carries no payload beyond pickup and destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideDetails {}

impl RequestKind for RideDetails {
    fn vehicle_category(&self) -> VehicleCategory {
        VehicleCategory::Taxi
    }

    fn quote(&self, distance_km: f64, pricing: &PricingConfig) -> Quote {
        pricing.price(distance_km, VehicleCategory::Taxi, ExtraOptions::default())
    }
}

/// Parcel delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    pub order_type: String,
    pub pickup_details: Option<String>,
    pub sender_name: String,
    pub delivery_details: Option<String>,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_national_id: String,
    /// Driver pays the merchant and collects `product_amount` on delivery.
    pub driver_pays: bool,
    pub product_amount: f64,
}

impl RequestKind for DeliveryDetails {
    fn vehicle_category(&self) -> VehicleCategory {
        VehicleCategory::Delivery
    }

    fn quote(&self, distance_km: f64, pricing: &PricingConfig) -> Quote {
        pricing.price(
            distance_km,
            VehicleCategory::Delivery,
            ExtraOptions {
                driver_pays: self.driver_pays,
                product_amount: self.product_amount,
            },
        )
    }

    fn validate(&self) -> DispatchResult<()> {
        if self.order_type.trim().is_empty() {
            return Err(DispatchError::validation("order type is required"));
        }
        if self.sender_name.chars().count() < 3 {
            return Err(DispatchError::validation("sender name must be at least 3 characters"));
        }
        if self.receiver_name.chars().count() < 3 {
            return Err(DispatchError::validation("receiver name must be at least 3 characters"));
        }
        if self.receiver_phone.chars().count() != 10 {
            return Err(DispatchError::validation("receiver phone must be exactly 10 characters"));
        }
        if self.receiver_national_id.chars().count() != 11 {
            return Err(DispatchError::validation(
                "receiver national id must be exactly 11 characters",
            ));
        }
        if !self.product_amount.is_finite() || self.product_amount < 0.0 {
            return Err(DispatchError::validation("product amount must be >= 0"));
        }
        Ok(())
    }
}

/// Payload of a request, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestDetails {
    Ride(RideDetails),
    Delivery(DeliveryDetails),
}

impl RequestDetails {
    fn kind(&self) -> &dyn RequestKind {
        match self {
            RequestDetails::Ride(ride) => ride,
            RequestDetails::Delivery(delivery) => delivery,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestDetails::Ride(_) => "ride",
            RequestDetails::Delivery(_) => "delivery",
        }
    }
}

impl RequestKind for RequestDetails {
    fn vehicle_category(&self) -> VehicleCategory {
        self.kind().vehicle_category()
    }

    fn quote(&self, distance_km: f64, pricing: &PricingConfig) -> Quote {
        self.kind().quote(distance_km, pricing)
    }

    fn validate(&self) -> DispatchResult<()> {
        self.kind().validate()
    }
}

/// What a requester submits.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub pickup: Place,
    pub destination: Place,
    pub details: RequestDetails,
}

impl NewRequest {
    pub fn ride(pickup: Place, destination: Place) -> Self {
        Self {
            pickup,
            destination,
            details: RequestDetails::Ride(RideDetails {}),
        }
    }

    pub fn delivery(pickup: Place, destination: Place, details: DeliveryDetails) -> Self {
        Self {
            pickup,
            destination,
            details: RequestDetails::Delivery(details),
        }
    }
}

/// A time-boxed offer to one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub driver_id: DriverId,
    pub extended_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Offer {
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Nobody eligible when the request was created.
    NoDriversAtCreation,
    /// Every eligible driver rejected, timed out or became unavailable.
    CandidatesExhausted,
}

/// Why an offer left the driver it was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Rejected,
    Expired,
    /// Driver went offline/paused or lost approval.
    DriverUnavailable,
    DriverRemoved,
}

/// Lifecycle state of a request.
///
/// The driver is carried by the variants that have one, which keeps
/// "assigned driver set iff matched/in progress" and "deadline set iff pending
/// with an offer" true by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Component)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestState {
    Pending { offer: Option<Offer> },
    Matched { driver_id: DriverId },
    InProgress { driver_id: DriverId },
    Completed { driver_id: DriverId, final_price: f64 },
    Cancelled { reason: CancelReason },
}

impl RequestState {
    pub fn status(&self) -> RequestStatus {
        match self {
            RequestState::Pending { .. } => RequestStatus::Pending,
            RequestState::Matched { .. } => RequestStatus::Matched,
            RequestState::InProgress { .. } => RequestStatus::InProgress,
            RequestState::Completed { .. } => RequestStatus::Completed,
            RequestState::Cancelled { .. } => RequestStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn offer(&self) -> Option<&Offer> {
        match self {
            RequestState::Pending { offer } => offer.as_ref(),
            _ => None,
        }
    }

    pub fn assigned_driver_id(&self) -> Option<DriverId> {
        match self {
            RequestState::Matched { driver_id } | RequestState::InProgress { driver_id } => {
                Some(*driver_id)
            }
            _ => None,
        }
    }

    pub fn driver_response_deadline(&self) -> Option<DateTime<Utc>> {
        self.offer().map(|offer| offer.deadline)
    }

    pub fn final_price(&self) -> Option<f64> {
        match self {
            RequestState::Completed { final_price, .. } => Some(*final_price),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> DeliveryDetails {
        DeliveryDetails {
            order_type: "documents".into(),
            pickup_details: None,
            sender_name: "Rami".into(),
            delivery_details: Some("2nd floor".into()),
            receiver_name: "Lina".into(),
            receiver_phone: "0991234567".into(),
            receiver_national_id: "01234567890".into(),
            driver_pays: false,
            product_amount: 0.0,
        }
    }

    #[test]
    fn delivery_validation_follows_payload_rules() {
        assert!(delivery().validate().is_ok());

        let short_phone = DeliveryDetails {
            receiver_phone: "099".into(),
            ..delivery()
        };
        assert!(matches!(short_phone.validate(), Err(DispatchError::Validation(_))));

        let negative = DeliveryDetails {
            product_amount: -1.0,
            ..delivery()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(
            RequestDetails::Ride(RideDetails {}).vehicle_category(),
            VehicleCategory::Taxi
        );
        assert_eq!(
            RequestDetails::Delivery(delivery()).vehicle_category(),
            VehicleCategory::Delivery
        );
    }

    #[test]
    fn state_accessors_follow_invariants() {
        let driver = DriverId::from_u128(9);
        let now = Utc::now();
        let offered = RequestState::Pending {
            offer: Some(Offer {
                driver_id: driver,
                extended_at: now,
                deadline: now + chrono::Duration::seconds(30),
            }),
        };
        assert_eq!(offered.assigned_driver_id(), None);
        assert!(offered.driver_response_deadline().is_some());

        let matched = RequestState::Matched { driver_id: driver };
        assert_eq!(matched.assigned_driver_id(), Some(driver));
        assert_eq!(matched.driver_response_deadline(), None);

        let done = RequestState::Completed {
            driver_id: driver,
            final_price: 10_000.0,
        };
        assert_eq!(done.assigned_driver_id(), None);
        assert_eq!(done.final_price(), Some(10_000.0));
        assert!(done.is_terminal());
    }
}
