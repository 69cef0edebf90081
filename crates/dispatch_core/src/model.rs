//! Identifiers and the small vocabularies shared by drivers and requests.
//!
//! String forms (`taxi`, `in_ride`, ...) match what the presentation boundary
//! exchanges; parsing an unknown string is a validation error.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::GeoPoint;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh random (v4) identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = DispatchError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value)
                    .map(Self)
                    .map_err(|_| {
                        DispatchError::validation(format!("malformed {} `{value}`", $label))
                    })
            }
        }
    };
}

id_type!(
    /// Opaque driver identity. Ordering is the matching tie-break.
    DriverId,
    "driver id"
);
id_type!(
    /// Opaque ride/delivery request identity.
    RequestId,
    "request id"
);
id_type!(
    /// Account identity supplied by the identity collaborator.
    AccountId,
    "account id"
);

macro_rules! string_enum {
    (
        $(#[$meta:meta])* $name:ident, $label:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DispatchError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => {
                        let allowed: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                        Err(DispatchError::validation(format!(
                            "unsupported {} `{other}`, expected one of: {}",
                            $label,
                            allowed.join(", ")
                        )))
                    }
                }
            }
        }
    };
}

string_enum!(
    /// Vehicle category a driver serves and a request requires.
    VehicleCategory, "vehicle category" {
        Taxi => "taxi",
        Delivery => "delivery",
    }
);

string_enum!(
    /// Concrete vehicle; each belongs to exactly one category.
    VehicleType, "vehicle type" {
        Sedan => "sedan",
        Suv => "suv",
        Van => "van",
        Motorcycle => "motorcycle",
        Bicycle => "bicycle",
        Car => "car",
    }
);

impl VehicleType {
    pub fn category(self) -> VehicleCategory {
        match self {
            VehicleType::Sedan | VehicleType::Suv | VehicleType::Van => VehicleCategory::Taxi,
            VehicleType::Motorcycle | VehicleType::Bicycle | VehicleType::Car => {
                VehicleCategory::Delivery
            }
        }
    }
}

string_enum!(
    /// Admin approval of a driver profile.
    ApprovalState, "approval state" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    /// Driver online state. `InRide` is only entered and left by dispatch.
    OnlineState, "online state" {
        Offline => "offline",
        Online => "online",
        InRide => "in_ride",
        Paused => "paused",
    }
);

string_enum!(
    /// Flat request status as seen by the presentation boundary.
    RequestStatus, "request status" {
        Pending => "pending",
        Matched => "matched",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

/// A position report: where the driver was and when.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub point: GeoPoint,
    pub at: DateTime<Utc>,
}

/// Coordinates plus the human-readable address they were given with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub point: GeoPoint,
    pub address: String,
}

impl Place {
    pub fn new(point: GeoPoint, address: impl Into<String>) -> Self {
        Self {
            point,
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_strings() {
        assert_eq!("in_ride".parse::<OnlineState>().unwrap(), OnlineState::InRide);
        assert_eq!("delivery".parse::<VehicleCategory>().unwrap(), VehicleCategory::Delivery);
        assert_eq!(RequestStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn unknown_strings_are_validation_errors() {
        let err = "busy".parse::<OnlineState>().unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(err.to_string().contains("offline, online, in_ride, paused"));

        let err = "not-a-uuid".parse::<DriverId>().unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn vehicle_types_belong_to_one_category() {
        assert_eq!(VehicleType::Suv.category(), VehicleCategory::Taxi);
        assert_eq!(VehicleType::Bicycle.category(), VehicleCategory::Delivery);
    }

    #[test]
    fn driver_ids_order_by_value() {
        assert!(DriverId::from_u128(1) < DriverId::from_u128(2));
    }
}
