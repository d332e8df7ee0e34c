use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Courier {
    pub id: Uuid,
    pub account_id: String,
    pub pickup_location: String,
    pub delivery_locations: Vec<String>,
    pub vehicle_reg_number: String,
    pub mobile_number: String,
    pub profile_image: Option<String>,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// Route match used by assignment: exact pickup, dropoff in the supported set.
    pub fn serves(&self, pickup: &str, dropoff: &str) -> bool {
        self.pickup_location == pickup
            && self.delivery_locations.iter().any(|location| location == dropoff)
    }
}

#[derive(Debug, Clone)]
pub struct NewCourier {
    pub account_id: String,
    pub pickup_location: String,
    pub delivery_locations: Vec<String>,
    pub vehicle_reg_number: String,
    pub mobile_number: String,
    pub profile_image: Option<String>,
}

/// Merge patch for a courier profile. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CourierPatch {
    pub pickup_location: Option<String>,
    pub delivery_locations: Option<LocationList>,
    pub vehicle_reg_number: Option<String>,
    pub mobile_number: Option<String>,
    pub profile_image: Option<String>,
}

impl CourierPatch {
    /// Supplied text fields must not be blank.
    pub fn validate(&self) -> Result<(), AppError> {
        let fields = [
            ("pickupLocation", &self.pickup_location),
            ("vehicleRegNumber", &self.vehicle_reg_number),
            ("mobileNumber", &self.mobile_number),
        ];
        for (name, value) in fields {
            if value.as_deref().is_some_and(|value| value.trim().is_empty()) {
                return Err(AppError::BadRequest(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn apply(self, courier: &mut Courier) {
        if let Some(pickup_location) = self.pickup_location {
            courier.pickup_location = pickup_location;
        }
        if let Some(locations) = self.delivery_locations {
            courier.delivery_locations = locations.into_vec();
        }
        if let Some(vehicle_reg_number) = self.vehicle_reg_number {
            courier.vehicle_reg_number = vehicle_reg_number;
        }
        if let Some(mobile_number) = self.mobile_number {
            courier.mobile_number = mobile_number;
        }
        if let Some(profile_image) = self.profile_image {
            courier.profile_image = Some(profile_image);
        }
    }
}

/// Delivery destinations as sent by clients: either a list or a comma separated string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LocationList {
    List(Vec<String>),
    Csv(String),
}

impl LocationList {
    pub fn into_vec(self) -> Vec<String> {
        let raw = match self {
            LocationList::List(list) => list,
            LocationList::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        };
        normalize_locations(raw)
    }
}

pub fn normalize_locations<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut locations: Vec<String> = Vec::new();
    for location in raw {
        let trimmed = location.trim();
        if !trimmed.is_empty() && !locations.iter().any(|seen| seen == trimmed) {
            locations.push(trimmed.to_string());
        }
    }
    locations
}
