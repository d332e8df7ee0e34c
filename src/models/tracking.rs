use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// Frames a tracking client may send.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackingCommand {
    #[serde(rename_all = "camelCase")]
    Join { delivery_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Leave { delivery_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Location { delivery_id: Uuid, location: GeoPoint },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename = "locationUpdate", rename_all = "camelCase")]
pub struct LocationUpdate {
    pub delivery_id: Uuid,
    pub location: GeoPoint,
}
