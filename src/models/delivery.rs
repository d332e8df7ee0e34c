use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AcceptanceState {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// Statuses a courier may set directly. Everything else is driven by assignment.
    pub const COURIER_SETTABLE: [DeliveryStatus; 3] = [
        DeliveryStatus::PickedUp,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ];

    pub fn parse_courier_update(raw: &str) -> Result<Self, AppError> {
        Self::COURIER_SETTABLE
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| AppError::InvalidStatus(raw.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Pending",
            DeliveryStatus::Assigned => "Assigned",
            DeliveryStatus::PickedUp => "PickedUp",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseAction {
    Accept,
    Decline,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Accept => "accept",
            ResponseAction::Decline => "decline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: String,
    pub customer_id: String,
    pub courier_id: Option<Uuid>,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub acceptance: AcceptanceState,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Unassigned and waiting for a courier, e.g. after a decline with no replacement.
    pub fn is_unassigned(&self) -> bool {
        self.courier_id.is_none() && self.status == DeliveryStatus::Pending
    }

    /// Whether the courier holding this delivery may set `next`.
    pub fn can_move_to(&self, next: DeliveryStatus) -> bool {
        let in_hand = matches!(
            self.status,
            DeliveryStatus::Assigned | DeliveryStatus::PickedUp
        );
        match next {
            DeliveryStatus::PickedUp | DeliveryStatus::Delivered => {
                in_hand && self.acceptance == AcceptanceState::Accepted
            }
            DeliveryStatus::Cancelled => in_hand,
            DeliveryStatus::Pending | DeliveryStatus::Assigned => false,
        }
    }

    pub fn awaits_response(&self) -> bool {
        self.courier_id.is_some()
            && self.status == DeliveryStatus::Assigned
            && self.acceptance == AcceptanceState::Pending
    }
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub order_id: String,
    pub customer_id: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub courier_id: Uuid,
}
