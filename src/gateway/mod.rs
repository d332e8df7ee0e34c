//! Collaborating services the delivery service calls out to.
//!
//! Each collaborator sits behind an object-safe trait so the engine can be
//! driven by the HTTP clients in [`http`] in production and by the doubles in
//! [`memory`] in tests.

pub mod http;
pub mod memory;
pub mod notify;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned an unexpected body: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[serde(default)]
    pub street: Option<String>,
    pub city: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeliveryAddress {
    pub fn one_line(&self) -> String {
        match self.street.as_deref().map(str::trim) {
            Some(street) if !street.is_empty() => format!("{street}, {}", self.city),
            _ => self.city.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub delivery_address: DeliveryAddress,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub restaurant_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub special_instructions: String,
}

impl OrderDetail {
    /// Drop-off location token used for courier matching.
    pub fn dropoff_location(&self) -> &str {
        &self.delivery_address.city
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantDetail {
    pub available: bool,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Everything needed to tell a customer their order arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredNotice {
    pub order_id: String,
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: DeliveryAddress,
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn fetch_order(&self, order_id: &str) -> Result<OrderDetail, GatewayError>;
}

#[async_trait]
pub trait RestaurantGateway: Send + Sync {
    async fn fetch_restaurant(&self, restaurant_id: &str)
        -> Result<RestaurantDetail, GatewayError>;
}

#[async_trait]
pub trait UserGateway: Send + Sync {
    async fn fetch_user(&self, user_id: &str) -> Result<UserDetail, GatewayError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_delivered(&self, notice: &DeliveredNotice) -> Result<(), GatewayError>;
}

#[derive(Clone)]
pub struct Gateways {
    pub orders: Arc<dyn OrderGateway>,
    pub restaurants: Arc<dyn RestaurantGateway>,
    pub users: Arc<dyn UserGateway>,
    pub notifier: Arc<dyn Notifier>,
}
