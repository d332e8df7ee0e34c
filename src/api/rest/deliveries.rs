use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::api::rest::drivers::current_courier;
use crate::api::rest::middleware::require_delivery_personnel;
use crate::auth::Identity;
use crate::engine::assignment::{assign_automatically, respond_to_assignment, AssignRequest};
use crate::engine::lifecycle;
use crate::error::AppError;
use crate::gateway::DeliveryAddress;
use crate::models::delivery::{Delivery, DeliveryStatus, ResponseAction};
use crate::observability::sanitize::sanitize_for_log;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let courier_routes = Router::new()
        .route("/respond", post(respond))
        .route("/assigned-orders", get(assigned_orders))
        .route("/my-deliveries", get(my_deliveries))
        .route("/delivery/:id/status", patch(update_status))
        .route_layer(axum::middleware::from_fn(require_delivery_personnel));

    Router::new()
        .route("/assign", post(assign))
        .merge(courier_routes)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub order_id: String,
    pub action: ResponseAction,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Serialize)]
pub struct DeliveryEnvelope {
    pub message: &'static str,
    pub delivery: Delivery,
}

/// A delivery as listed to its courier, joined with what the order service knows.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub delivery_address: Option<DeliveryAddress>,
    #[serde(flatten)]
    pub order: Option<OrderFacts>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFacts {
    pub payment_status: Option<String>,
    pub restaurant_id: Option<String>,
    pub special_instructions: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Detail {
    AddressOnly,
    Full,
}

async fn assign(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<DeliveryEnvelope>, AppError> {
    let Json(request) = payload?;
    let delivery = assign_automatically(&state, request).await?;

    Ok(Json(DeliveryEnvelope {
        message: "Driver assigned",
        delivery,
    }))
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<RespondRequest>, JsonRejection>,
) -> Result<Json<DeliveryEnvelope>, AppError> {
    let Json(request) = payload?;
    let courier = current_courier(&state, &identity)?;

    let outcome =
        respond_to_assignment(&state, &request.order_id, courier.id, request.action).await?;
    let message = outcome.message();

    Ok(Json(DeliveryEnvelope {
        message,
        delivery: outcome.into_delivery(),
    }))
}

async fn assigned_orders(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<DeliveryView>>, AppError> {
    let courier = current_courier(&state, &identity)?;
    let deliveries = state.deliveries.find_assigned_pending_for_courier(courier.id);

    Ok(Json(with_order_details(&state, deliveries, Detail::Full).await))
}

async fn my_deliveries(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<DeliveryView>>, AppError> {
    let courier = current_courier(&state, &identity)?;
    let deliveries = state.deliveries.find_all_for_courier(courier.id);

    Ok(Json(with_order_details(&state, deliveries, Detail::AddressOnly).await))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<DeliveryEnvelope>, AppError> {
    let Json(request) = payload?;
    DeliveryStatus::parse_courier_update(&request.status)?;

    let delivery_id = Uuid::parse_str(&raw_id)
        .map_err(|_| AppError::NotFound("Delivery not found".to_string()))?;
    let courier = current_courier(&state, &identity)?;

    let delivery =
        lifecycle::update_status(&state, delivery_id, courier.id, &request.status).await?;

    Ok(Json(DeliveryEnvelope {
        message: "Delivery status updated successfully",
        delivery,
    }))
}

// Lookups run concurrently; one failing order only blanks its own entry.
async fn with_order_details(
    state: &AppState,
    deliveries: Vec<Delivery>,
    detail: Detail,
) -> Vec<DeliveryView> {
    join_all(deliveries.into_iter().map(|mut delivery| async move {
        match state.gateways.orders.fetch_order(&delivery.order_id).await {
            Ok(order) => {
                if detail == Detail::Full {
                    if let Some(user_id) = &order.user_id {
                        delivery.customer_id = user_id.clone();
                    }
                }
                let facts = (detail == Detail::Full).then(|| OrderFacts {
                    payment_status: order.payment_status.clone(),
                    restaurant_id: order.restaurant_id.clone(),
                    special_instructions: order.special_instructions.clone(),
                });

                DeliveryView {
                    delivery,
                    delivery_address: Some(order.delivery_address),
                    order: facts,
                }
            }
            Err(err) => {
                warn!(
                    order_id = %sanitize_for_log(&delivery.order_id),
                    error = %err,
                    "failed fetching order details"
                );
                DeliveryView {
                    delivery,
                    delivery_address: None,
                    order: None,
                }
            }
        }
    }))
    .await
}
