use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::gateway_failure;
use crate::error::AppError;
use crate::gateway::DeliveredNotice;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;

/// Moves a delivery held by `courier_id` to PickedUp, Delivered or Cancelled.
///
/// PickedUp and Delivered need an accepted assignment. Terminal statuses
/// release the courier and Cancelled also drops the courier reference.
/// Delivered notifies the customer; notification problems are logged and
/// never fail the update.
pub async fn update_status(
    state: &AppState,
    delivery_id: Uuid,
    courier_id: Uuid,
    raw_status: &str,
) -> Result<Delivery, AppError> {
    let status = DeliveryStatus::parse_courier_update(raw_status)?;

    let delivery = state
        .deliveries
        .set_lifecycle_status(delivery_id, courier_id, status)?
        .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

    state
        .metrics
        .status_updates_total
        .with_label_values(&[status.as_str()])
        .inc();
    info!(delivery_id = %delivery.id, status = status.as_str(), "delivery status updated");

    if status.is_terminal() {
        state.couriers.set_availability(courier_id, true);
    }

    if status == DeliveryStatus::Delivered {
        notify_delivered(state, &delivery).await;
    }

    Ok(delivery)
}

async fn notify_delivered(state: &AppState, delivery: &Delivery) {
    let notice = match delivered_notice(state, delivery).await {
        Ok(notice) => notice,
        Err(err) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["skipped"])
                .inc();
            warn!(
                delivery_id = %delivery.id,
                error = %err,
                "could not prepare delivered notification"
            );
            return;
        }
    };

    match state.gateways.notifier.notify_delivered(&notice).await {
        Ok(()) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["sent"])
                .inc();
        }
        Err(err) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["failed"])
                .inc();
            warn!(delivery_id = %delivery.id, error = %err, "delivered notification failed");
        }
    }
}

async fn delivered_notice(
    state: &AppState,
    delivery: &Delivery,
) -> Result<DeliveredNotice, AppError> {
    let order = state
        .gateways
        .orders
        .fetch_order(&delivery.order_id)
        .await
        .map_err(gateway_failure)?;

    let customer_id = order
        .user_id
        .clone()
        .unwrap_or_else(|| delivery.customer_id.clone());
    let customer = state
        .gateways
        .users
        .fetch_user(&customer_id)
        .await
        .map_err(gateway_failure)?;

    Ok(DeliveredNotice {
        order_id: delivery.order_id.clone(),
        customer_name: customer.name,
        email: customer.email,
        phone: customer.phone,
        address: order.delivery_address,
    })
}
