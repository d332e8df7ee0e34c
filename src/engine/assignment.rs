use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::gateway_failure;
use crate::error::AppError;
use crate::models::delivery::{Delivery, NewDelivery, ResponseAction};
use crate::observability::sanitize::sanitize_for_log;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub order_id: String,
    pub customer_id: String,
    pub restaurant_id: String,
}

impl AssignRequest {
    fn validate(&self) -> Result<(), AppError> {
        for (field, value) in [
            ("orderId", &self.order_id),
            ("customerId", &self.customer_id),
            ("restaurantId", &self.restaurant_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::BadRequest(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// How a courier's response left the delivery.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Accepted(Delivery),
    Reassigned(Delivery),
    Unassigned(Delivery),
}

impl ResponseOutcome {
    pub fn delivery(&self) -> &Delivery {
        match self {
            ResponseOutcome::Accepted(delivery)
            | ResponseOutcome::Reassigned(delivery)
            | ResponseOutcome::Unassigned(delivery) => delivery,
        }
    }

    pub fn into_delivery(self) -> Delivery {
        match self {
            ResponseOutcome::Accepted(delivery)
            | ResponseOutcome::Reassigned(delivery)
            | ResponseOutcome::Unassigned(delivery) => delivery,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResponseOutcome::Accepted(_) => "Assignment accepted",
            ResponseOutcome::Reassigned(_) => "Delivery reassigned to another driver",
            ResponseOutcome::Unassigned(_) => "No driver available to reassign. Delivery pending.",
        }
    }
}

/// Matches the order to an available courier and reserves it.
pub async fn assign_automatically(
    state: &AppState,
    request: AssignRequest,
) -> Result<Delivery, AppError> {
    let start = Instant::now();
    let result = assign(state, &request).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::NoAvailableCouriers) => "no_courier",
        Err(AppError::RestaurantUnavailable) => "restaurant_unavailable",
        Err(_) => "error",
    };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();

    result
}

async fn assign(state: &AppState, request: &AssignRequest) -> Result<Delivery, AppError> {
    request.validate()?;

    let restaurant = state
        .gateways
        .restaurants
        .fetch_restaurant(&request.restaurant_id)
        .await
        .map_err(gateway_failure)?;

    if !restaurant.available {
        return Err(AppError::RestaurantUnavailable);
    }

    let order = state
        .gateways
        .orders
        .fetch_order(&request.order_id)
        .await
        .map_err(gateway_failure)?;
    let dropoff = order.dropoff_location();

    // A delivery left unassigned by a decline is picked up again rather than duplicated.
    let existing = state.deliveries.find_by_order(&request.order_id);
    if let Some(existing) = &existing {
        if !existing.is_unassigned() {
            return Err(AppError::Conflict(format!(
                "delivery already exists for order {}",
                request.order_id
            )));
        }
    }

    let courier = state
        .couriers
        .reserve_match(&restaurant.location, dropoff)
        .ok_or(AppError::NoAvailableCouriers)?;

    let new_delivery = NewDelivery {
        order_id: request.order_id.clone(),
        customer_id: request.customer_id.clone(),
        pickup_location: restaurant.location.clone(),
        dropoff_location: dropoff.to_string(),
        courier_id: courier.id,
    };
    let stored = match existing {
        Some(existing) => state.deliveries.reuse_unassigned(existing.id, new_delivery),
        None => state.deliveries.create(new_delivery),
    };

    match stored {
        Ok(delivery) => {
            info!(
                order_id = %sanitize_for_log(&delivery.order_id),
                delivery_id = %delivery.id,
                courier_id = %courier.id,
                "courier assigned"
            );
            Ok(delivery)
        }
        Err(err) => {
            state.couriers.set_availability(courier.id, true);
            warn!(
                order_id = %sanitize_for_log(&request.order_id),
                courier_id = %courier.id,
                error = %err,
                "delivery write failed; courier released"
            );
            Err(err)
        }
    }
}

/// Applies `courier_id`'s accept or decline. The answer only lands while
/// that courier still holds the delivery. A decline releases the courier and
/// looks once for a replacement on the same route.
pub async fn respond_to_assignment(
    state: &AppState,
    order_id: &str,
    courier_id: Uuid,
    action: ResponseAction,
) -> Result<ResponseOutcome, AppError> {
    let delivery = state
        .deliveries
        .find_by_order(order_id)
        .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

    let updated = state
        .deliveries
        .set_acceptance(delivery.id, courier_id, action)?;

    state
        .metrics
        .responses_total
        .with_label_values(&[action.as_str()])
        .inc();

    match action {
        ResponseAction::Accept => {
            info!(delivery_id = %updated.id, courier_id = %courier_id, "assignment accepted");
            Ok(ResponseOutcome::Accepted(updated))
        }
        ResponseAction::Decline => {
            state.couriers.set_availability(courier_id, true);
            info!(delivery_id = %updated.id, courier_id = %courier_id, "assignment declined");

            let result = reassign_after_decline(state, &updated, courier_id).await;
            let outcome = match &result {
                Ok(ResponseOutcome::Reassigned(_)) => "reassigned",
                Ok(_) => "unassigned",
                Err(_) => "failed",
            };
            state
                .metrics
                .reassignments_total
                .with_label_values(&[outcome])
                .inc();
            result
        }
    }
}

async fn reassign_after_decline(
    state: &AppState,
    declined: &Delivery,
    declined_by: Uuid,
) -> Result<ResponseOutcome, AppError> {
    let order = state
        .gateways
        .orders
        .fetch_order(&declined.order_id)
        .await
        .map_err(|err| AppError::ReassignmentFailed(err.to_string()))?;

    let replacement = state.couriers.reserve_match_excluding(
        &declined.pickup_location,
        order.dropoff_location(),
        declined_by,
    );

    let Some(courier) = replacement else {
        let delivery = state.deliveries.settle_declined(declined.id)?;
        if delivery.courier_id.is_none() {
            info!(delivery_id = %delivery.id, "no replacement courier; delivery pending");
        }
        return Ok(outcome_for(delivery));
    };

    match state.deliveries.reassign_courier(declined.id, courier.id) {
        Ok(delivery) => {
            info!(
                delivery_id = %delivery.id,
                courier_id = %courier.id,
                "delivery reassigned"
            );
            Ok(ResponseOutcome::Reassigned(delivery))
        }
        Err(AppError::Conflict(_)) => {
            // Assigned again while the order lookup was in flight.
            state.couriers.set_availability(courier.id, true);
            let delivery = state
                .deliveries
                .find_by_id(declined.id)
                .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;
            Ok(outcome_for(delivery))
        }
        Err(err) => {
            state.couriers.set_availability(courier.id, true);
            Err(AppError::ReassignmentFailed(err.to_string()))
        }
    }
}

/// Describes a declined delivery by who holds it now.
fn outcome_for(delivery: Delivery) -> ResponseOutcome {
    if delivery.courier_id.is_some() {
        ResponseOutcome::Reassigned(delivery)
    } else {
        ResponseOutcome::Unassigned(delivery)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{assign_automatically, respond_to_assignment, AssignRequest, ResponseOutcome};
    use crate::engine::testing::Fixture;
    use crate::error::AppError;
    use crate::models::delivery::{AcceptanceState, DeliveryStatus, ResponseAction};

    fn request(order: &str) -> AssignRequest {
        AssignRequest {
            order_id: order.to_string(),
            customer_id: "customer-1".to_string(),
            restaurant_id: "r1".to_string(),
        }
    }

    fn colombo() -> Fixture {
        let fixture = Fixture::new();
        fixture.restaurant("r1", "Colombo", true);
        fixture.order("o1", "customer-1", "Colombo");
        fixture
    }

    #[tokio::test]
    async fn assignment_reserves_matched_courier() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);

        let delivery = assign_automatically(&fixture.state, request("o1")).await.unwrap();

        assert_eq!(delivery.courier_id, Some(courier.id));
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
        assert_eq!(delivery.pickup_location, "Colombo");
        assert_eq!(delivery.dropoff_location, "Colombo");
        assert!(!fixture.state.couriers.get(courier.id).unwrap().available);
    }

    #[tokio::test]
    async fn closed_restaurant_is_rejected_before_matching() {
        let fixture = colombo();
        fixture.restaurant("r1", "Colombo", false);
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);

        let result = assign_automatically(&fixture.state, request("o1")).await;

        assert!(matches!(result, Err(AppError::RestaurantUnavailable)));
        assert!(fixture.state.couriers.get(courier.id).unwrap().available);
        assert!(fixture.state.deliveries.is_empty());
    }

    #[tokio::test]
    async fn no_matching_courier_creates_nothing() {
        let fixture = colombo();
        fixture.courier("k1", "Kandy", &["Colombo"]);

        let result = assign_automatically(&fixture.state, request("o1")).await;

        assert!(matches!(result, Err(AppError::NoAvailableCouriers)));
        assert!(fixture.state.deliveries.find_by_order("o1").is_none());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let fixture = colombo();
        fixture.courier("k1", "Colombo", &["Colombo"]);

        let result = assign_automatically(&fixture.state, request("missing")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn second_assignment_for_active_order_conflicts() {
        let fixture = colombo();
        fixture.courier("k1", "Colombo", &["Colombo"]);
        let spare = fixture.courier("k2", "Colombo", &["Colombo"]);

        assign_automatically(&fixture.state, request("o1")).await.unwrap();
        let again = assign_automatically(&fixture.state, request("o1")).await;

        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert!(fixture.state.couriers.get(spare.id).unwrap().available);
        assert_eq!(fixture.state.deliveries.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_assignments_do_not_double_book() {
        let fixture = Fixture::new();
        fixture.restaurant("r1", "Colombo", true);
        fixture.courier("k1", "Colombo", &["Colombo"]);
        for order in ["o1", "o2", "o3", "o4"] {
            fixture.order(order, "customer-1", "Colombo");
        }

        let handles: Vec<_> = ["o1", "o2", "o3", "o4"]
            .into_iter()
            .map(|order| {
                let state = fixture.state.clone();
                tokio::spawn(async move { assign_automatically(&state, request(order)).await })
            })
            .collect();

        let mut assigned = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                assigned += 1;
            }
        }
        assert_eq!(assigned, 1);
    }

    #[tokio::test]
    async fn accept_keeps_courier_reserved() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();

        let outcome =
            respond_to_assignment(&fixture.state, "o1", courier.id, ResponseAction::Accept)
                .await
                .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Accepted(_)));
        let delivery = outcome.delivery();
        assert_eq!(delivery.acceptance, AcceptanceState::Accepted);
        assert_eq!(delivery.courier_id, Some(courier.id));
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert!(!fixture.state.couriers.get(courier.id).unwrap().available);
    }

    #[tokio::test]
    async fn decline_with_replacement_moves_delivery() {
        let fixture = colombo();
        let first = fixture.courier("k1", "Colombo", &["Colombo"]);
        let second = fixture.courier("k2", "Colombo", &["Colombo", "Kandy"]);
        let delivery = assign_automatically(&fixture.state, request("o1")).await.unwrap();
        assert_eq!(delivery.courier_id, Some(first.id));

        let outcome =
            respond_to_assignment(&fixture.state, "o1", first.id, ResponseAction::Decline)
                .await
                .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Reassigned(_)));
        let delivery = outcome.into_delivery();
        assert_eq!(delivery.courier_id, Some(second.id));
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert!(!fixture.state.couriers.get(second.id).unwrap().available);
        assert!(fixture.state.couriers.get(first.id).unwrap().available);
    }

    #[tokio::test]
    async fn decline_without_replacement_leaves_delivery_pending() {
        let fixture = colombo();
        let only = fixture.courier("k1", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();

        let outcome =
            respond_to_assignment(&fixture.state, "o1", only.id, ResponseAction::Decline)
                .await
                .unwrap();

        assert!(matches!(outcome, ResponseOutcome::Unassigned(_)));
        let delivery = outcome.delivery();
        assert_eq!(delivery.courier_id, None);
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(fixture.state.couriers.get(only.id).unwrap().available);
    }

    #[tokio::test]
    async fn unassigned_delivery_is_reused_by_next_assignment() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        let first = assign_automatically(&fixture.state, request("o1")).await.unwrap();
        respond_to_assignment(&fixture.state, "o1", courier.id, ResponseAction::Decline)
            .await
            .unwrap();

        let again = assign_automatically(&fixture.state, request("o1")).await.unwrap();

        assert_eq!(again.id, first.id);
        assert_eq!(again.courier_id, first.courier_id);
        assert_eq!(again.status, DeliveryStatus::Assigned);
        assert_eq!(again.acceptance, AcceptanceState::Pending);
        assert_eq!(fixture.state.deliveries.len(), 1);
    }

    #[tokio::test]
    async fn reused_delivery_takes_the_new_route_and_customer() {
        let fixture = colombo();
        fixture.restaurant("r2", "Kandy", true);
        let colombo_courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        let kandy_courier = fixture.courier("k2", "Kandy", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();
        respond_to_assignment(&fixture.state, "o1", colombo_courier.id, ResponseAction::Decline)
            .await
            .unwrap();

        let retry = AssignRequest {
            order_id: "o1".to_string(),
            customer_id: "customer-2".to_string(),
            restaurant_id: "r2".to_string(),
        };
        let again = assign_automatically(&fixture.state, retry).await.unwrap();

        assert_eq!(again.courier_id, Some(kandy_courier.id));
        assert_eq!(again.pickup_location, "Kandy");
        assert_eq!(again.customer_id, "customer-2");
        let stored = fixture.state.deliveries.find_by_order("o1").unwrap();
        assert_eq!(stored.pickup_location, "Kandy");
    }

    #[tokio::test]
    async fn assignment_during_decline_lookup_is_kept() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();

        let release = fixture.orders.hold_next_lookup();
        let state = fixture.state.clone();
        let courier_id = courier.id;
        let decline = tokio::spawn(async move {
            respond_to_assignment(&state, "o1", courier_id, ResponseAction::Decline).await
        });
        fixture.orders.lookup_parked().await;

        let reassigned = assign_automatically(&fixture.state, request("o1")).await.unwrap();
        assert_eq!(reassigned.courier_id, Some(courier.id));

        release.send(()).unwrap();
        let outcome = decline.await.unwrap().unwrap();

        assert!(matches!(outcome, ResponseOutcome::Reassigned(_)));
        assert_eq!(outcome.delivery().courier_id, Some(courier.id));
        let delivery = fixture.state.deliveries.find_by_order("o1").unwrap();
        assert_eq!(delivery.courier_id, Some(courier.id));
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
        assert!(!fixture.state.couriers.get(courier.id).unwrap().available);
    }

    #[tokio::test]
    async fn failed_order_lookup_during_decline_reports_reassignment_failure() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();
        fixture.orders.set_unreachable(true);

        let result =
            respond_to_assignment(&fixture.state, "o1", courier.id, ResponseAction::Decline).await;

        assert!(matches!(result, Err(AppError::ReassignmentFailed(_))));
        let delivery = fixture.state.deliveries.find_by_order("o1").unwrap();
        assert_eq!(delivery.acceptance, AcceptanceState::Declined);
        assert_eq!(delivery.courier_id, None);
        assert!(fixture.state.couriers.get(courier.id).unwrap().available);
    }

    #[tokio::test]
    async fn responding_twice_conflicts() {
        let fixture = colombo();
        let courier = fixture.courier("k1", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();
        respond_to_assignment(&fixture.state, "o1", courier.id, ResponseAction::Accept)
            .await
            .unwrap();

        let again =
            respond_to_assignment(&fixture.state, "o1", courier.id, ResponseAction::Decline).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn response_from_a_courier_not_holding_the_delivery_is_forbidden() {
        let fixture = colombo();
        let holder = fixture.courier("k1", "Colombo", &["Colombo"]);
        let other = fixture.courier("k2", "Colombo", &["Colombo"]);
        assign_automatically(&fixture.state, request("o1")).await.unwrap();

        let result =
            respond_to_assignment(&fixture.state, "o1", other.id, ResponseAction::Accept).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        let delivery = fixture.state.deliveries.find_by_order("o1").unwrap();
        assert_eq!(delivery.courier_id, Some(holder.id));
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
    }

    #[tokio::test]
    async fn responding_to_unknown_order_is_not_found() {
        let fixture = colombo();
        let nobody = Uuid::from_u128(1);
        let result = respond_to_assignment(&fixture.state, "nope", nobody, ResponseAction::Accept).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_ids_are_bad_requests() {
        let fixture = colombo();
        let mut bad = request("o1");
        bad.restaurant_id = "  ".to_string();

        let result = assign_automatically(&fixture.state, bad).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
