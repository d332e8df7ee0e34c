use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{
    AcceptanceState, Delivery, DeliveryStatus, NewDelivery, ResponseAction,
};

/// Delivery records keyed by id. At most one delivery exists per order.
#[derive(Default)]
pub struct DeliveryStore {
    deliveries: DashMap<Uuid, Delivery>,
    by_order: DashMap<String, Uuid>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn create(&self, new: NewDelivery) -> Result<Delivery, AppError> {
        match self.by_order.entry(new.order_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "delivery already exists for order {}",
                new.order_id
            ))),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let delivery = Delivery {
                    id: Uuid::new_v4(),
                    order_id: new.order_id,
                    customer_id: new.customer_id,
                    courier_id: Some(new.courier_id),
                    pickup_location: new.pickup_location,
                    dropoff_location: new.dropoff_location,
                    acceptance: AcceptanceState::Pending,
                    status: DeliveryStatus::Assigned,
                    created_at: now,
                    updated_at: now,
                };
                self.deliveries.insert(delivery.id, delivery.clone());
                slot.insert(delivery.id);
                Ok(delivery)
            }
        }
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn find_by_order(&self, order_id: &str) -> Option<Delivery> {
        let id = self.by_order.get(order_id).map(|entry| *entry.value())?;
        self.find_by_id(id)
    }

    /// Deliveries waiting for `courier_id` to accept or decline.
    pub fn find_assigned_pending_for_courier(&self, courier_id: Uuid) -> Vec<Delivery> {
        self.collect_sorted(|delivery| {
            delivery.courier_id == Some(courier_id) && delivery.awaits_response()
        })
    }

    pub fn find_all_for_courier(&self, courier_id: Uuid) -> Vec<Delivery> {
        self.collect_sorted(|delivery| delivery.courier_id == Some(courier_id))
    }

    /// Records a courier's answer. Only applies while the delivery is still
    /// waiting on `courier_id`; a decline clears the courier and resets the
    /// lifecycle to Pending until the caller reassigns or settles it.
    pub fn set_acceptance(
        &self,
        id: Uuid,
        courier_id: Uuid,
        action: ResponseAction,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

        if delivery.courier_id != Some(courier_id) {
            return Err(not_your_delivery());
        }
        if !delivery.awaits_response() {
            return Err(AppError::Conflict(
                "delivery is not awaiting a response".to_string(),
            ));
        }

        match action {
            ResponseAction::Accept => {
                delivery.acceptance = AcceptanceState::Accepted;
            }
            ResponseAction::Decline => {
                delivery.acceptance = AcceptanceState::Declined;
                delivery.courier_id = None;
                delivery.status = DeliveryStatus::Pending;
            }
        }
        delivery.updated_at = Utc::now();

        Ok(delivery.clone())
    }

    /// Points an unassigned delivery at a new courier, awaiting its response.
    pub fn reassign_courier(&self, id: Uuid, courier_id: Uuid) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

        if !delivery.is_unassigned() {
            return Err(AppError::Conflict(format!(
                "delivery for order {} is already assigned",
                delivery.order_id
            )));
        }

        delivery.courier_id = Some(courier_id);
        delivery.acceptance = AcceptanceState::Pending;
        delivery.status = DeliveryStatus::Assigned;
        delivery.updated_at = Utc::now();

        Ok(delivery.clone())
    }

    /// Gives an unassigned delivery a fresh route and courier. Used when an
    /// order is assigned again after a decline left it without a courier.
    pub fn reuse_unassigned(&self, id: Uuid, new: NewDelivery) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

        if !delivery.is_unassigned() || delivery.order_id != new.order_id {
            return Err(AppError::Conflict(format!(
                "delivery already exists for order {}",
                delivery.order_id
            )));
        }

        delivery.customer_id = new.customer_id;
        delivery.pickup_location = new.pickup_location;
        delivery.dropoff_location = new.dropoff_location;
        delivery.courier_id = Some(new.courier_id);
        delivery.acceptance = AcceptanceState::Pending;
        delivery.status = DeliveryStatus::Assigned;
        delivery.updated_at = Utc::now();

        Ok(delivery.clone())
    }

    /// Closes a decline that found no replacement: the delivery waits for a
    /// courier with acceptance back at Pending. A record that was assigned
    /// again in the meantime is returned untouched.
    pub fn settle_declined(&self, id: Uuid) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;

        if delivery.is_unassigned() && delivery.acceptance == AcceptanceState::Declined {
            delivery.acceptance = AcceptanceState::Pending;
            delivery.updated_at = Utc::now();
        }

        Ok(delivery.clone())
    }

    /// Courier-driven lifecycle change by the courier holding the delivery.
    /// `Ok(None)` when the delivery is unknown. Cancelling drops the courier
    /// reference; PickedUp and Delivered need an accepted assignment.
    pub fn set_lifecycle_status(
        &self,
        id: Uuid,
        courier_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Option<Delivery>, AppError> {
        if !DeliveryStatus::COURIER_SETTABLE.contains(&status) {
            return Err(AppError::InvalidStatus(status.as_str().to_string()));
        }

        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(None);
        };

        if delivery.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "delivery is already {}",
                delivery.status.as_str()
            )));
        }
        if delivery.courier_id != Some(courier_id) {
            return Err(not_your_delivery());
        }
        if !delivery.can_move_to(status) {
            return Err(AppError::Conflict(format!(
                "delivery cannot move from {} to {} before it is accepted",
                delivery.status.as_str(),
                status.as_str()
            )));
        }

        delivery.status = status;
        if status == DeliveryStatus::Cancelled {
            delivery.courier_id = None;
        }
        delivery.updated_at = Utc::now();
        Ok(Some(delivery.clone()))
    }

    fn collect_sorted<F>(&self, keep: F) -> Vec<Delivery>
    where
        F: Fn(&Delivery) -> bool,
    {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        deliveries
    }
}

fn not_your_delivery() -> AppError {
    AppError::Forbidden("Delivery is not assigned to this driver".to_string())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::DeliveryStore;
    use crate::error::AppError;
    use crate::models::delivery::{AcceptanceState, DeliveryStatus, NewDelivery, ResponseAction};

    fn new_delivery(order: &str, courier: Uuid) -> NewDelivery {
        NewDelivery {
            order_id: order.to_string(),
            customer_id: "customer-1".to_string(),
            pickup_location: "Colombo".to_string(),
            dropoff_location: "Colombo".to_string(),
            courier_id: courier,
        }
    }

    #[test]
    fn create_starts_assigned_and_pending_acceptance() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert_eq!(delivery.acceptance, AcceptanceState::Pending);
        assert_eq!(delivery.courier_id, Some(courier));
        assert_eq!(store.find_by_order("o1").unwrap().id, delivery.id);
    }

    #[test]
    fn one_delivery_per_order() {
        let store = DeliveryStore::new();
        store.create(new_delivery("o1", Uuid::from_u128(1))).unwrap();

        let second = store.create(new_delivery("o1", Uuid::from_u128(2)));
        assert!(matches!(second, Err(AppError::Conflict(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn accept_keeps_courier_and_lifecycle() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();

        let accepted = store
            .set_acceptance(delivery.id, courier, ResponseAction::Accept)
            .unwrap();
        assert_eq!(accepted.acceptance, AcceptanceState::Accepted);
        assert_eq!(accepted.courier_id, Some(courier));
        assert_eq!(accepted.status, DeliveryStatus::Assigned);
    }

    #[test]
    fn decline_clears_courier_and_resets_lifecycle() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();

        let declined = store
            .set_acceptance(delivery.id, courier, ResponseAction::Decline)
            .unwrap();
        assert_eq!(declined.acceptance, AcceptanceState::Declined);
        assert_eq!(declined.courier_id, None);
        assert_eq!(declined.status, DeliveryStatus::Pending);
    }

    #[test]
    fn second_response_is_rejected() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();
        store
            .set_acceptance(delivery.id, courier, ResponseAction::Accept)
            .unwrap();

        let again = store.set_acceptance(delivery.id, courier, ResponseAction::Decline);
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[test]
    fn reassign_requires_unassigned_delivery() {
        let store = DeliveryStore::new();
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);
        let delivery = store.create(new_delivery("o1", first)).unwrap();

        assert!(matches!(
            store.reassign_courier(delivery.id, second),
            Err(AppError::Conflict(_))
        ));

        store
            .set_acceptance(delivery.id, first, ResponseAction::Decline)
            .unwrap();
        let reassigned = store.reassign_courier(delivery.id, second).unwrap();
        assert_eq!(reassigned.courier_id, Some(second));
        assert_eq!(reassigned.acceptance, AcceptanceState::Pending);
        assert_eq!(reassigned.status, DeliveryStatus::Assigned);
    }

    #[test]
    fn courier_queries_filter_by_state() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let waiting = store.create(new_delivery("o1", courier)).unwrap();
        let accepted = store.create(new_delivery("o2", courier)).unwrap();
        store
            .set_acceptance(accepted.id, courier, ResponseAction::Accept)
            .unwrap();
        store.create(new_delivery("o3", Uuid::from_u128(9))).unwrap();

        let pending = store.find_assigned_pending_for_courier(courier);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, waiting.id);

        assert_eq!(store.find_all_for_courier(courier).len(), 2);
    }

    #[test]
    fn answer_from_another_courier_is_forbidden() {
        let store = DeliveryStore::new();
        let holder = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", holder)).unwrap();

        let result = store.set_acceptance(delivery.id, Uuid::from_u128(2), ResponseAction::Accept);

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(
            store.find_by_id(delivery.id).unwrap().acceptance,
            AcceptanceState::Pending
        );
    }

    #[test]
    fn reuse_refreshes_route_and_customer() {
        let store = DeliveryStore::new();
        let first = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", first)).unwrap();

        let mut busy = new_delivery("o1", Uuid::from_u128(2));
        busy.pickup_location = "Kandy".to_string();
        assert!(matches!(
            store.reuse_unassigned(delivery.id, busy.clone()),
            Err(AppError::Conflict(_))
        ));

        store
            .set_acceptance(delivery.id, first, ResponseAction::Decline)
            .unwrap();
        busy.customer_id = "customer-2".to_string();
        let reused = store.reuse_unassigned(delivery.id, busy).unwrap();

        assert_eq!(reused.id, delivery.id);
        assert_eq!(reused.pickup_location, "Kandy");
        assert_eq!(reused.customer_id, "customer-2");
        assert_eq!(reused.courier_id, Some(Uuid::from_u128(2)));
        assert_eq!(reused.status, DeliveryStatus::Assigned);
    }

    #[test]
    fn settling_a_decline_keeps_a_newer_assignment() {
        let store = DeliveryStore::new();
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);
        let delivery = store.create(new_delivery("o1", first)).unwrap();
        store
            .set_acceptance(delivery.id, first, ResponseAction::Decline)
            .unwrap();
        store.reassign_courier(delivery.id, second).unwrap();

        let settled = store.settle_declined(delivery.id).unwrap();

        assert_eq!(settled.courier_id, Some(second));
        assert_eq!(settled.status, DeliveryStatus::Assigned);
        assert_eq!(settled.acceptance, AcceptanceState::Pending);
    }

    #[test]
    fn settling_a_decline_without_reassignment_waits_for_a_courier() {
        let store = DeliveryStore::new();
        let first = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", first)).unwrap();
        store
            .set_acceptance(delivery.id, first, ResponseAction::Decline)
            .unwrap();

        let settled = store.settle_declined(delivery.id).unwrap();

        assert_eq!(settled.courier_id, None);
        assert_eq!(settled.status, DeliveryStatus::Pending);
        assert_eq!(settled.acceptance, AcceptanceState::Pending);
        assert!(matches!(
            store.settle_declined(Uuid::from_u128(77)),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn lifecycle_status_is_whitelisted_and_terminal_states_stick() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();
        store
            .set_acceptance(delivery.id, courier, ResponseAction::Accept)
            .unwrap();

        assert!(matches!(
            store.set_lifecycle_status(delivery.id, courier, DeliveryStatus::Assigned),
            Err(AppError::InvalidStatus(_))
        ));
        assert_eq!(
            store.find_by_id(delivery.id).unwrap().status,
            DeliveryStatus::Assigned
        );

        let delivered = store
            .set_lifecycle_status(delivery.id, courier, DeliveryStatus::Delivered)
            .unwrap()
            .unwrap();
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert_eq!(delivered.courier_id, Some(courier));

        assert!(matches!(
            store.set_lifecycle_status(delivery.id, courier, DeliveryStatus::Cancelled),
            Err(AppError::Conflict(_))
        ));
        assert!(store
            .set_lifecycle_status(Uuid::from_u128(77), courier, DeliveryStatus::PickedUp)
            .unwrap()
            .is_none());
    }

    #[test]
    fn pickup_and_delivery_need_an_accepted_assignment() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();

        for status in [DeliveryStatus::PickedUp, DeliveryStatus::Delivered] {
            assert!(matches!(
                store.set_lifecycle_status(delivery.id, courier, status),
                Err(AppError::Conflict(_))
            ));
        }
        let unchanged = store.find_by_id(delivery.id).unwrap();
        assert_eq!(unchanged.status, DeliveryStatus::Assigned);
        assert!(unchanged.awaits_response());

        store
            .set_acceptance(delivery.id, courier, ResponseAction::Accept)
            .unwrap();
        let picked = store
            .set_lifecycle_status(delivery.id, courier, DeliveryStatus::PickedUp)
            .unwrap()
            .unwrap();
        assert_eq!(picked.status, DeliveryStatus::PickedUp);
    }

    #[test]
    fn lifecycle_change_by_another_courier_is_forbidden() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();
        store
            .set_acceptance(delivery.id, courier, ResponseAction::Accept)
            .unwrap();

        let result =
            store.set_lifecycle_status(delivery.id, Uuid::from_u128(2), DeliveryStatus::PickedUp);

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(
            store.find_by_id(delivery.id).unwrap().status,
            DeliveryStatus::Assigned
        );
    }

    #[test]
    fn cancelling_drops_the_courier_reference() {
        let store = DeliveryStore::new();
        let courier = Uuid::from_u128(1);
        let delivery = store.create(new_delivery("o1", courier)).unwrap();

        let cancelled = store
            .set_lifecycle_status(delivery.id, courier, DeliveryStatus::Cancelled)
            .unwrap()
            .unwrap();

        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
        assert_eq!(cancelled.courier_id, None);
        assert!(store.find_all_for_courier(courier).is_empty());
    }
}
