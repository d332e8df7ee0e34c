use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierPatch, NewCourier};

/// Courier profiles keyed by id, with a unique account index.
///
/// Every courier record is its own lock unit: availability changes run under
/// the record's entry lock so a reservation is a conditional update rather
/// than a read followed by a write.
#[derive(Default)]
pub struct CourierRegistry {
    couriers: DashMap<Uuid, Courier>,
    by_account: DashMap<String, Uuid>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.couriers
            .iter()
            .filter(|entry| entry.value().available)
            .count()
    }

    pub fn get(&self, id: Uuid) -> Option<Courier> {
        self.couriers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn find_by_account(&self, account_id: &str) -> Option<Courier> {
        let id = self.by_account.get(account_id).map(|entry| *entry.value())?;
        self.get(id)
    }

    /// Creates an available courier for `account_id`. Callers are expected to
    /// check `find_by_account` first; a concurrent duplicate still loses here.
    pub fn register(&self, new: NewCourier) -> Result<Courier, AppError> {
        match self.by_account.entry(new.account_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(
                "Driver already registered".to_string(),
            )),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let courier = Courier {
                    id: Uuid::new_v4(),
                    account_id: new.account_id,
                    pickup_location: new.pickup_location,
                    delivery_locations: new.delivery_locations,
                    vehicle_reg_number: new.vehicle_reg_number,
                    mobile_number: new.mobile_number,
                    profile_image: new.profile_image,
                    available: true,
                    created_at: now,
                    updated_at: now,
                };
                self.couriers.insert(courier.id, courier.clone());
                slot.insert(courier.id);
                Ok(courier)
            }
        }
    }

    pub fn update_profile(&self, account_id: &str, patch: CourierPatch) -> Option<Courier> {
        let id = self.by_account.get(account_id).map(|entry| *entry.value())?;
        let mut courier = self.couriers.get_mut(&id)?;
        patch.apply(&mut courier);
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }

    /// First available courier serving the route, in registration order.
    pub fn find_available_match(&self, pickup: &str, dropoff: &str) -> Option<Courier> {
        self.candidates(pickup, dropoff, None)
            .into_iter()
            .find_map(|(_, id)| self.get(id).filter(|courier| courier.available))
    }

    /// Finds a matching courier and flips it to unavailable in one step.
    pub fn reserve_match(&self, pickup: &str, dropoff: &str) -> Option<Courier> {
        self.reserve_first(self.candidates(pickup, dropoff, None))
    }

    /// Like `reserve_match`, never handing the delivery back to `excluded`.
    pub fn reserve_match_excluding(
        &self,
        pickup: &str,
        dropoff: &str,
        excluded: Uuid,
    ) -> Option<Courier> {
        self.reserve_first(self.candidates(pickup, dropoff, Some(excluded)))
    }

    /// Sets availability from true to false. Returns the reserved courier, or
    /// `None` when it is unknown or already taken.
    pub fn try_reserve(&self, id: Uuid) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(&id)?;
        if !courier.available {
            return None;
        }
        courier.available = false;
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }

    /// Idempotent flag set. `None` only when the courier does not exist.
    pub fn set_availability(&self, id: Uuid, available: bool) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(&id)?;
        if courier.available != available {
            courier.available = available;
            courier.updated_at = Utc::now();
        }
        Some(courier.clone())
    }

    fn reserve_first(&self, candidates: Vec<(DateTime<Utc>, Uuid)>) -> Option<Courier> {
        candidates
            .into_iter()
            .find_map(|(_, id)| self.try_reserve(id))
    }

    // Collected before any entry is locked for writing: holding an iterator
    // guard while calling get_mut on the same shard deadlocks.
    fn candidates(
        &self,
        pickup: &str,
        dropoff: &str,
        excluded: Option<Uuid>,
    ) -> Vec<(DateTime<Utc>, Uuid)> {
        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = self
            .couriers
            .iter()
            .filter_map(|entry| {
                let courier = entry.value();
                let eligible = courier.available
                    && Some(courier.id) != excluded
                    && courier.serves(pickup, dropoff);

                if eligible {
                    Some((courier.created_at, courier.id))
                } else {
                    None
                }
            })
            .collect();

        candidates.sort();
        candidates
    }
}
