//! In-process collaborators backed by maps, used by the test suites.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};

use crate::gateway::{
    DeliveredNotice, GatewayError, Notifier, OrderDetail, OrderGateway, RestaurantDetail,
    RestaurantGateway, UserDetail, UserGateway,
};

#[derive(Default)]
pub struct InMemoryOrders {
    orders: DashMap<String, OrderDetail>,
    unreachable: AtomicBool,
    held: Mutex<Option<oneshot::Receiver<()>>>,
    parked: Notify,
}

impl InMemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order_id: &str, order: OrderDetail) {
        self.orders.insert(order_id.to_string(), order);
    }

    /// Makes every lookup fail as if the order service were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes the next lookup wait until the returned sender fires or drops.
    pub fn hold_next_lookup(&self) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel();
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(held);
        release
    }

    /// Resolves once a held lookup is waiting.
    pub async fn lookup_parked(&self) {
        self.parked.notified().await;
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrders {
    async fn fetch_order(&self, order_id: &str) -> Result<OrderDetail, GatewayError> {
        let held = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(held) = held {
            self.parked.notify_one();
            let _ = held.await;
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport {
                service: "order service",
                message: "connection refused".to_string(),
            });
        }

        self.orders
            .get(order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatewayError::NotFound(format!("order service {order_id}")))
    }
}

#[derive(Default)]
pub struct InMemoryRestaurants {
    restaurants: DashMap<String, RestaurantDetail>,
}

impl InMemoryRestaurants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, restaurant_id: &str, restaurant: RestaurantDetail) {
        self.restaurants.insert(restaurant_id.to_string(), restaurant);
    }
}

#[async_trait]
impl RestaurantGateway for InMemoryRestaurants {
    async fn fetch_restaurant(
        &self,
        restaurant_id: &str,
    ) -> Result<RestaurantDetail, GatewayError> {
        self.restaurants
            .get(restaurant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatewayError::NotFound(format!("restaurant service {restaurant_id}")))
    }
}

#[derive(Default)]
pub struct InMemoryUsers {
    users: DashMap<String, UserDetail>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, user: UserDetail) {
        self.users.insert(user_id.to_string(), user);
    }
}

#[async_trait]
impl UserGateway for InMemoryUsers {
    async fn fetch_user(&self, user_id: &str) -> Result<UserDetail, GatewayError> {
        self.users
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatewayError::NotFound(format!("user service {user_id}")))
    }
}

/// Counts every dispatch attempt and keeps the notices it was handed.
#[derive(Default)]
pub struct RecordingNotifier {
    attempts: AtomicUsize,
    sent: Mutex<Vec<DeliveredNotice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<DeliveredNotice> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_delivered(&self, notice: &DeliveredNotice) -> Result<(), GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                service: "email relay",
                status: 502,
            });
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
        Ok(())
    }
}
