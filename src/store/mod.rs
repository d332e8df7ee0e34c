pub mod couriers;
pub mod deliveries;

pub use couriers::CourierRegistry;
pub use deliveries::DeliveryStore;
