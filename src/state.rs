use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::gateway::Gateways;
use crate::models::tracking::LocationUpdate;
use crate::observability::metrics::Metrics;
use crate::store::{CourierRegistry, DeliveryStore};

#[derive(Debug, Clone)]
pub struct StateOptions {
    pub event_buffer_size: usize,
    pub upload_dir: PathBuf,
    pub cors_origin: String,
}

impl StateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            event_buffer_size: config.event_buffer_size,
            upload_dir: config.upload_dir.clone(),
            cors_origin: config.cors_origin.clone(),
        }
    }
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            upload_dir: PathBuf::from("uploads"),
            cors_origin: "http://localhost:5173".to_string(),
        }
    }
}

pub struct AppState {
    pub couriers: CourierRegistry,
    pub deliveries: DeliveryStore,
    pub gateways: Gateways,
    pub authenticator: Arc<dyn Authenticator>,
    pub tracking_tx: broadcast::Sender<LocationUpdate>,
    pub metrics: Metrics,
    pub options: StateOptions,
}

impl AppState {
    pub fn new(
        gateways: Gateways,
        authenticator: Arc<dyn Authenticator>,
        options: StateOptions,
    ) -> Self {
        let (tracking_tx, _unused_rx) = broadcast::channel(options.event_buffer_size.max(1));

        Self {
            couriers: CourierRegistry::new(),
            deliveries: DeliveryStore::new(),
            gateways,
            authenticator,
            tracking_tx,
            metrics: Metrics::new(),
            options,
        }
    }
}
