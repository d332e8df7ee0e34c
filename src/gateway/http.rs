use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::AppError;
use crate::gateway::notify::HttpNotifier;
use crate::gateway::{
    GatewayError, Gateways, OrderDetail, OrderGateway, RestaurantDetail, RestaurantGateway,
    UserDetail, UserGateway,
};

/// `GET {base}/{id}` JSON lookups against one collaborating service.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
    service: &'static str,
}

impl RestClient {
    pub fn new(client: Client, base_url: &str, service: &'static str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Internal(format!("invalid {service} url {base_url}: {err}")))?;

        if base_url.cannot_be_a_base() {
            return Err(AppError::Internal(format!(
                "{service} url {base_url} cannot be used as a base"
            )));
        }

        Ok(Self {
            client,
            base_url,
            service,
        })
    }

    pub fn resource_url(&self, id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(id);
        }
        url
    }

    pub async fn get_json<T: DeserializeOwned>(&self, id: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(self.resource_url(id))
            .send()
            .await
            .map_err(|err| GatewayError::Transport {
                service: self.service,
                message: err.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(GatewayError::NotFound(format!("{} {id}", self.service)));
            }
            status => {
                return Err(GatewayError::Status {
                    service: self.service,
                    status: status.as_u16(),
                });
            }
        }

        response.json::<T>().await.map_err(|err| GatewayError::Decode {
            service: self.service,
            message: err.to_string(),
        })
    }
}

pub struct HttpOrderGateway {
    rest: RestClient,
}

impl HttpOrderGateway {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn fetch_order(&self, order_id: &str) -> Result<OrderDetail, GatewayError> {
        self.rest.get_json(order_id).await
    }
}

pub struct HttpRestaurantGateway {
    rest: RestClient,
}

impl HttpRestaurantGateway {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl RestaurantGateway for HttpRestaurantGateway {
    async fn fetch_restaurant(
        &self,
        restaurant_id: &str,
    ) -> Result<RestaurantDetail, GatewayError> {
        self.rest.get_json(restaurant_id).await
    }
}

pub struct HttpUserGateway {
    rest: RestClient,
}

impl HttpUserGateway {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl UserGateway for HttpUserGateway {
    async fn fetch_user(&self, user_id: &str) -> Result<UserDetail, GatewayError> {
        self.rest.get_json(user_id).await
    }
}

pub fn build_client(timeout_ms: u64) -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))
}

/// Wires every collaborator to its HTTP implementation.
pub fn http_gateways(config: &Config) -> Result<Gateways, AppError> {
    let client = build_client(config.gateway_timeout_ms)?;

    let orders = RestClient::new(client.clone(), &config.order_service_url, "order service")?;
    let restaurants = RestClient::new(
        client.clone(),
        &config.restaurant_service_url,
        "restaurant service",
    )?;
    let users = RestClient::new(client.clone(), &config.user_service_url, "user service")?;
    let notifier = HttpNotifier::from_config(client, config)?;

    Ok(Gateways {
        orders: Arc::new(HttpOrderGateway::new(orders)),
        restaurants: Arc::new(HttpRestaurantGateway::new(restaurants)),
        users: Arc::new(HttpUserGateway::new(users)),
        notifier: Arc::new(notifier),
    })
}
