use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::gateway::{DeliveredNotice, GatewayError, Notifier};

const BRAND: &str = "HungerJet";

pub fn delivered_subject() -> String {
    format!("Your Order with {BRAND} has been Delivered!")
}

pub fn delivered_email_body(notice: &DeliveredNotice) -> String {
    format!(
        "Hello {name},\n\n\
         We are happy to inform you that your order with {BRAND} has been successfully \
         delivered to your address: {address}.\n\n\
         Thank you for choosing {BRAND}, and we look forward to serving you again soon!\n\n\
         Best regards,\n\
         {BRAND} Team\n",
        name = notice.customer_name,
        address = notice.address.one_line(),
    )
}

pub fn delivered_sms_body(notice: &DeliveredNotice) -> String {
    format!(
        "Hello, your order has been delivered to {}. Thank you for choosing {BRAND}!",
        notice.address.one_line()
    )
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    text: String,
}

/// Sends the delivered email through an HTTP mail relay and the SMS through
/// the SMS provider's REST API. Either channel is skipped when unconfigured.
pub struct HttpNotifier {
    client: Client,
    email_api_url: Option<Url>,
    email_from: String,
    sms_api_url: Url,
    sms_api_key: Option<String>,
}

impl HttpNotifier {
    pub fn from_config(client: Client, config: &Config) -> Result<Self, AppError> {
        let email_api_url = config
            .email_api_url
            .as_deref()
            .map(|raw| parse_url("EMAIL_API_URL", raw))
            .transpose()?;

        Ok(Self {
            client,
            email_api_url,
            email_from: config.email_from.clone(),
            sms_api_url: parse_url("SMS_API_URL", &config.sms_api_url)?,
            sms_api_key: config.sms_api_key.clone(),
        })
    }

    async fn send_email(&self, url: &Url, notice: &DeliveredNotice) -> Result<(), GatewayError> {
        let request = EmailRequest {
            from: &self.email_from,
            to: &notice.email,
            subject: delivered_subject(),
            text: delivered_email_body(notice),
        };

        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| GatewayError::Transport {
                service: "email relay",
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                service: "email relay",
                status: response.status().as_u16(),
            });
        }

        debug!(order_id = %notice.order_id, "delivered email sent");
        Ok(())
    }

    async fn send_sms(
        &self,
        api_key: &str,
        phone: &str,
        notice: &DeliveredNotice,
    ) -> Result<(), GatewayError> {
        let request = SmsRequest {
            to: phone,
            text: delivered_sms_body(notice),
        };

        let response = self
            .client
            .post(self.sms_api_url.clone())
            .header("X-API-VERSION", "V1")
            .header("Authorization", format!("Basic {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|err| GatewayError::Transport {
                service: "sms provider",
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                service: "sms provider",
                status: response.status().as_u16(),
            });
        }

        debug!(order_id = %notice.order_id, "delivered sms sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_delivered(&self, notice: &DeliveredNotice) -> Result<(), GatewayError> {
        let email = match &self.email_api_url {
            Some(url) => self.send_email(url, notice).await,
            None => {
                debug!("email relay not configured; skipping delivered email");
                Ok(())
            }
        };

        let sms = match (self.sms_api_key.as_deref(), notice.phone.as_deref()) {
            (Some(key), Some(phone)) => self.send_sms(key, phone, notice).await,
            _ => {
                debug!("sms not configured or no phone on file; skipping delivered sms");
                Ok(())
            }
        };

        // Both channels are attempted; the first failure is reported.
        if let Err(err) = &sms {
            if email.is_err() {
                warn!(error = %err, "delivered sms failed");
            }
        }
        email.and(sms)
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))
}
