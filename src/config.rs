use std::env;
use std::path::PathBuf;

use crate::error::AppError;

pub const DEFAULT_JWT_SECRET: &str = "supersecret";

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub order_service_url: String,
    pub restaurant_service_url: String,
    pub user_service_url: String,
    pub gateway_timeout_ms: u64,
    pub email_api_url: Option<String>,
    pub email_from: String,
    pub sms_api_url: String,
    pub sms_api_key: Option<String>,
    pub cors_origin: String,
    pub upload_dir: PathBuf,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_log_format(env::var("LOG_FORMAT").ok().as_deref())?,
            jwt_secret: string_or_default("JWT_SECRET", DEFAULT_JWT_SECRET),
            order_service_url: string_or_default(
                "ORDER_SERVICE_URL",
                "http://localhost:3002/api/orders",
            ),
            restaurant_service_url: string_or_default(
                "RESTAURANT_SERVICE_URL",
                "http://localhost:3001/api/restaurants",
            ),
            user_service_url: string_or_default("USER_SERVICE_URL", "http://localhost:3003/api/auth"),
            gateway_timeout_ms: parse_or_default("GATEWAY_TIMEOUT_MS", 5000)?,
            email_api_url: optional("EMAIL_API_URL"),
            email_from: string_or_default("EMAIL_FROM", "HungerJet <no-reply@hungerjet.local>"),
            sms_api_url: string_or_default("SMS_API_URL", "https://api.textit.biz/"),
            sms_api_key: optional("SMS_API_KEY"),
            cors_origin: string_or_default("CORS_ORIGIN", "http://localhost:5173"),
            upload_dir: PathBuf::from(string_or_default("UPLOAD_DIR", "uploads")),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
        })
    }

    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))
}

fn string_or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_log_format(raw: Option<&str>) -> Result<LogFormat, AppError> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("compact") => Ok(LogFormat::Compact),
        Some("json") => Ok(LogFormat::Json),
        Some(other) => Err(AppError::Internal(format!("invalid LOG_FORMAT: {other}"))),
    }
}
