//! Bearer-token identity.
//!
//! Tokens are issued by the user service; this service only verifies them and
//! reads the `{id, role}` pair. Verification sits behind [`Authenticator`] so
//! the HTTP layer does not care how a token is checked.

use std::collections::HashSet;
use std::fmt;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Customer,
    RestaurantAdmin,
    DeliveryPersonnel,
    AppAdmin,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Customer => "customer",
            Role::RestaurantAdmin => "restaurantAdmin",
            Role::DeliveryPersonnel => "deliveryPersonnel",
            Role::AppAdmin => "appAdmin",
            Role::Other(raw) => raw,
        }
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        match raw {
            "customer" => Role::Customer,
            "restaurantAdmin" => Role::RestaurantAdmin,
            "deliveryPersonnel" => Role::DeliveryPersonnel,
            "appAdmin" => Role::AppAdmin,
            other => Role::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub role: Role,
}

impl Identity {
    pub fn has_role(&self, required: &Role) -> bool {
        &self.role == required
    }
}

/// Claims carried by user-service tokens. `exp` is enforced when present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            role: Role::from(claims.role.as_str()),
            id: claims.id,
        }
    }
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AppError>;
}

/// HS256 verification against the secret shared with the user service.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            tracing::debug!(error = %err, "token rejected");
            AppError::Forbidden("Forbidden: Invalid token".to_string())
        })?;

        if data.claims.id.trim().is_empty() {
            return Err(AppError::Forbidden("Forbidden: Invalid token".to_string()));
        }

        Ok(Identity::from(data.claims))
    }
}

/// Signs claims the way the user service does.
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, AppError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| AppError::Internal(format!("failed to sign token: {err}")))
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
