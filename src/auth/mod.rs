use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// Roles issued by the identity service. User management itself lives
/// outside this crate; we only interpret the claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Customer,
    DeliveryPerson,
    RestaurantOwner,
    SubAdmin,
    SuperAdmin,
}

/// JWT claims carried by the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated caller, extracted from the Authorization header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::SuperAdmin | Role::SubAdmin)
    }

    /// Whether the caller may set order statuses outside the customer-facing
    /// transition table.
    pub fn can_force_transition(&self) -> bool {
        matches!(
            self.role,
            Role::SuperAdmin | Role::SubAdmin | Role::RestaurantOwner
        )
    }

    pub fn can_manage_orders(&self) -> bool {
        self.is_admin() || self.role == Role::RestaurantOwner
    }
}

/// Issue a token for the given user. Used by the auth collaborator in
/// production; exposed here for test setup.
pub fn issue_token(secret: &str, user_id: Uuid, role: Role) -> Result<String, ServiceError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(24)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {e}")))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("Invalid token: {e}")))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing Authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("Expected a bearer token".into()))?;

        let claims = verify_token(&state.config.jwt_secret, token)?;
        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}
