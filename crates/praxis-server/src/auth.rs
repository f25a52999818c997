use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use praxis_core::types::{Principal, Role};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::{AppState, Stores};

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Payload of the HS256 bearer token. `sub` is the caller's user id in the
/// institutional directory; `roles` drives the capability checks in the
/// engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub roles: Vec<Role>,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal::new(self.sub, self.roles.clone())
    }
}

// ---------------------------------------------------------------------------
// JwtKeys
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    /// Secret length is validated by `Config`; this only derives the keys.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn mint(
        &self,
        subject_id: i64,
        roles: &[Role],
        ttl_seconds: u64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: subject_id,
            roles: roles.to_vec(),
            iat: now,
            exp: now + ttl_seconds,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

// ---------------------------------------------------------------------------
// Auth extractor
// ---------------------------------------------------------------------------

/// Extracts the authenticated [`Principal`] from the `Authorization: Bearer`
/// header. Handlers that take this reject unauthenticated requests with 401;
/// the health endpoint simply does not take it.
pub struct Auth(pub Principal);

impl<S: Stores> FromRequestParts<AppState<S>> for Auth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("authorization header is not a bearer token"))?;
        let claims = state
            .auth
            .verify(token)
            .map_err(|_| AppError::unauthorized("invalid or expired bearer token"))?;
        Ok(Auth(claims.principal()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
