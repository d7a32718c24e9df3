//! Bearer-token validation for the extension API.
//!
//! Clients authenticate with an HS256 JWT whose `sub` claim carries the
//! identity-provider user id. Token issuance lives in the dashboard app;
//! this server only validates.

use actix_web::HttpRequest;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub exp: i64,    // Expiration time
    pub iat: i64,    // Issued at
}

/// Extracts and validates the bearer token, returning the authenticated
/// user id. Any missing, malformed, or expired token is an
/// `Unauthenticated` failure; the handler never sees a partial identity.
pub fn authenticated_user_id(req: &HttpRequest, auth: &AuthConfig) -> Result<String, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthenticated)?;

    let claims = decode_token(token, &auth.jwt_secret)?;
    if claims.sub.is_empty() {
        return Err(AppError::Unauthenticated);
    }
    Ok(claims.sub)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthenticated)
}

/// Issues a token for the given user id. Used by tests and operational
/// tooling; the production issuer is the dashboard app.
pub fn issue_token(user_id: &str, secret: &str, expiry_hours: i64) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalError(format!("Token generation failed: {}", e)))
}
