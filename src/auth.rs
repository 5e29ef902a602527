use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Claims carried by the caller's bearer token. Issuance happens in the auth
/// service; this backend only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct RoomClaims<'a> {
    room_id: &'a str,
    course_id: &'a str,
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Tokens from the auth service do not always carry exp.
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
}

/// Token for the bearer header of outbound provisioning calls, signed over
/// the request payload.
pub fn sign_payload<T: Serialize>(payload: &T, secret: &str) -> Result<String, AppError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        payload,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::InternalServerError)
}

/// Room token handed to the videochat service when the stored join link does
/// not already carry one.
pub fn sign_room_token(room_id: &str, course_id: &str, secret: &str) -> Result<String, AppError> {
    let claims = RoomClaims { room_id, course_id };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::InternalServerError)
}

/// Pulls the token out of the `Authorization: Bearer ..` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}
