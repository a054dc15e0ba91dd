//! Bearer-token boundary (§6.1). Full token issuance, expiry and role
//! checks live in the external auth collaborator (§1); this extractor only
//! enforces that a token was presented, the minimal contract the sync
//! endpoint needs from that collaborator.

use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub struct Bearer(pub Option<String>);

impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        Ok(Bearer(token))
    }
}

impl Bearer {
    pub fn require_authorized(&self) -> Result<(), AppError> {
        match &self.0 {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(AppError::Unauthorized("missing bearer token".to_string())),
        }
    }
}
