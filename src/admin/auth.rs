use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::http::error::ApiError;
use crate::http::server::AppState;

/// Compare two tokens without leaking where they differ.
///
/// Both sides are hashed first so the comparison always covers 32 bytes,
/// whatever the token lengths.
pub fn token_matches(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token_matches(token, &state.config.admin.api_key));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("admin-secret-key", "admin-secret-key"));
        assert!(!token_matches("admin-secret-kez", "admin-secret-key"));
        assert!(!token_matches("admin", "admin-secret-key"));
        assert!(!token_matches("", "admin-secret-key"));
    }
}
