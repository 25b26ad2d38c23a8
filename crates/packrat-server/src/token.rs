//! Per-session token enforcement for every endpoint.
//!
//! POST requests carry the token in the `X-DHT-Token` header; GET requests
//! carry it in the `token` query parameter. A mismatch is rejected before
//! the handler runs, so the database is never touched.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::AppState;
use crate::error::ApiError;

pub const TOKEN_HEADER: &str = "x-dht-token";

pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let presented = if req.method() == Method::GET {
        req.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        })
    } else {
        req.headers()
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    match presented {
        Some(token) if tokens_match(&token, &state.config.token) => next.run(req).await,
        _ => ApiError::InvalidToken.into_response(),
    }
}

// Constant-time comparison to prevent timing attacks on the session token.
fn tokens_match(presented: &str, expected: &str) -> bool {
    use subtle::ConstantTimeEq;
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_only() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc124", "abc123"));
        assert!(!tokens_match("abc12", "abc123"));
        assert!(!tokens_match("", "abc123"));
    }
}
