use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Guards the caller-facing JSON routes with the configured API key.
///
/// Accepts `Authorization: Bearer <key>` or the bare key. A deployment with
/// no key configured leaves the routes open.
pub async fn require_api_key<B>(
    State(state): State<AppState>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if auth.strip_prefix("Bearer ").unwrap_or(auth) == expected => {
            Ok(next.run(req).await)
        }
        _ => {
            tracing::warn!(
                target: "security",
                uri = %req.uri().path(),
                "Rejected request with missing or invalid API key"
            );
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
