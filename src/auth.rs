use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::env;

/// Env var holding the runtime's API key. Unset means no auth.
pub const API_KEY_ENV: &str = "FLOWBOARD_API_KEY";

/// Require `Authorization: Bearer <key>` when `FLOWBOARD_API_KEY` is set.
pub async fn api_key_auth(req: Request<Body>, next: Next) -> Response {
    let expected = match env::var(API_KEY_ENV) {
        Ok(v) if !v.is_empty() => v,
        _ => return next.run(req).await,
    };

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if is_authorized(auth_header, &expected) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "ok": false,
                "error": "Unauthorized"
            })),
        )
            .into_response()
    }
}

pub fn is_authorized(header: Option<&str>, expected: &str) -> bool {
    matches!(header.and_then(|h| h.strip_prefix("Bearer ")), Some(token) if token == expected)
}
