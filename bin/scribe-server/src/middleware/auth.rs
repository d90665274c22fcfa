//! Optional bearer-token guard for mutating routes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Reject mutating requests that lack the configured bearer token.
///
/// Reads (GET/HEAD/OPTIONS, which includes the WebSocket upgrade) stay
/// open, and the guard is a pass-through when no token is configured.
pub async fn require_auth_token(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected_token) = &state.config.auth_token {
        let method = req.method();
        let mutating =
            method != Method::GET && method != Method::HEAD && method != Method::OPTIONS;
        if mutating {
            let provided = req
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            match provided {
                Some(token) if token == expected_token => {}
                _ => {
                    return (
                        StatusCode::UNAUTHORIZED,
                        axum::Json(serde_json::json!({ "error": "unauthorised" })),
                    )
                        .into_response();
                }
            }
        }
    }
    next.run(req).await
}
