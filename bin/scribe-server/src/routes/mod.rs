//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection, optional
//!   bearer-token guard on mutating routes)
//! - Health / heartbeat route
//! - Task, export and WebSocket streaming routes under `/api`

mod export;
mod health;
mod stream;
mod tasks;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use tower::ServiceBuilder;

use crate::middleware::{auth, cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    // The streaming cap in the upload handler enforces the real limit; the
    // body limit only needs to sit above it to cover multipart framing.
    let body_limit = (state.config.max_upload_mb + 1) * 1024 * 1024;

    let api_router = Router::new()
        .merge(tasks::router())
        .merge(export::router())
        .merge(stream::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth_token,
        ));

    Router::new()
        .merge(health::router())
        .nest("/api", api_router)
        .layer(DefaultBodyLimit::max(body_limit))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

// ── Test plumbing ──────────────────────────────────────────────────────────────
