//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use scribe_core::Dispatcher;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task runtime: registry, worker pool, progress fan-out.
    pub dispatcher: Arc<Dispatcher>,
}
