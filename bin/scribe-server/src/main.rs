//! scribe-server entry point.
//!
//! Startup order: configuration, logging, upload storage, the recognition
//! engine and decoder, the dispatcher, then the HTTP listener. The process
//! runs until SIGINT or SIGTERM and shuts the listener down gracefully.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scribe_core::{
    AudioDecoder, Dispatcher, FfmpegDecoder, RecognitionEngine, ScriptedEngine, WorkerSettings,
};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ──────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Logging ────────────────────────────────────────────────────────────
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        cfg.log_level.parse().unwrap_or_else(|e| {
            eprintln!(
                "WARN: SCRIBE_LOG='{}' is not a valid tracing filter ({e}); falling back to 'info'",
                cfg.log_level
            );
            EnvFilter::new("info")
        })
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    info!(version = env!("CARGO_PKG_VERSION"), "scribe-server starting");

    // ── 3. Upload storage ─────────────────────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.upload_dir)
        .await
        .with_context(|| format!("failed to create upload directory {}", cfg.upload_dir))?;
    info!(upload_dir = %cfg.upload_dir, "upload directory ready");

    // ── 4. Recognition engine and decoder ─────────────────────────────────────
    info!(
        engine = %cfg.engine,
        model_path = %cfg.model_path,
        threads = ?cfg.threads,
        "initialising recognition engine"
    );
    let engine = build_engine(&cfg)?;
    let decoder: Arc<dyn AudioDecoder> = Arc::new(FfmpegDecoder::new());

    // ── 5. Dispatcher ─────────────────────────────────────────────────────────
    let settings = WorkerSettings {
        window_ms: cfg.window_secs * 1000,
        language: cfg.language.clone(),
        concurrency: cfg.concurrency,
        retries: scribe_core::CHUNK_RETRIES,
    };
    let dispatcher = Arc::new(Dispatcher::new(engine, decoder, settings));
    info!(
        concurrency = dispatcher.settings().concurrency,
        window_secs = cfg.window_secs,
        "dispatcher ready"
    );

    // ── 6. Shared state ───────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        dispatcher,
    });

    // ── 7. HTTP server ────────────────────────────────────────────────────────
    let app = routes::build(state);
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_address))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("scribe-server stopped");
    Ok(())
}

fn build_engine(cfg: &Config) -> anyhow::Result<Arc<dyn RecognitionEngine>> {
    match cfg.engine.as_str() {
        "scripted" => {
            warn!(
                "using the scripted engine; transcripts are placeholders \
                 (set SCRIBE_ENGINE=whisper for real recognition)"
            );
            Ok(Arc::new(ScriptedEngine::new()))
        }
        #[cfg(feature = "whisper")]
        "whisper" => {
            if cfg.model_path.is_empty() {
                anyhow::bail!("SCRIBE_MODEL_PATH must be set when SCRIBE_ENGINE=whisper");
            }
            let engine = scribe_core::WhisperEngine::load(
                std::path::Path::new(&cfg.model_path),
                cfg.threads,
            )?;
            Ok(Arc::new(engine))
        }
        #[cfg(not(feature = "whisper"))]
        "whisper" => {
            anyhow::bail!(
                "this build does not include the whisper engine; rebuild with --features whisper"
            )
        }
        other => anyhow::bail!(
            "SCRIBE_ENGINE='{other}' is not recognised (expected 'scripted' or 'whisper')"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received; starting graceful shutdown");
}
