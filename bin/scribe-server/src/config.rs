//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for scribe-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory uploaded files are stored under (default: a `scribe-uploads`
    /// directory inside the system temp dir). Created at startup.
    pub upload_dir: String,

    /// Upload size cap in megabytes, enforced while streaming the body.
    pub max_upload_mb: usize,

    /// Transcription window length in seconds.
    pub window_secs: u64,

    /// Tasks transcribing at once; the dispatcher clamps this to 1..=2.
    pub concurrency: usize,

    /// Language hint for the recognition engine; unset means auto-detect.
    pub language: Option<String>,

    /// Optional bearer token. When set, mutating routes (POST/DELETE)
    /// require `Authorization: Bearer <token>`; reads stay open.
    pub auth_token: Option<String>,

    /// Comma-separated CORS origin allow-list; unset means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Recognition engine: `"scripted"` (placeholder transcripts) or
    /// `"whisper"` (requires a build with the `whisper` feature).
    pub engine: String,

    /// Path to the whisper model file; required when `engine` is `"whisper"`.
    pub model_path: String,

    /// Inference thread count for the whisper engine; unset lets the
    /// engine pick.
    pub threads: Option<usize>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let default_upload_dir = std::env::temp_dir().join("scribe-uploads");
        Self {
            bind_address: env_or("SCRIBE_BIND", "0.0.0.0:8000"),
            log_level: env_or("SCRIBE_LOG", "info"),
            log_json: std::env::var("SCRIBE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            upload_dir: env_or("SCRIBE_UPLOAD_DIR", &default_upload_dir.to_string_lossy()),
            max_upload_mb: parse_env("SCRIBE_MAX_UPLOAD_MB", 100),
            window_secs: parse_env("SCRIBE_WINDOW_SECS", 30),
            concurrency: parse_env("SCRIBE_CONCURRENCY", 2),
            language: env_opt("SCRIBE_LANGUAGE"),
            auth_token: env_opt("SCRIBE_AUTH_TOKEN"),
            cors_allowed_origins: env_opt("SCRIBE_CORS_ORIGINS"),
            engine: env_or("SCRIBE_ENGINE", "scripted"),
            model_path: env_or("SCRIBE_MODEL_PATH", ""),
            threads: std::env::var("SCRIBE_THREADS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
