//! Server Configuration

use std::path::PathBuf;

/// Process-level settings read once at start-up
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Built storefront to serve at `/`, when present
    pub static_dir: Option<PathBuf>,

    /// Public origin used for checkout back URLs when the request has none
    pub public_base_url: Option<String>,

    /// Chat sessions idle longer than this are dropped
    pub session_idle_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            static_dir: None,
            public_base_url: None,
            session_idle_minutes: 60,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env("BIND_ADDR").unwrap_or(defaults.bind_addr),
            static_dir: env("STATIC_DIR")
                .map(PathBuf::from)
                .or_else(|| Some(PathBuf::from("static")))
                .filter(|dir| dir.is_dir()),
            public_base_url: env("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            session_idle_minutes: env("CHAT_SESSION_IDLE_MINUTES")
                .and_then(|v| v.parse().ok())
                .filter(|m| *m > 0)
                .unwrap_or(defaults.session_idle_minutes),
        }
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load `.env.local` then `.env`; variables already set win
pub fn load_dotenv() {
    for file in [".env.local", ".env"] {
        match dotenvy::from_filename(file) {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(file, error = %e, "Failed to read environment file"),
        }
    }
}
