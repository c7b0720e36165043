//! Runtime configuration: defaults with environment overrides.

use crate::clock::DEFAULT_MAX_CATCH_UP_SECS;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// HTTP collaborator settings (ledger and task directory share them)
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// Sent in the X-App-Version header for debugging version skew
    pub app_version: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,
    /// Directory holding worktimer.db; `None` keeps state in memory only
    pub data_dir: Option<PathBuf>,
    pub access_token: Option<String>,
    /// Clock driver period
    pub tick_interval_ms: u64,
    /// Bursts longer than this are clamped to a single tick
    pub max_catch_up_secs: u64,
    /// Extra snapshot cadence on top of per-mutation writes
    pub periodic_save_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            data_dir: None,
            access_token: None,
            tick_interval_ms: 1000,
            max_catch_up_secs: DEFAULT_MAX_CATCH_UP_SECS,
            periodic_save_secs: 30,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("[CONFIG] Ignoring invalid {}={:?}, using default", key, raw);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let http = HttpConfig {
            api_base_url: std::env::var("WORKTIMER_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.http.api_base_url),
            http_timeout_secs: parse_env(
                "WORKTIMER_HTTP_TIMEOUT_SECS",
                defaults.http.http_timeout_secs,
            ),
            app_version: defaults.http.app_version,
        };
        Self {
            http,
            data_dir: std::env::var("WORKTIMER_DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            access_token: std::env::var("WORKTIMER_ACCESS_TOKEN").ok(),
            tick_interval_ms: parse_env("WORKTIMER_TICK_MS", defaults.tick_interval_ms).max(10),
            max_catch_up_secs: parse_env(
                "WORKTIMER_MAX_CATCH_UP_SECS",
                defaults.max_catch_up_secs,
            ),
            periodic_save_secs: defaults.periodic_save_secs,
        }
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("worktimer.db"))
    }
}
