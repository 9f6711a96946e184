//! API configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vfetch_queue::QueueConfig;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Requests allowed per client within one rate-limit window
    pub rate_limit_requests: u64,
    /// Fixed rate-limit window
    pub rate_limit_window: Duration,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Base directory artifact paths are relative to
    pub base_dir: PathBuf,
    /// Directory artifacts are served from
    pub cache_dir: PathBuf,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Redis stream and job store settings
    pub queue: QueueConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_requests: 600,
            rate_limit_window: Duration::from_secs(3600),
            max_body_size: 64 * 1024, // 64KB, a download request is one URL
            environment: "development".to_string(),
            cache_dir: base_dir.join("cache"),
            base_dir,
            metrics_enabled: true,
            queue: QueueConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load config from environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_dir = std::env::var("APP_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_dir);
        let cache_dir = std::env::var("CACHE_DIR")
            .map(|dir| join_relative(&base_dir, &dir))
            .unwrap_or_else(|_| base_dir.join("cache"));

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_requests: std::env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.rate_limit_requests),
            rate_limit_window: std::env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            base_dir,
            cache_dir,
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            queue: QueueConfig::from_env(),
        }
    }

    /// Check if running in production.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn join_relative(base_dir: &Path, dir: &str) -> PathBuf {
    let dir = Path::new(dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base_dir.join(dir)
    }
}
