//! Axum HTTP API for vfetch.
//!
//! This crate provides:
//! - Download submission and job status polling
//! - Serving of cached artifacts
//! - Per-client fixed-window rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
