//! Router error types.
//!
//! Local-path failures never appear here: they are absorbed into a cloud
//! fallback. Only the final required cloud call or caller cancellation can
//! fail a routed request.

use thiserror::Error;

/// Errors from a cloud completion provider.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("cloud request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience alias for cloud provider results.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors surfaced by [`RoutingEngine::route`](crate::RoutingEngine::route).
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("cloud completion failed: {0}")]
    Cloud(#[from] CloudError),

    #[error("request cancelled")]
    Cancelled,
}

/// Convenience alias for routing results.
pub type RouteResult<T> = Result<T, RouteError>;
