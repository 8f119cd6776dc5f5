//! Gateway client error types.

use thiserror::Error;

/// Errors raised by [`GatewayClient`](crate::GatewayClient) calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway request failed with status {status}")]
    Status { status: u16 },

    #[error("gateway response decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Timeouts and transport failures may succeed on a later attempt; an
    /// HTTP status or an undecodable body will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;
