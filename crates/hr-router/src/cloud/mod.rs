//! Cloud completion providers.
//!
//! The router treats the cloud backend as an opaque collaborator: it sends
//! the caller's request (with temperature and, for repairs, the system
//! instruction overridden) and only inspects the number of tool calls that
//! come back.

pub mod openai_compat;

use async_trait::async_trait;
use hr_protocol::{ChatCompletion, ChatRequest};

use crate::error::CloudResult;

pub use openai_compat::{CloudConfig, OpenAiCompatProvider};

/// A higher-capability completion backend.
///
/// Cancellation is by drop: the router races each call against the
/// caller's cancellation token and drops the future when it fires.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Execute one chat completion.
    async fn complete(&self, request: &ChatRequest) -> CloudResult<ChatCompletion>;
}
