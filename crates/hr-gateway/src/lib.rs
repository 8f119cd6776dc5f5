//! Local inference gateway client.
//!
//! Sends a bounded conversation window plus the request's tools to the
//! co-located small-model gateway (`POST /infer`) and normalizes whatever
//! comes back into a [`LocalInferenceResult`](hr_protocol::LocalInferenceResult).
//! Also exposes the gateway's `/health` check.

pub mod client;
pub mod config;
pub mod error;
pub mod response;
pub mod window;

pub use client::{GatewayClient, InferParams};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
