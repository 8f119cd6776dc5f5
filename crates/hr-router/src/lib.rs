//! Hybrid inference router (library crate).
//!
//! Routes OpenAI-style tool-calling requests to a local small-model gateway
//! first, validates what comes back, and falls back to a cloud provider
//! when the local answer can't be trusted. Every request yields a
//! [`RoutingDecision`](hr_protocol::RoutingDecision) describing the path taken.

pub mod cloud;
pub mod config;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod policy;
pub mod validation;

pub use cloud::{CloudConfig, CloudProvider, OpenAiCompatProvider};
pub use config::RouterConfig;
pub use engine::{RoutedCompletion, RoutingEngine, classify_gateway_error};
pub use error::{CloudError, CloudResult, RouteError, RouteResult};
pub use policy::Policy;
pub use validation::{ValidationOutcome, validate};
