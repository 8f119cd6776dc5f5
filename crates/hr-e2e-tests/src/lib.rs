//! End-to-end tests for the hybrid router.
//!
//! Everything lives under `tests/`: each scenario drives a real
//! `RoutingEngine` over HTTP against wiremock stand-ins for the local
//! gateway and the OpenAI-compatible cloud endpoint.
