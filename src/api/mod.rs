//! HTTP API Module
//!
//! Read-only views of the peer store for dashboards, plus health and
//! metrics endpoints for the monitor itself.

mod routes;
mod metrics;

pub use routes::run_api_server;
pub use metrics::Metrics;
