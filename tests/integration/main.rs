//! End-to-end coverage of the API client against a mock HTTP server.

mod client_pipeline;
mod resilience;
