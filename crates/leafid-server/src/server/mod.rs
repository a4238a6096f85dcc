//! Server components.
//!
//! - [`config`] - CLI/environment configuration.
//! - [`store`] - store selection and the shared dispenser.
//! - [`service`] - gRPC service and the common request path.
//! - [`http`] - axum HTTP API.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod http;
pub mod service;
pub mod store;
pub mod telemetry;
