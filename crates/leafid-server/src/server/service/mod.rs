//! Request handling shared by both front ends.
//!
//! - [`handler`] - gRPC service entry point (`IdService`).
//! - [`dispense`] - the single path every id request takes, wrapping the
//!   dispenser call with metrics and logging.

pub mod handler;

use crate::server::{
    store::SharedDispenser,
    telemetry::{
        increment_errors, increment_ids_dispensed, increment_requests, record_buffers_active,
        record_request_duration,
    },
};

/// Returns the next id for `key`, recording telemetry under `transport`.
pub async fn dispense(
    dispenser: &SharedDispenser,
    transport: &'static str,
    key: &str,
    step: u32,
) -> leafid::Result<u64> {
    let start = std::time::Instant::now();
    increment_requests(transport);

    let result = dispenser.next(key, step).await;
    match &result {
        Ok(_) => {
            increment_ids_dispensed();
            record_buffers_active(dispenser);
        }
        Err(_e) => {
            increment_errors(transport);
            #[cfg(feature = "tracing")]
            tracing::warn!(transport, key, step, "id request failed: {_e}");
        }
    }

    record_request_duration(start.elapsed().as_secs_f64() * 1000.0);
    result
}
