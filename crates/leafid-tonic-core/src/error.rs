//! Errors surfaced by the gRPC edge.
//!
//! [`Error`] wraps [`leafid::Error`] and converts into [`tonic::Status`] so a
//! handler can return allocation failures with `?`:
//!
//! | allocation error   | status              |
//! |--------------------|---------------------|
//! | `InvalidArgument`  | `INVALID_ARGUMENT`  |
//! | `ServiceClosed`    | `UNAVAILABLE`       |
//! | `StoreUnavailable` | `INTERNAL`          |
//! | `Internal`         | `INTERNAL`          |

use tonic::Status;

/// Unified error type for the allocation service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Dispensing an id failed.
    #[error(transparent)]
    Allocation(#[from] leafid::Error),

    /// The service is shutting down and rejects new requests.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Allocation(leafid::Error::InvalidArgument { reason }) => {
                Status::invalid_argument(reason)
            }
            Error::Allocation(leafid::Error::ServiceClosed) | Error::ServiceShutdown => {
                Status::unavailable("Service is shutting down")
            }
            Error::Allocation(e) => Status::internal(e.to_string()),
        }
    }
}
