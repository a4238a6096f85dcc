pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors returned by [`Client`](crate::Client).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The client was downgraded at construction and never connected.
    #[error("leafid server not connected")]
    NotConnected,

    /// The server rejected the request as malformed (empty key, step too
    /// large).
    #[error("wrong request format: {0}")]
    WrongRequestFormat(String),

    /// The server failed internally, for example its store is down.
    #[error("leafid server error: {0}")]
    Server(String),

    /// The server is shutting down or could not be reached.
    #[error("leafid server unavailable: {0}")]
    Unavailable(String),

    /// Any other failed response.
    #[error("get id failed: {0}")]
    GetIdFailed(String),

    /// The response body was not a recognizable result.
    #[error("result format unrecognizable (status {status}): {reason}")]
    ResultNotRecognized { status: u16, reason: String },

    /// The request could not be sent.
    #[error("transport error: {0}")]
    Transport(String),

    /// The builder was given an unusable configuration.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}
