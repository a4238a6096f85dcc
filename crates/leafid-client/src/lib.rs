#![doc = include_str!("../README.md")]

mod builder;
mod error;
mod grpc;
mod http;

pub use builder::*;
pub use error::*;
pub use grpc::GrpcClient;
pub use http::HttpClient;

/// A connection to a leafid server.
///
/// Built with [`ClientBuilder`]. A [`Client::Downgraded`] client never talks
/// to a server; every call returns [`Error::NotConnected`].
#[derive(Clone, Debug)]
pub enum Client {
    Http(HttpClient),
    Grpc(GrpcClient),
    Downgraded,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns the next id for `key`. A nonzero `step` changes the width of
    /// the ranges the server leases for this key.
    ///
    /// # Errors
    ///
    /// See [`Error`] for how server responses are classified.
    pub async fn get_id(&self, key: &str, step: u32) -> Result<u64> {
        match self {
            Self::Http(client) => client.next(key, step).await,
            Self::Grpc(client) => client.next(key, step).await,
            Self::Downgraded => Err(Error::NotConnected),
        }
    }

    /// Checks that the server is reachable and serving.
    pub async fn ping(&self) -> Result<()> {
        match self {
            Self::Http(client) => client.ping().await,
            Self::Grpc(client) => client.ping().await,
            Self::Downgraded => Err(Error::NotConnected),
        }
    }

    pub const fn is_downgraded(&self) -> bool {
        matches!(self, Self::Downgraded)
    }
}
