use crate::{Client, Error, GrpcClient, HttpClient, Result};
use core::time::Duration;

/// Configures and connects a [`Client`].
///
/// Exactly one of [`http`](Self::http) or [`grpc`](Self::grpc) must be set.
///
/// ```no_run
/// use leafid_client::Client;
///
/// # async fn run() -> leafid_client::Result<()> {
/// let client = Client::builder()
///     .grpc("127.0.0.1:9528")
///     .downgrade(true)
///     .build()
///     .await?;
/// let id = client.get_id("orders", 0).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientBuilder {
    http: Option<String>,
    grpc: Option<String>,
    downgrade: bool,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Talk to the HTTP API at `addr` (`host:port` or a full URL).
    pub fn http(mut self, addr: impl Into<String>) -> Self {
        self.http = Some(addr.into());
        self
    }

    /// Talk to the gRPC service at `addr` (`host:port` or a full URL).
    pub fn grpc(mut self, addr: impl Into<String>) -> Self {
        self.grpc = Some(addr.into());
        self
    }

    /// When set, a failed [`build`](Self::build) yields
    /// [`Client::Downgraded`] instead of an error.
    pub const fn downgrade(mut self, downgrade: bool) -> Self {
        self.downgrade = downgrade;
        self
    }

    /// Per-request timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the client. A gRPC client connects eagerly.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if both or neither transports are set, or
    ///   the address is unusable.
    /// - [`Error::Transport`] if the gRPC connection cannot be established.
    ///
    /// Never fails when [`downgrade`](Self::downgrade) is set.
    pub async fn build(self) -> Result<Client> {
        let downgrade = self.downgrade;
        match self.connect().await {
            Ok(client) => Ok(client),
            Err(_e) if downgrade => {
                #[cfg(feature = "tracing")]
                tracing::warn!("leafid client downgraded: {_e}");
                Ok(Client::Downgraded)
            }
            Err(e) => Err(e),
        }
    }

    async fn connect(self) -> Result<Client> {
        match (self.http, self.grpc) {
            (Some(addr), None) => Ok(Client::Http(HttpClient::new(&addr, self.timeout)?)),
            (None, Some(addr)) => Ok(Client::Grpc(GrpcClient::connect(&addr, self.timeout).await?)),
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "client is either an http client or a grpc client, not both".into(),
            )),
            (None, None) => Err(Error::InvalidConfig(
                "one of http or grpc must be configured".into(),
            )),
        }
    }
}

/// Prefixes `addr` with `http://` unless it already carries a scheme.
pub(crate) fn base_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.trim_end_matches('/').to_owned()
    } else {
        format!("http://{}", addr.trim_end_matches('/'))
    }
}
