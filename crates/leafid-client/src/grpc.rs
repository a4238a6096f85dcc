use crate::builder::base_url;
use crate::{Error, Result};
use core::time::Duration;
use leafid_tonic_core::proto::{NextRequest, PingRequest, allocator_client::AllocatorClient};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

/// Client for the `leafid.Allocator` gRPC service.
#[derive(Clone, Debug)]
pub struct GrpcClient {
    inner: AllocatorClient<Channel>,
}

impl GrpcClient {
    pub(crate) async fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut endpoint = Endpoint::from_shared(base_url(addr))
            .map_err(|e| Error::InvalidConfig(format!("invalid grpc address {addr:?}: {e}")))?;
        if let Some(timeout) = timeout {
            endpoint = endpoint.timeout(timeout).connect_timeout(timeout);
        }
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            inner: AllocatorClient::new(channel),
        })
    }

    pub(crate) async fn next(&self, key: &str, step: u32) -> Result<u64> {
        let request = NextRequest {
            key: key.to_owned(),
            step,
        };
        let response = self.inner.clone().next(request).await.map_err(classify)?;
        Ok(response.into_inner().id)
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        self.inner
            .clone()
            .ping(PingRequest {})
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(status: Status) -> Error {
    let msg = status.message().to_owned();
    match status.code() {
        Code::InvalidArgument => Error::WrongRequestFormat(msg),
        Code::Internal => Error::Server(msg),
        Code::Unavailable => Error::Unavailable(msg),
        _ => Error::GetIdFailed(msg),
    }
}
