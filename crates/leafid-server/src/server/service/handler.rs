//! gRPC service implementation for id allocation.
//!
//! [`IdService`] implements the [`Allocator`] service from
//! `proto/leafid.proto`. Each `Next` call is served by the shared
//! [`Dispenser`](leafid::Dispenser); allocation errors are mapped to gRPC
//! status codes by [`leafid_tonic_core::Error`].

use crate::server::{service::dispense, store::SharedDispenser};
use leafid_tonic_core::{
    Error,
    proto::{NextRequest, NextResponse, PingRequest, PingResponse, allocator_server::Allocator},
};
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct IdService {
    dispenser: SharedDispenser,
}

impl IdService {
    pub const fn new(dispenser: SharedDispenser) -> Self {
        Self { dispenser }
    }

    /// Rejects further requests and stops every buffer's refill task.
    pub async fn shutdown(&self) {
        self.dispenser.close().await;
    }
}

#[tonic::async_trait]
impl Allocator for IdService {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(key = %req.get_ref().key, step = req.get_ref().step)))]
    async fn next(&self, req: Request<NextRequest>) -> Result<Response<NextResponse>, Status> {
        let NextRequest { key, step } = req.into_inner();
        let id = dispense(&self.dispenser, "grpc", &key, step)
            .await
            .map_err(Error::from)?;
        Ok(Response::new(NextResponse { id }))
    }

    async fn ping(&self, _req: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        if self.dispenser.is_closed() {
            return Err(Error::ServiceShutdown.into());
        }
        Ok(Response::new(PingResponse {}))
    }
}
