#![allow(dead_code)]

use leafid::{Dispenser, DispenserConfig, MemoryStore};
use leafid_server::server::{
    http::router,
    service::handler::IdService,
    store::{SharedDispenser, StoreBackend},
};
use leafid_tonic_core::proto::allocator_server::AllocatorServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

pub fn dispenser() -> SharedDispenser {
    let store = StoreBackend::Memory(MemoryStore::new());
    Arc::new(Dispenser::new(Arc::new(store), DispenserConfig::default()).unwrap())
}

/// Serves the HTTP API on an ephemeral port.
pub async fn spawn_http(dispenser: SharedDispenser) -> SocketAddr {
    spawn_router(router(dispenser)).await
}

/// Serves an arbitrary router on an ephemeral port.
pub async fn spawn_router(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serves the gRPC service on an ephemeral port.
pub async fn spawn_grpc(dispenser: SharedDispenser) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = AllocatorServer::new(IdService::new(dispenser));
    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
