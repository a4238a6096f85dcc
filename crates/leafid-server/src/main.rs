use clap::Parser;
use leafid_server::server::{
    config::{CliArgs, ServerConfig},
    http::router,
    service::handler::IdService,
    store::{StoreBackend, build_dispenser},
    telemetry::init_telemetry,
};
use leafid_tonic_core::proto::{FILE_DESCRIPTOR_SET, allocator_server::AllocatorServer};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// mimalloc holds up better than the musl allocator under contention.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let store = StoreBackend::open(&config)?;
    let dispenser = build_dispenser(store, &config)?;
    let service = IdService::new(dispenser.clone());

    let grpc_listener = TcpListener::bind(config.grpc_addr).await?;
    let http_listener = TcpListener::bind(config.http_addr).await?;
    log_startup_info(&config);

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AllocatorServer<IdService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let drain = CancellationToken::new();
    let mut servers = JoinSet::new();

    let grpc = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(cors())
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_id_service(service.clone()))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(grpc_listener),
            drain.clone().cancelled_owned(),
        );
    servers.spawn(async move { grpc.await.map_err(anyhow::Error::from) });

    let http = axum::serve(http_listener, router(dispenser).layer(cors()))
        .with_graceful_shutdown(drain.clone().cancelled_owned());
    servers.spawn(async move { http.await.map_err(anyhow::Error::from) });

    // Either a signal arrives, or a listener dies and the process goes down
    // with it.
    let outcome = tokio::select! {
        () = shutdown_signal() => Ok(()),
        Some(joined) = servers.join_next() => match joined {
            Ok(Ok(())) => Err(anyhow::anyhow!("a listener stopped unexpectedly")),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e.into()),
        },
    };

    // 1. Publish the status
    health_reporter
        .set_not_serving::<AllocatorServer<IdService>>()
        .await;

    // 2. Drain in-flight requests
    drain.cancel();
    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while let Some(joined) = servers.join_next().await {
            if let Ok(Err(_e)) = joined {
                #[cfg(feature = "tracing")]
                tracing::error!("Listener failed while draining: {_e:?}");
            }
        }
    })
    .await;
    if drained.is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            "Requests still in flight after {:?}, closing anyway",
            config.shutdown_timeout
        );
        servers.abort_all();
    }

    // 3. Stop every buffer's refill task
    service.shutdown().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");

    // 4. Flush telemetry
    providers.shutdown();
    outcome
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting id service with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting id service: grpc on {}, http on {}, {:?} store",
            _config.grpc_addr,
            _config.http_addr,
            _config.store
        );
    }
}

fn build_id_service(service: IdService) -> AllocatorServer<IdService> {
    AllocatorServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
