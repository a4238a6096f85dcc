use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use leafid::{BufferConfig, DispenserConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Backing store for range allocation.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    /// Durable SQLite database at `--database-path`.
    Sqlite,
    /// Process-local map. Ids restart from 1 after a restart.
    Memory,
}

/// Runtime configuration for the `leafid-server` binary.
///
/// Every flag can also be set through the environment variable named next
/// to it, or from a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leafid-server",
    version,
    about = "A gRPC and HTTP service handing out unique, per-key increasing ids"
)]
pub struct CliArgs {
    /// Address the gRPC service listens on.
    ///
    /// Environment variable: `GRPC_ADDR`
    #[arg(long, env = "GRPC_ADDR", default_value = "0.0.0.0:9528")]
    pub grpc_addr: SocketAddr,

    /// Address the HTTP API listens on.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:9527")]
    pub http_addr: SocketAddr,

    /// Which allocation store to use.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,

    /// SQLite database file. Created if missing. Ignored by the memory store.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[arg(long, env = "DATABASE_PATH", default_value = "leafid.db")]
    pub database_path: PathBuf,

    /// Range width for keys that have never requested one.
    ///
    /// Environment variable: `DEFAULT_STEP`
    #[arg(long, env = "DEFAULT_STEP", default_value_t = leafid::DEFAULT_STEP)]
    pub default_step: u32,

    /// Largest step a client may request.
    ///
    /// Environment variable: `MAX_STEP`
    #[arg(long, env = "MAX_STEP", default_value_t = leafid::DEFAULT_MAX_STEP)]
    pub max_step: u32,

    /// Consumed fraction of the active segment that triggers a background
    /// lease of the next one.
    ///
    /// Environment variable: `WATERMARK`
    #[arg(long, env = "WATERMARK", default_value_t = leafid::DEFAULT_WATERMARK)]
    pub watermark: f64,

    /// How often each key's refill task checks its watermark, in
    /// milliseconds.
    ///
    /// Environment variable: `REFILL_INTERVAL_MS`
    #[arg(long, env = "REFILL_INTERVAL_MS", default_value_t = 500)]
    pub refill_interval_ms: u64,

    /// Upper bound on a single store call, in milliseconds. 0 disables the
    /// bound.
    ///
    /// Environment variable: `FETCH_TIMEOUT_MS`
    #[arg(long, env = "FETCH_TIMEOUT_MS", default_value_t = 0)]
    pub fetch_timeout_ms: u64,

    /// Seconds to wait for in-flight requests to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub store: StoreKind,
    pub database_path: PathBuf,
    pub default_step: u32,
    pub dispenser: DispenserConfig,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.default_step == 0 {
            bail!("DEFAULT_STEP must be greater than 0");
        }

        if args.max_step == 0 {
            bail!("MAX_STEP must be greater than 0");
        }

        if args.max_step < args.default_step {
            bail!(
                "MAX_STEP ({}) must be at least DEFAULT_STEP ({})",
                args.max_step,
                args.default_step
            );
        }

        if args.refill_interval_ms == 0 {
            bail!("REFILL_INTERVAL_MS must be greater than 0");
        }

        if args.grpc_addr == args.http_addr {
            bail!("GRPC_ADDR and HTTP_ADDR must differ ({})", args.grpc_addr);
        }

        let dispenser = DispenserConfig {
            max_step: args.max_step,
            buffer: BufferConfig {
                watermark: args.watermark,
                refill_interval: Duration::from_millis(args.refill_interval_ms),
                fetch_timeout: (args.fetch_timeout_ms > 0)
                    .then(|| Duration::from_millis(args.fetch_timeout_ms)),
            },
        };
        dispenser.validate()?;

        Ok(Self {
            grpc_addr: args.grpc_addr,
            http_addr: args.http_addr,
            store: args.store,
            database_path: args.database_path,
            default_step: args.default_step,
            dispenser,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
