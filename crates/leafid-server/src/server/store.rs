//! Store selection for the server process.

use crate::server::config::{ServerConfig, StoreKind};
use leafid::{AllocationStore, Dispenser, IdRange, MemoryStore, Result, SqliteStore};
use std::sync::Arc;

/// The store chosen at startup. An enum keeps the dispenser concrete so the
/// handlers do not need to be generic.
#[derive(Debug)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl StoreBackend {
    /// Opens the store described by `config`.
    pub fn open(config: &ServerConfig) -> anyhow::Result<Self> {
        let backend = match config.store {
            StoreKind::Memory => Self::Memory(MemoryStore::with_default_step(config.default_step)?),
            StoreKind::Sqlite => Self::Sqlite(
                SqliteStore::open(&config.database_path)?.with_default_step(config.default_step)?,
            ),
        };
        Ok(backend)
    }

    pub const fn kind(&self) -> StoreKind {
        match self {
            Self::Memory(_) => StoreKind::Memory,
            Self::Sqlite(_) => StoreKind::Sqlite,
        }
    }
}

impl AllocationStore for StoreBackend {
    async fn take_range(&self, key: &str, step: u32) -> Result<IdRange> {
        match self {
            Self::Memory(store) => store.take_range(key, step).await,
            Self::Sqlite(store) => store.take_range(key, step).await,
        }
    }
}

/// Dispenser shared by the gRPC and HTTP front ends.
pub type SharedDispenser = Arc<Dispenser<StoreBackend>>;

/// Builds the process-wide dispenser over `store`.
pub fn build_dispenser(store: StoreBackend, config: &ServerConfig) -> anyhow::Result<SharedDispenser> {
    let dispenser = Dispenser::new(Arc::new(store), config.dispenser.clone())?;
    Ok(Arc::new(dispenser))
}

#[cfg(test)]
pub(crate) fn memory_dispenser() -> SharedDispenser {
    let store = StoreBackend::Memory(MemoryStore::new());
    Arc::new(Dispenser::new(Arc::new(store), leafid::DispenserConfig::default()).unwrap())
}
