//! Persistence backends
//!
//! - `backend` - `PersistenceGateway` contract, `StoreError`, in-memory store
//! - `json_store` - JSON snapshot file
//! - `sqlite_store` - SQLite (WAL) table

pub mod backend;
pub mod json_store;
pub mod sqlite_store;

pub use backend::{MemoryStore, PersistenceGateway, StoreError};
pub use json_store::JsonFileStore;
pub use sqlite_store::SqliteStore;

use crate::giveaway::config::{ManagerConfig, StoreBackend};
use std::sync::Arc;

/// Open the store selected by `config`
pub fn open_store(config: &ManagerConfig) -> Result<Arc<dyn PersistenceGateway>, StoreError> {
    let store: Arc<dyn PersistenceGateway> = match config.store_backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(&config.store_path)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::new(&config.store_path)?),
    };
    log::info!(
        "📂 Giveaway store: {} ({})",
        store.backend_type(),
        config.store_path
    );
    Ok(store)
}
