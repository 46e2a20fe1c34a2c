use crate::giveaway::types::GiveawayRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Why the giveaway collection could not be read or written
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("giveaway store at {} is unreachable: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file does not parse; nothing was loaded
    #[error("giveaway snapshot {} is corrupt: {source}", .path.display())]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored giveaway {id} is corrupt: {source}")]
    CorruptRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("giveaway record could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("giveaway database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durable storage for the giveaway collection
///
/// `persist_all` replaces the whole collection; a reader must never observe
/// a half-written collection. Order is preserved between the two calls.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Load every stored giveaway, in stored order (called once at startup)
    async fn get_all(&self) -> Result<Vec<GiveawayRecord>, StoreError>;

    /// Overwrite the stored collection with `records`
    async fn persist_all(&self, records: &[GiveawayRecord]) -> Result<(), StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<GiveawayRecord>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<GiveawayRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of completed `persist_all` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<GiveawayRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory store"))
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn get_all(&self) -> Result<Vec<GiveawayRecord>, StoreError> {
        Ok(self.lock()?.clone())
    }

    async fn persist_all(&self, records: &[GiveawayRecord]) -> Result<(), StoreError> {
        *self.lock()? = records.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
