use crate::giveaway::types::GiveawayRecord;
use crate::storage::backend::{PersistenceGateway, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// SQLite store: one row per giveaway, replaced in a single transaction
///
/// Ids are stored as TEXT and records as JSON, so 64-bit ids never pass
/// through a lossy numeric type.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    Ok(())
}

impl SqliteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS giveaways (
                position INTEGER NOT NULL,
                id TEXT PRIMARY KEY NOT NULL,
                record_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_giveaways_position ON giveaways(position)",
            [],
        )?;

        log::info!("✅ SQLite giveaway store initialized with WAL mode");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned("sqlite connection"))
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn get_all(&self) -> Result<Vec<GiveawayRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, record_json FROM giveaways ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, json) = row?;
            let record = serde_json::from_str(&json)
                .map_err(|source| StoreError::CorruptRecord { id, source })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn persist_all(&self, records: &[GiveawayRecord]) -> Result<(), StoreError> {
        // Serialize before touching the database so a bad record aborts cleanly
        let rows = records
            .iter()
            .map(|record| -> Result<(String, String), StoreError> {
                let json = serde_json::to_string(record).map_err(StoreError::Encode)?;
                Ok((record.id.to_string(), json))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM giveaways", [])?;
        for (position, (id, json)) in rows.iter().enumerate() {
            tx.execute(
                "INSERT INTO giveaways (position, id, record_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![position as i64, id, json, now],
            )?;
        }
        tx.commit()?;

        log::debug!("✅ Persisted {} giveaways to SQLite", rows.len());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giveaway::types::tests::sample_record;
    use crate::giveaway::types::Snowflake;
    use tempfile::tempdir;

    fn records() -> Vec<GiveawayRecord> {
        (0..3u64)
            .map(|i| {
                let mut record = sample_record(1_700_000_000_000);
                record.id = Snowflake(u64::MAX - i);
                record.entrants.insert(Snowflake(9_007_199_254_740_993));
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_preserves_order_and_ids() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("giveaways.db")).unwrap();

        let records = records();
        store.persist_all(&records).await.unwrap();

        let loaded = store.get_all().await.unwrap();
        assert_eq!(loaded, records);
        assert_eq!(loaded[0].id, Snowflake(u64::MAX));
    }

    #[tokio::test]
    async fn test_sqlite_persist_replaces_collection() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("giveaways.db");
        let store = SqliteStore::new(&db_path).unwrap();

        let records = records();
        store.persist_all(&records).await.unwrap();
        store.persist_all(&records[1..]).await.unwrap();
        store.persist_all(&records[1..]).await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM giveaways", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.get_all().await.unwrap(), records[1..].to_vec());
    }

    #[tokio::test]
    async fn test_sqlite_wal_enabled() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("giveaways.db");
        let _store = SqliteStore::new(&db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_corrupt_row_names_the_giveaway() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("giveaways.db");
        let store = SqliteStore::new(&db_path).unwrap();
        store.persist_all(&records()).await.unwrap();

        let conn = Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE giveaways SET record_json = '{' WHERE position = 1",
            [],
        )
        .unwrap();

        match store.get_all().await {
            Err(StoreError::CorruptRecord { id, .. }) => {
                assert_eq!(id, (u64::MAX - 1).to_string())
            }
            other => panic!("expected a corrupt record error, got {:?}", other),
        }
    }
}
