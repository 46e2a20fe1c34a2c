use crate::giveaway::types::GiveawayRecord;
use crate::storage::backend::{PersistenceGateway, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of the collection as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveawaySnapshot {
    pub giveaways: Vec<GiveawayRecord>,
    pub saved_at: i64,
}

/// Pretty-printed JSON snapshot file
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so readers see either the old or the new snapshot.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "giveaways.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn get_all(&self) -> Result<Vec<GiveawayRecord>, StoreError> {
        if !self.path.exists() {
            log::info!("No existing giveaway snapshot found: {}", self.path.display());
            return Ok(Vec::new());
        }

        let json =
            fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let snapshot: GiveawaySnapshot =
            serde_json::from_str(&json).map_err(|source| StoreError::CorruptSnapshot {
                path: self.path.clone(),
                source,
            })?;

        log::info!(
            "Loaded {} giveaways from {}",
            snapshot.giveaways.len(),
            self.path.display()
        );
        Ok(snapshot.giveaways)
    }

    async fn persist_all(&self, records: &[GiveawayRecord]) -> Result<(), StoreError> {
        let snapshot = GiveawaySnapshot {
            giveaways: records.to_vec(),
            saved_at: chrono::Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| StoreError::io(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        log::debug!("Saved {} giveaways to {}", records.len(), self.path.display());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSON"
    }
}
