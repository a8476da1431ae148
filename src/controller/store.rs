//! Persisted desired-state document
//!
//! The document maps device names to [`InterfaceRecord`]s and is stored as
//! JSON. Writes go to a temporary file in the same directory which is then
//! synced and renamed over the destination, so a crash never leaves a
//! half-written file.
//! The file holds passphrases and is only readable by root (mode 0600).

use super::error::{StoreError, StoreResult};
use super::state::{ConfigDocument, InterfaceRecord};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Result of reading the document: the usable records and the rejected ones
#[derive(Debug, Default)]
pub struct LoadedDocument {
    pub records: ConfigDocument,
    /// Device name to the reason its record was skipped
    pub rejected: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Open the store, creating its directory if needed
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::io("Failed to create store directory"))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; a missing file is an empty document.
    ///
    /// A record that does not parse is skipped without affecting the others.
    pub fn load(&self) -> StoreResult<LoadedDocument> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No persisted configuration");
            return Ok(LoadedDocument::default());
        }

        let content = fs::read_to_string(&self.path).map_err(StoreError::io("Failed to read store"))?;
        let raw: Map<String, Value> = serde_json::from_str(&content)?;

        let mut loaded = LoadedDocument::default();
        for (device, value) in raw {
            match serde_json::from_value::<InterfaceRecord>(value) {
                Ok(record) => {
                    loaded.records.insert(device, record);
                }
                Err(e) => {
                    loaded.rejected.insert(device, e.to_string());
                }
            }
        }

        tracing::info!(
            path = %self.path.display(),
            count = loaded.records.len(),
            rejected = loaded.rejected.len(),
            "Loaded persisted configuration"
        );
        Ok(loaded)
    }

    pub fn save(&self, document: &ConfigDocument) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(document)?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(StoreError::io("Failed to create store"))?;
        file.write_all(content.as_bytes())
            .map_err(StoreError::io("Failed to write store"))?;
        file.sync_all().map_err(StoreError::io("Failed to sync store"))?;
        drop(file);

        let mut perms = fs::metadata(&temp_path)
            .map_err(StoreError::io("Failed to stat store"))?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&temp_path, perms).map_err(StoreError::io("Failed to restrict store"))?;

        fs::rename(&temp_path, &self.path).map_err(StoreError::io("Failed to finalize store"))?;

        tracing::debug!(path = %self.path.display(), count = document.len(), "Saved configuration");
        Ok(())
    }
}
