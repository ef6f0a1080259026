//! Persistence for the root's station config.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rodyo_protocol::StationConfig;

use crate::ConfigError;

pub trait StationStore: Send + Sync {
    /// Stored config, or the default when nothing has been saved yet.
    fn load(&self) -> Result<StationConfig, ConfigError>;

    fn save(&self, config: &StationConfig) -> Result<(), ConfigError>;
}

/// Station config kept as pretty-printed JSON on disk.
pub struct FileStationStore {
    path: PathBuf,
}

impl FileStationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StationStore for FileStationStore {
    fn load(&self) -> Result<StationConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(StationConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let config: StationConfig = serde_json::from_str(&raw)?;
        Ok(config.normalized())
    }

    fn save(&self, config: &StationConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        tracing::debug!(path = %self.path.display(), "Station config saved");
        Ok(())
    }
}

/// In-memory store, for nodes that should not touch the filesystem.
#[derive(Default)]
pub struct MemoryStationStore {
    config: Mutex<Option<StationConfig>>,
}

impl StationStore for MemoryStationStore {
    fn load(&self) -> Result<StationConfig, ConfigError> {
        let guard = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, config: &StationConfig) -> Result<(), ConfigError> {
        let mut guard = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(config.clone());
        Ok(())
    }
}
