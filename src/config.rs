use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_FREQUENCY_HOURS: u32 = 6;
pub const MIN_FREQUENCY_HOURS: u32 = 1;
pub const MAX_FREQUENCY_HOURS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub frequency_hours: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            frequency_hours: DEFAULT_FREQUENCY_HOURS,
        }
    }
}

impl RefreshConfig {
    pub fn new(frequency_hours: u32) -> Result<Self, ConfigError> {
        if !(MIN_FREQUENCY_HOURS..=MAX_FREQUENCY_HOURS).contains(&frequency_hours) {
            return Err(ConfigError::OutOfRange(frequency_hours));
        }
        Ok(Self { frequency_hours })
    }

    pub fn interval(&self) -> Duration {
        Duration::hours(i64::from(self.frequency_hours))
    }
}

/// JSON file holding the refresh configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing file means defaults. An out-of-range value is replaced by the
    /// default rather than refusing to start.
    pub fn load(&self) -> Result<RefreshConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(RefreshConfig::default());
        }
        let json = std::fs::read_to_string(&self.path)?;
        let raw: RefreshConfig = serde_json::from_str(&json)?;
        match RefreshConfig::new(raw.frequency_hours) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("{} in {}, using default", e, self.path.display());
                Ok(RefreshConfig::default())
            }
        }
    }

    pub fn save(&self, config: &RefreshConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Process-wide refresh configuration. Readers see the latest write; the
/// scheduler picks it up on its next due-check.
#[derive(Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<RefreshConfig>>,
}

impl SharedConfig {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get(&self) -> RefreshConfig {
        *self.inner.read()
    }

    pub fn set_frequency_hours(&self, hours: u32) -> Result<RefreshConfig, ConfigError> {
        let config = RefreshConfig::new(hours)?;
        *self.inner.write() = config;
        Ok(config)
    }

    /// Re-reads the file, which another process may have rewritten. An
    /// unreadable file keeps the last good value.
    pub fn refresh_from(&self, store: &ConfigStore) -> RefreshConfig {
        match store.load() {
            Ok(config) => {
                let previous = std::mem::replace(&mut *self.inner.write(), config);
                if previous != config {
                    tracing::info!(
                        "Refresh frequency changed from {} to {} hour(s).",
                        previous.frequency_hours,
                        config.frequency_hours
                    );
                }
                config
            }
            Err(e) => {
                let current = self.get();
                tracing::warn!(
                    "could not reload {}: {}; keeping {} hour(s)",
                    store.path.display(),
                    e,
                    current.frequency_hours
                );
                current
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_must_be_in_range() {
        assert!(RefreshConfig::new(0).is_err());
        assert!(RefreshConfig::new(25).is_err());
        assert_eq!(RefreshConfig::new(24).unwrap().interval(), Duration::hours(24));
        assert_eq!(RefreshConfig::default().interval(), Duration::seconds(6 * 3600));
    }

    #[test]
    fn missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        assert_eq!(store.load().unwrap().frequency_hours, 6);
    }

    #[test]
    fn saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path);
        store.save(&RefreshConfig::new(12).unwrap()).unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("\"frequency_hours\": 12"));
        assert_eq!(store.load().unwrap().frequency_hours, 12);
    }

    #[test]
    fn out_of_range_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"frequency_hours": 99}"#).unwrap();
        assert_eq!(ConfigStore::new(&path).load().unwrap(), RefreshConfig::default());
    }

    #[test]
    fn refresh_picks_up_file_written_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path);
        let shared = SharedConfig::new(store.load().unwrap());

        ConfigStore::new(&path).save(&RefreshConfig::new(1).unwrap()).unwrap();
        assert_eq!(shared.get().frequency_hours, 6);
        assert_eq!(shared.refresh_from(&store).frequency_hours, 1);
        assert_eq!(shared.get().frequency_hours, 1);
    }

    #[test]
    fn refresh_keeps_last_good_value_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let shared = SharedConfig::new(RefreshConfig::new(3).unwrap());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(shared.refresh_from(&ConfigStore::new(&path)).frequency_hours, 3);
    }

    #[test]
    fn shared_config_rejects_bad_writes() {
        let shared = SharedConfig::default();
        assert!(shared.set_frequency_hours(30).is_err());
        assert_eq!(shared.get().frequency_hours, 6);

        let clone = shared.clone();
        clone.set_frequency_hours(2).unwrap();
        assert_eq!(shared.get().frequency_hours, 2);
    }
}
