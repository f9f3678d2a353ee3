use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use caddie_core::{Result, StoreError};

use super::platform::Platform;
use super::snapshot::SnapshotLocation;

pub const ENV_PLATFORM: &str = "CADDIE_PLATFORM";
pub const ENV_DB_PATH: &str = "CADDIE_DB_PATH";
pub const ENV_DATABASE_URL: &str = "CADDIE_DATABASE_URL";
pub const ENV_SNAPSHOT_DIR: &str = "CADDIE_SNAPSHOT_DIR";
pub const ENV_DEBOUNCE_MS: &str = "CADDIE_DEBOUNCE_MS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Overrides target-based platform detection.
    pub platform: Option<Platform>,
    pub native_path: PathBuf,
    pub server_url: Option<String>,
    pub browser: BrowserConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            platform: None,
            native_path: PathBuf::from("caddie.db"),
            server_url: None,
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub database: String,
    pub store: String,
    pub key: String,
    pub debounce_ms: u64,
    /// Where snapshots are kept; in memory when unset.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            database: "caddie".to_string(),
            store: "snapshots".to_string(),
            key: "db".to_string(),
            debounce_ms: 500,
            snapshot_dir: None,
        }
    }
}

impl BrowserConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn location(&self) -> SnapshotLocation {
        SnapshotLocation::new(&self.database, &self.store, &self.key)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl DatabaseConfig {
    /// Defaults overlaid with the `CADDIE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(p) = var(ENV_PLATFORM) {
            config.platform = Some(Platform::from_str(&p).map_err(|_| {
                StoreError::BackendInit(format!("{}: unknown platform `{}`", ENV_PLATFORM, p))
            })?);
        }
        if let Some(path) = var(ENV_DB_PATH) {
            config.native_path = PathBuf::from(path);
        }
        config.server_url = var(ENV_DATABASE_URL);
        config.browser.snapshot_dir = var(ENV_SNAPSHOT_DIR).map(PathBuf::from);
        if let Some(ms) = var(ENV_DEBOUNCE_MS) {
            config.browser.debounce_ms = ms.parse().map_err(|_| {
                StoreError::BackendInit(format!("{}: `{}` is not a number", ENV_DEBOUNCE_MS, ms))
            })?;
        }
        Ok(config)
    }

    pub fn platform(&self) -> Platform {
        Platform::resolve(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.browser.debounce(), Duration::from_millis(500));
        let loc = config.browser.location();
        assert_eq!(
            (loc.database.as_str(), loc.store.as_str(), loc.key.as_str()),
            ("caddie", "snapshots", "db")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{ "platform": "browser", "browser": { "debounce_ms": 100 } }"#,
        )
        .unwrap();
        assert_eq!(config.platform(), Platform::Browser);
        assert_eq!(config.browser.debounce_ms, 100);
        assert_eq!(config.browser.key, "db");
        assert_eq!(config.native_path, PathBuf::from("caddie.db"));
    }
}
