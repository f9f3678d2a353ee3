use serde::{Deserialize, Serialize};

use super::config::DatabaseConfig;

/// Which storage backend a process runs against.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    /// Native SQLite file, durable by itself.
    Mobile,
    /// SQLite on a scratch file, persisted as snapshots.
    Browser,
    /// PostgreSQL.
    Server,
}

impl Platform {
    /// Platform the compile target implies, if any.
    pub fn target() -> Option<Platform> {
        if cfg!(target_arch = "wasm32") {
            Some(Platform::Browser)
        } else if cfg!(any(target_os = "android", target_os = "ios")) {
            Some(Platform::Mobile)
        } else {
            None
        }
    }

    pub fn resolve(config: &DatabaseConfig) -> Platform {
        config
            .platform
            .or_else(Platform::target)
            .unwrap_or(if config.server_url.is_some() {
                Platform::Server
            } else {
                Platform::Mobile
            })
    }

    pub fn persists_snapshots(self) -> bool {
        self == Platform::Browser
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_resolve() {
        let mut config = DatabaseConfig::default();
        assert_eq!(Platform::resolve(&config), Platform::Mobile);

        config.server_url = Some("postgres://localhost/caddie".into());
        assert_eq!(Platform::resolve(&config), Platform::Server);

        config.platform = Some(Platform::Browser);
        assert_eq!(Platform::resolve(&config), Platform::Browser);
    }

    #[test]
    fn test_names() {
        assert_eq!(Platform::from_str("Browser").unwrap(), Platform::Browser);
        assert_eq!(Platform::Server.to_string(), "server");
        assert_eq!(
            serde_json::from_str::<Platform>(r#""mobile""#).unwrap(),
            Platform::Mobile
        );
        assert!(Platform::Browser.persists_snapshots());
    }
}
