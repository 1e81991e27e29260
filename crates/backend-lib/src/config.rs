//! Configuration for the WatchSync server.
//!
//! Settings are loaded from an optional `config/default` file with `APP_*`
//! environment overrides (`APP_SERVER__PORT=9000`), falling back to the
//! documented defaults.

use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds of silence after which a client is evicted.
    pub inactivity_threshold_secs: u64,
    /// Seconds between reaper sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_threshold_secs: 600,
            cleanup_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Settings {
    /// Loads configuration from `config/default` (if present) and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Loads configuration from a specific file plus the environment.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.session.inactivity_threshold_secs, 600);
        assert_eq!(settings.session.cleanup_interval_secs, 30);
        assert_eq!(
            settings.session.cleanup_interval(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        fs::write(
            &config_path,
            r#"
            [server]
            host = "127.0.0.1"
            port = 9090

            [session]
            inactivity_threshold_secs = 120
            "#,
        )
        .unwrap();

        let settings = Settings::load_from(config_path.to_str().unwrap()).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.session.inactivity_threshold_secs, 120);
        // Unset keys keep their defaults.
        assert_eq!(settings.session.cleanup_interval_secs, 30);
    }
}
