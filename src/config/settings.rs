use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub autosave: AutoSaveConfig,
    pub user: UserConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub storage_dir: PathBuf,
    pub key_prefix: String,
    pub max_backups: usize,
    pub quota_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub list_limit: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Settings {
    /// Defaults, then `config/{CONFIG_ENV}`, then `KALAKAR__SECTION__KEY` variables
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        Self::defaults()?
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("KALAKAR").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only, ignoring files and environment
    pub fn default_settings() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("local.storage_dir", "./backups")?
            .set_default("local.key_prefix", crate::storage::local::DEFAULT_KEY_PREFIX)?
            .set_default("local.max_backups", crate::storage::local::DEFAULT_MAX_BACKUPS as i64)?
            .set_default("remote.base_url", "http://127.0.0.1:8787/v1")?
            .set_default("remote.collection", "conversations")?
            .set_default(
                "remote.list_limit",
                crate::sync::coordinator::DEFAULT_REMOTE_LIST_LIMIT as i64,
            )?
            .set_default("remote.timeout_ms", 10_000i64)?
            .set_default("autosave.interval_ms", 5_000i64)?
            .set_default("user.id", "local-artisan")?
            .set_default("logging.level", "info")
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave.interval_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default_settings().unwrap();
        assert_eq!(settings.local.max_backups, 10);
        assert_eq!(settings.local.key_prefix, "conversation_backup_");
        assert!(settings.local.quota_bytes.is_none());
        assert!(settings.remote.api_key.is_none());
        assert_eq!(settings.autosave_interval(), Duration::from_millis(5_000));
        assert_eq!(settings.remote.list_limit, 50);
    }
}
