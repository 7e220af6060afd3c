//! Layered runtime configuration: defaults, then a TOML config file, then
//! environment variables, then CLI flags — each tier overriding the last.
//!
//! Grounded on the teacher's `config.rs` (`AppResources`/`ConfigFile`) for
//! platform-appropriate data/config paths via `dirs` and for reading/writing
//! TOML with `toml`, simplified down from its per-type `ConfigValue`/
//! `ConfigStore` registry (which exists to back a live settings API this
//! crate doesn't have) to a single flat struct assembled once at startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const APP_NAME: &str = "media-catalog-core";

fn is_prod() -> bool {
    !cfg!(debug_assertions)
}

/// Default on-disk locations, mirroring the teacher's `AppResources`
/// dev-vs-prod split (repo directory in debug builds, OS data dirs in
/// release builds).
pub fn default_database_path() -> PathBuf {
    let base = if is_prod() {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME)
    } else {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    };
    base.join("catalog.sqlite")
}

pub fn default_config_path() -> PathBuf {
    let base = if is_prod() {
        dirs::config_local_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME)
    } else {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    };
    base.join("config.toml")
}

/// Values that may come from `config.toml`. Every field is optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub ffprobe_path: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub progress_interval: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub async fn load(path: &std::path::Path) -> Result<Self, anyhow::Error> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Env var overrides, named after the settings they override.
#[derive(Debug, Default, Clone)]
struct EnvConfig {
    database_url: Option<String>,
    ffprobe_path: Option<String>,
    request_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    batch_size: Option<usize>,
    progress_interval: Option<usize>,
    log_level: Option<String>,
}

impl EnvConfig {
    fn from_env() -> Self {
        let parsed = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok());
        Self {
            database_url: std::env::var("MEDIA_CATALOG_DATABASE_URL").ok(),
            ffprobe_path: std::env::var("MEDIA_CATALOG_FFPROBE_PATH").ok(),
            request_timeout_secs: parsed("MEDIA_CATALOG_REQUEST_TIMEOUT_SECS"),
            probe_timeout_secs: parsed("MEDIA_CATALOG_PROBE_TIMEOUT_SECS"),
            batch_size: parsed("MEDIA_CATALOG_BATCH_SIZE"),
            progress_interval: parsed("MEDIA_CATALOG_PROGRESS_INTERVAL"),
            log_level: std::env::var("MEDIA_CATALOG_LOG_LEVEL").ok(),
        }
    }
}

/// CLI overrides. Kept separate from the `clap::Parser` subcommand enum in
/// `main.rs` so config resolution can be unit tested without constructing
/// a full argv.
#[derive(Debug, Default, Clone)]
pub struct CliConfig {
    pub database_url: Option<String>,
    pub ffprobe_path: Option<String>,
    pub log_level: Option<String>,
}

/// The fully resolved configuration the rest of the crate runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub ffprobe_path: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub batch_size: usize,
    pub progress_interval: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite://{}", default_database_path().display()),
            ffprobe_path: "ffprobe".to_string(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
            batch_size: 50,
            progress_interval: 50,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Resolve defaults < config file < environment < CLI, in that order.
    pub async fn resolve(config_path: &std::path::Path, cli: CliConfig) -> Result<Self, anyhow::Error> {
        let file = FileConfig::load(config_path).await?;
        let env = EnvConfig::from_env();
        let mut config = Config::default();

        if let Some(v) = file.database_url {
            config.database_url = v;
        }
        if let Some(v) = file.ffprobe_path {
            config.ffprobe_path = v;
        }
        if let Some(v) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.probe_timeout_secs {
            config.probe_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = file.progress_interval {
            config.progress_interval = v;
        }
        if let Some(v) = file.log_level {
            config.log_level = v;
        }

        if let Some(v) = env.database_url {
            config.database_url = v;
        }
        if let Some(v) = env.ffprobe_path {
            config.ffprobe_path = v;
        }
        if let Some(v) = env.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env.probe_timeout_secs {
            config.probe_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = env.progress_interval {
            config.progress_interval = v;
        }
        if let Some(v) = env.log_level {
            config.log_level = v;
        }

        if let Some(v) = cli.database_url {
            config.database_url = v;
        }
        if let Some(v) = cli.ffprobe_path {
            config.ffprobe_path = v;
        }
        if let Some(v) = cli.log_level {
            config.log_level = v;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let path = std::path::Path::new("/nonexistent/media-catalog-core-test-config.toml");
        let config = Config::resolve(path, CliConfig::default()).await.unwrap();
        assert_eq!(config.batch_size, Config::default().batch_size);
    }

    #[tokio::test]
    async fn cli_overrides_beat_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "database_url = \"sqlite://from-file.db\"\n").await.unwrap();
        std::env::set_var("MEDIA_CATALOG_DATABASE_URL", "sqlite://from-env.db");

        let cli = CliConfig {
            database_url: Some("sqlite://from-cli.db".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(&path, cli).await.unwrap();
        assert_eq!(config.database_url, "sqlite://from-cli.db");

        std::env::remove_var("MEDIA_CATALOG_DATABASE_URL");
    }

    #[tokio::test]
    async fn env_beats_file_when_no_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "batch_size = 10\n").await.unwrap();
        std::env::set_var("MEDIA_CATALOG_BATCH_SIZE", "25");

        let config = Config::resolve(&path, CliConfig::default()).await.unwrap();
        assert_eq!(config.batch_size, 25);

        std::env::remove_var("MEDIA_CATALOG_BATCH_SIZE");
    }
}
