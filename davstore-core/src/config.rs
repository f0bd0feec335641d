//! Storage configuration.
//!
//! Settings are read from an optional TOML file (by default
//! `~/.config/davstore/config.toml`) and can be overridden with
//! `DAVSTORE_<SECTION>__<KEY>` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::DEFAULT_MAX_SYNC_TOKEN_AGE_SECS;
use crate::error::{StoreError, StoreResult};

static DEFAULT_FILESYSTEM_FOLDER: &str = "~/.davstore/collections";
static DEFAULT_BACKEND: &str = "multifilesystem";
static DEFAULT_LOG_LEVEL: &str = "warning";

fn default_filesystem_folder() -> PathBuf {
    PathBuf::from(DEFAULT_FILESYSTEM_FOLDER)
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_max_sync_token_age() -> Duration {
    Duration::from_secs(DEFAULT_MAX_SYNC_TOKEN_AGE_SECS)
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The `[storage]` section.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Backend name, resolved once through the storage registry.
    #[serde(rename = "type", default = "default_backend")]
    pub backend: String,

    /// Where collections are stored. `~` is expanded.
    #[serde(default = "default_filesystem_folder")]
    pub filesystem_folder: PathBuf,

    /// Sync tokens and history tombstones older than this are removed.
    /// Accepts seconds or a human readable duration such as `"30days"`.
    #[serde(
        default = "default_max_sync_token_age",
        serialize_with = "serialize_age",
        deserialize_with = "deserialize_age"
    )]
    pub max_sync_token_age: Duration,

    /// Command run after changes to storage; `%(user)s` is replaced by the user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hook: String,

    /// Sync all changes to the filesystem before returning.
    #[serde(default = "default_true")]
    pub filesystem_fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: default_backend(),
            filesystem_folder: default_filesystem_folder(),
            max_sync_token_age: default_max_sync_token_age(),
            hook: String::new(),
            filesystem_fsync: true,
        }
    }
}

impl StorageConfig {
    /// Configuration rooted at `folder` with every other option at its default.
    pub fn with_folder(folder: impl Into<PathBuf>) -> Self {
        StorageConfig {
            filesystem_folder: folder.into(),
            ..Self::default()
        }
    }

    /// The storage folder with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        let full_path_str =
            shellexpand::tilde(&self.filesystem_folder.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }
}

/// The `[logging]` section.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn config_path() -> StoreResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| StoreError::Config("Could not determine config directory".into()))?
            .join("davstore");

        Ok(config_dir.join("config.toml"))
    }

    /// Load settings from `path` (or the default location) plus the environment.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> StoreResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("DAVSTORE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| StoreError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> StoreResult<()> {
        let contents = format!(
            "\
# davstore configuration

[storage]
# Storage backend:
# type = \"{DEFAULT_BACKEND}\"

# Where collections are stored:
# filesystem_folder = \"{DEFAULT_FILESYSTEM_FOLDER}\"

# Delete sync tokens and tombstones older than this (seconds or e.g. \"30days\"):
# max_sync_token_age = {DEFAULT_MAX_SYNC_TOKEN_AGE_SECS}

# Command run after changes to storage:
# hook = \"git add -A && (git diff --cached --quiet || git commit -m 'Changes by %(user)s')\"

# Sync all changes to disk before answering:
# filesystem_fsync = true

[logging]
# level = \"{DEFAULT_LOG_LEVEL}\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| StoreError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

fn serialize_age<S: Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(age.as_secs())
}

fn deserialize_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Age {
        Secs(u64),
        Text(String),
    }

    match Age::deserialize(deserializer)? {
        Age::Secs(secs) => Ok(Duration::from_secs(secs)),
        Age::Text(text) => match text.trim().parse::<u64>() {
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();

        assert_eq!(settings.storage.backend, "multifilesystem");
        assert!(settings.storage.filesystem_fsync);
        assert_eq!(
            settings.storage.max_sync_token_age,
            Duration::from_secs(2_592_000)
        );
        assert_eq!(settings.logging.level, "warning");
    }

    #[test]
    fn test_humantime_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nfilesystem_folder = \"/srv/dav\"\nmax_sync_token_age = \"2days\"\nfilesystem_fsync = false\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.storage.data_path(), PathBuf::from("/srv/dav"));
        assert_eq!(
            settings.storage.max_sync_token_age,
            Duration::from_secs(2 * 24 * 60 * 60)
        );
        assert!(!settings.storage.filesystem_fsync);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.storage.hook = "true".to_string();
        settings.storage.max_sync_token_age = Duration::from_secs(60);
        settings.save(&path).unwrap();

        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded.storage.hook, "true");
        assert_eq!(loaded.storage.max_sync_token_age, Duration::from_secs(60));
    }

    #[test]
    fn test_default_config_template_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Settings::create_default_config(&path).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.storage.backend, "multifilesystem");
    }
}
