//! Configuration types, defaults, loading, and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Chat defaults
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    station_home().join("claude_station.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to a file in the data directory (claude_station.log)
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    /// API key; usually loaded from keys.toml or the environment, not from
    /// config.toml.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, mock servers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Default model for new projects
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

/// Keys file structure (keys.toml) — sensitive values kept out of
/// config.toml. Should be chmod 600.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct KeysFile {
    #[serde(default)]
    api: ApiConfig,
}

/// Partial configuration as read from a single file. Every field is
/// optional so a file that sets only `[logging]` overlays just that
/// section and leaves the accumulated values of everything else intact.
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    database: DatabaseOverlay,
    #[serde(default)]
    logging: LoggingOverlay,
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    chat: ChatOverlay,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DatabaseOverlay {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LoggingOverlay {
    level: Option<String>,
    file: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ChatOverlay {
    default_model: Option<String>,
}

/// Canonical base directory: `~/.claude-station/`
///
/// All ClaudeStation data lives here: config, database, log, documents,
/// attachments.
pub fn station_home() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let p = home.join(".claude-station");
    if !p.exists() {
        let _ = std::fs::create_dir_all(&p);
    }
    p
}

/// User data directory layout:
///
/// ```text
/// ${USER_DATA_DIR}/
///   claude_station.db
///   claude_station.log
///   documents/<project_id>/<document_id>_<original_filename>
///   attachments/<conversation_id>/<uuid>.<ext>
/// ```
#[derive(Debug, Clone)]
pub struct UserPaths {
    root: PathBuf,
}

impl UserPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn from_home() -> Self {
        Self::new(station_home())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.clone()
    }

    pub fn documents_dir(&self, project_id: Uuid) -> PathBuf {
        self.root.join("documents").join(project_id.to_string())
    }

    pub fn attachments_dir(&self, conversation_id: Uuid) -> PathBuf {
        self.root
            .join("attachments")
            .join(conversation_id.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.claude-station/config.toml
    /// 3. Local config: ./claude-station.toml
    /// 4. Keys file: ~/.claude-station/keys.toml
    /// 5. Environment variables
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let system_path = Self::system_config_path();
        if system_path.exists() {
            tracing::debug!("loading system config from {:?}", system_path);
            Self::merge_from_file(&mut config, &system_path)?;
        }

        let local_path = Self::local_config_path();
        if local_path.exists() {
            tracing::debug!("loading local config from {:?}", local_path);
            Self::merge_from_file(&mut config, &local_path)?;
        }

        if let Ok(keys) = Self::load_keys() {
            if keys.api.api_key.is_some() {
                config.api.api_key = keys.api.api_key;
            }
            if keys.api.base_url.is_some() {
                config.api.base_url = keys.api.base_url;
            }
        }

        config = Self::apply_env_overrides(config);
        config.validate()?;
        Ok(config)
    }

    pub fn system_config_path() -> PathBuf {
        station_home().join("config.toml")
    }

    fn local_config_path() -> PathBuf {
        PathBuf::from("./claude-station.toml")
    }

    fn keys_path() -> PathBuf {
        station_home().join("keys.toml")
    }

    /// Overlay one file onto the accumulated configuration. Only fields the
    /// file actually sets are applied.
    fn merge_from_file(config: &mut Self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let overlay: ConfigOverlay = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.apply_overlay(overlay);
        Ok(())
    }

    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(path) = overlay.database.path {
            self.database.path = path;
        }
        if let Some(level) = overlay.logging.level {
            self.logging.level = level;
        }
        if let Some(file) = overlay.logging.file {
            self.logging.file = file;
        }
        if overlay.api.api_key.is_some() {
            self.api.api_key = overlay.api.api_key;
        }
        if overlay.api.base_url.is_some() {
            self.api.base_url = overlay.api.base_url;
        }
        if let Some(model) = overlay.chat.default_model {
            self.chat.default_model = model;
        }
    }

    fn load_keys() -> Result<KeysFile> {
        let path = Self::keys_path();
        if !path.exists() {
            return Ok(KeysFile::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Persist the API key to keys.toml.
    pub fn save_api_key(key: &str) -> Result<()> {
        // Strip whitespace and anything pasted after the key itself.
        let key = key.split_whitespace().next().unwrap_or("").to_string();
        if key.is_empty() {
            anyhow::bail!("empty API key");
        }
        let keys = KeysFile {
            api: ApiConfig {
                api_key: Some(key),
                base_url: None,
            },
        };
        let path = Self::keys_path();
        fs::write(&path, toml::to_string_pretty(&keys)?)
            .with_context(|| format!("Failed to write keys file: {:?}", path))?;
        tracing::info!("saved API key to {:?}", path);
        Ok(())
    }

    fn apply_env_overrides(mut config: Self) -> Self {
        if let Ok(db_path) = std::env::var("CLAUDE_STATION_DB_PATH") {
            config.database.path = PathBuf::from(db_path);
        }
        if let Ok(level) = std::env::var("CLAUDE_STATION_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.api.api_key = Some(key);
            }
        }
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            if !base_url.is_empty() {
                config.api.base_url = Some(base_url);
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }
        Ok(())
    }
}
