//! Service configuration.
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no file)
//! yields a working local-only service.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use unified_search::{SearchConfig, SourceKind};

use crate::error::{IntelError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelConfig {
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub versioning: VersioningConfig,
    pub builder: BuilderConfig,
    pub local: LocalConfig,
    pub logging: LoggingConfig,
    /// Remote tools reached over HTTP.
    pub tools: Vec<ToolConfig>,
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8088,
        }
    }
}

/// Intelligence storage pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. `None` uses the default data directory.
    pub database_path: Option<PathBuf>,
    /// Keep everything in memory instead of SQLite.
    pub in_memory: bool,
    /// Text similarity at or above which new content counts as a duplicate.
    pub duplicate_threshold: f64,
    /// How long a stored content hash is remembered for fast duplicate checks.
    pub duplicate_cache_ttl_seconds: u64,
    pub duplicate_cache_max_entries: u64,
    /// How long an operation's status stays queryable after its last change.
    pub status_ttl_seconds: u64,
    /// Most operation statuses kept at once.
    pub status_max_entries: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            in_memory: false,
            duplicate_threshold: 0.95,
            duplicate_cache_ttl_seconds: 3600,
            duplicate_cache_max_entries: 10_000,
            status_ttl_seconds: 3600,
            status_max_entries: 100_000,
        }
    }
}

impl StorageConfig {
    pub fn duplicate_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.duplicate_cache_ttl_seconds)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_seconds)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::app_dirs::intelligence_db)
    }
}

/// Version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub database_path: Option<PathBuf>,
    pub in_memory: bool,
    /// Similarity above which new content is considered unchanged.
    pub similarity_threshold: f64,
    /// Non-current versions older than this are archived by cleanup.
    pub retention_days: u32,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            in_memory: false,
            similarity_threshold: 0.8,
            retention_days: 90,
        }
    }
}

impl VersioningConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::app_dirs::versions_db)
    }
}

/// Thresholds for pattern, trend and connection analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub pattern_threshold: f64,
    pub trend_threshold: f64,
    pub connection_threshold: f64,
    /// Near-identical records needed before content counts as recurring.
    pub min_occurrences: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 0.7,
            trend_threshold: 0.7,
            connection_threshold: 0.5,
            min_occurrences: 3,
        }
    }
}

/// Local knowledge tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory of `.txt`/`.md` documents searched as `LOCAL_FILES`.
    pub files_dir: Option<PathBuf>,
    /// Expose stored intelligence as the `VECTOR_INDEX` and `GRAPH` backends.
    pub search_stored: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            files_dir: None,
            search_stored: true,
        }
    }
}

/// Logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a daily rolling log file here in addition to stderr.
    pub log_dir: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

/// One remote tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub endpoint: String,
    /// Defaults to `REMOTE_TOOL_<index>`.
    #[serde(default)]
    pub source_kind: Option<SourceKind>,
    #[serde(default)]
    pub reliability: Option<f64>,
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(IntelError::Config(format!(
            "{name} must be between 0 and 1, got {value}"
        )))
    }
}

impl IntelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| IntelError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| IntelError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Check every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`IntelError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.search
            .validate()
            .map_err(|e| IntelError::Config(e.to_string()))?;
        check_unit("storage.duplicate_threshold", self.storage.duplicate_threshold)?;
        check_unit(
            "versioning.similarity_threshold",
            self.versioning.similarity_threshold,
        )?;
        check_unit("builder.pattern_threshold", self.builder.pattern_threshold)?;
        check_unit("builder.trend_threshold", self.builder.trend_threshold)?;
        check_unit("builder.connection_threshold", self.builder.connection_threshold)?;

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() || tool.endpoint.trim().is_empty() {
                return Err(IntelError::Config(
                    "tools need a name and an endpoint".into(),
                ));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(IntelError::Config(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
            if let Some(kind) = tool.source_kind {
                if kind.is_local() {
                    return Err(IntelError::Config(format!(
                        "tool {} uses local source kind {kind}",
                        tool.name
                    )));
                }
            }
        }
        Ok(())
    }
}
