//! Configuration management for CLI, environment variables, and config files.

use crate::error::{CountsError, ValidationIssue};
use crate::types::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound on shards per counter name.
pub const MAX_SHARDS: usize = 64;

/// Main configuration for manga-counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub counters: CounterConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the in-memory store is persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file. `None` keeps everything in memory.
    pub snapshot_path: Option<PathBuf>,
}

/// Shard counts for sharded counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Shards for names without an explicit entry (per-entity view counters).
    pub default_shards: usize,
    /// Per-name overrides, on top of the built-in table for entity totals.
    pub shards: BTreeMap<String, usize>,
}

/// Settings for the analytics queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Window used for "growth" figures.
    pub growth_window_days: u64,
    /// How long a computed summary is served from cache. 0 disables caching.
    pub cache_ttl_secs: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            default_shards: 4,
            shards: BTreeMap::new(),
        }
    }
}

impl CounterConfig {
    /// Shard count a counter name is allocated with on its first write.
    ///
    /// Explicit overrides win, then the built-in table for entity totals
    /// (hot kinds such as pages get more shards), then `default_shards`.
    pub fn shards_for(&self, name: &str) -> usize {
        if let Some(&shards) = self.shards.get(name) {
            return shards;
        }
        EntityKind::from_str(name)
            .map(|kind| kind.default_shards())
            .unwrap_or(self.default_shards)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            growth_window_days: 30,
            cache_ttl_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, CountsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CountsError::IoError(e.to_string()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| CountsError::ParseError(e.to_string()))
            }
            _ => toml::from_str(&content).map_err(|e| CountsError::ParseError(e.to_string())),
        }
    }

    pub fn from_default_locations() -> Result<Self, CountsError> {
        let config_dirs = [
            dirs::config_dir().map(|d| d.join("manga-counts/config.toml")),
            Some(PathBuf::from("/etc/manga-counts/config.toml")),
            Some(PathBuf::from("./manga-counts.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, CountsError> {
        if let Ok(val) = std::env::var("MANGA_COUNTS_SNAPSHOT") {
            self.store.snapshot_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
        if let Ok(val) = std::env::var("MANGA_COUNTS_DEFAULT_SHARDS") {
            self.counters.default_shards = val.parse().map_err(|_| {
                CountsError::InvalidArgument(
                    "MANGA_COUNTS_DEFAULT_SHARDS has invalid format".into(),
                )
            })?;
        }
        if let Ok(val) = std::env::var("MANGA_COUNTS_GROWTH_WINDOW_DAYS") {
            self.analytics.growth_window_days = val.parse().map_err(|_| {
                CountsError::InvalidArgument(
                    "MANGA_COUNTS_GROWTH_WINDOW_DAYS has invalid format".into(),
                )
            })?;
        }
        if let Ok(val) = std::env::var("MANGA_COUNTS_CACHE_TTL") {
            self.analytics.cache_ttl_secs = val.parse().map_err(|_| {
                CountsError::InvalidArgument("MANGA_COUNTS_CACHE_TTL has invalid format".into())
            })?;
        }
        if let Ok(val) = std::env::var("MANGA_COUNTS_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref snapshot) = cli.snapshot {
            self.store.snapshot_path = Some(snapshot.clone());
        }

        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }

        self
    }

    pub fn load() -> Result<Self, CountsError> {
        Self::from_default_locations()?.merge_from_env()
    }

    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, CountsError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), CountsError> {
        let mut issues = Vec::new();

        if !(1..=MAX_SHARDS).contains(&self.counters.default_shards) {
            issues.push(ValidationIssue {
                field: "counters.default_shards".to_string(),
                message: format!("must be between 1 and {}", MAX_SHARDS),
            });
        }

        for (name, &shards) in &self.counters.shards {
            if name.is_empty() {
                issues.push(ValidationIssue {
                    field: "counters.shards".to_string(),
                    message: "counter name cannot be empty".to_string(),
                });
            }
            if !(1..=MAX_SHARDS).contains(&shards) {
                issues.push(ValidationIssue {
                    field: format!("counters.shards.{}", name),
                    message: format!("must be between 1 and {}", MAX_SHARDS),
                });
            }
        }

        if self.analytics.growth_window_days == 0 || self.analytics.growth_window_days > 3650 {
            issues.push(ValidationIssue {
                field: "analytics.growth_window_days".to_string(),
                message: "must be between 1 and 3650".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issues.push(ValidationIssue {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(CountsError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub snapshot: Option<PathBuf>,
    pub log_level: Option<String>,
}
