//! logweave configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main logweave configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Session engine settings
    pub session: SessionConfig,

    /// Breadcrumbs layout of the indexed view
    pub breadcrumbs: BreadcrumbsConfig,

    /// Default column handling for exports
    pub export: ExportConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.session.channel_capacity == 0 {
            return Err(eyre::eyre!("session.channel-capacity must be greater than 0"));
        }
        if self.session.read_chunk_bytes == 0 {
            return Err(eyre::eyre!("session.read-chunk-bytes must be greater than 0"));
        }
        if self.session.search_chunk_lines == 0 {
            return Err(eyre::eyre!("session.search-chunk-lines must be greater than 0"));
        }
        if self.breadcrumbs.min_offset == 0 {
            return Err(eyre::eyre!("breadcrumbs.min-offset must be greater than 0"));
        }
        if self.breadcrumbs.min_distance < self.breadcrumbs.min_offset * 2 {
            return Err(eyre::eyre!(
                "breadcrumbs.min-distance ({}) must be at least twice min-offset ({})",
                self.breadcrumbs.min_distance,
                self.breadcrumbs.min_offset
            ));
        }
        if self.export.spliter.is_some() != self.export.delimiter.is_some() {
            return Err(eyre::eyre!("export.spliter and export.delimiter must be set together"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .logweave.yml
        let local_config = PathBuf::from(".logweave.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/logweave/logweave.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("logweave").join("logweave.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed: the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".logweave.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("logweave").join("logweave.yml"));
                }
                paths
            }
        };
        candidates
            .iter()
            .find(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Session engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of each event subject and of the actor command queues
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,

    /// Bytes read from a source per step
    #[serde(rename = "read-chunk-bytes")]
    pub read_chunk_bytes: usize,

    /// Entries matched per committed search chunk
    #[serde(rename = "search-chunk-lines")]
    pub search_chunk_lines: usize,

    /// Destroy watchdog in milliseconds
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,

    /// Where attachments found while observing are written (temp dir when unset)
    #[serde(rename = "attachments-dir")]
    pub attachments_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            read_chunk_bytes: 64 * 1024,
            search_chunk_lines: 10_000,
            shutdown_timeout_ms: 2_000,
            attachments_dir: None,
        }
    }
}

/// Breadcrumbs layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreadcrumbsConfig {
    /// Gaps up to `min-distance + 2` lines are shown completely
    #[serde(rename = "min-distance")]
    pub min_distance: u64,

    /// Lines kept on each side of a collapsed gap
    #[serde(rename = "min-offset")]
    pub min_offset: u64,
}

impl Default for BreadcrumbsConfig {
    fn default() -> Self {
        Self {
            min_distance: 4,
            min_offset: 2,
        }
    }
}

/// Default column handling for exports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Column separator inside rendered entries
    pub spliter: Option<String>,

    /// Separator written between exported columns
    pub delimiter: Option<String>,
}
