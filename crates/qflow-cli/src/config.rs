//! Configuration management for qflowctl
//!
//! Settings come from `~/.qflow/config.toml` when it exists:
//!
//! ```toml
//! output_format = "json"
//!
//! [archive]
//! root_dir = "s3://market-data/flow"
//! horizon_days = 2
//! ```
//!
//! Command-line flags and `QFLOW_*` environment variables override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use qflow_storage::ArchiveConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How records are printed
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Archive location and reader tuning
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// One human-readable line per record
    Text,
}

impl Config {
    /// Load the config file, or defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply command-line overrides and check the result.
    pub fn with_overrides(
        mut self,
        root: Option<String>,
        format: Option<OutputFormat>,
    ) -> Result<Self> {
        if let Some(root) = root {
            self.archive.root_dir = root;
        }
        if let Some(format) = format {
            self.output_format = format;
        }
        self.archive.validate().context("Invalid archive configuration")?;
        Ok(self)
    }

    /// `~/.qflow/config.toml`
    fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".qflow").join("config.toml"))
    }
}
