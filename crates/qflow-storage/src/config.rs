//! Archive Configuration
//!
//! ## ArchiveConfig
//!
//! Controls where queue writers put files and how readers probe them:
//!
//! - **root_dir**: Archive root, local path or `s3://bucket/prefix` (default: `~/data/flow`)
//! - **machine**: Machine directory for writers (default: this host's name)
//! - **compression**: Segment compression for new files (default: gzip)
//! - **first_timestamp_cache_capacity**: Paths remembered by the first-timestamp cache; the
//!   default shares the process-wide cache, any other value gets a dedicated one (default: 65536)
//! - **first_timestamp_max_try**: Checksum failures tolerated when probing (default: 100)
//! - **horizon_days**: Days past today that archive iteration looks ahead (default: 2)
//!
//! ## Usage
//!
//! ```ignore
//! use qflow_storage::ArchiveConfig;
//!
//! // Local archive with defaults
//! let config = ArchiveConfig::default();
//!
//! // S3 archive without compression
//! let config = ArchiveConfig {
//!     root_dir: "s3://market-data/flow".to_string(),
//!     compression: Compression::None,
//!     ..Default::default()
//! };
//! let backend = config.backend()?;
//! ```

use std::sync::Arc;

use qflow_core::Compression;
use serde::{Deserialize, Serialize};

use crate::backend::{backend_for_path, ArchiveBackend};
use crate::error::{Error, Result};
use crate::probe::{FirstTimestampCache, TimestampProbe, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_TRY};
use crate::query::DEFAULT_HORIZON_DAYS;

/// Archive root used when nothing else is configured
pub const DEFAULT_ROOT_DIR: &str = "~/data/flow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive root directory or object store prefix
    #[serde(default = "default_root_dir")]
    pub root_dir: String,

    /// Machine name for writers; the host name when unset
    #[serde(default)]
    pub machine: Option<String>,

    /// Compression for newly written segments
    #[serde(default = "default_compression")]
    pub compression: Compression,

    /// Capacity of a dedicated first-timestamp cache
    #[serde(default = "default_cache_capacity")]
    pub first_timestamp_cache_capacity: usize,

    /// Checksum failures tolerated per probe
    #[serde(default = "default_max_try")]
    pub first_timestamp_max_try: usize,

    /// Days past today that archive iteration looks ahead
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            machine: None,
            compression: default_compression(),
            first_timestamp_cache_capacity: default_cache_capacity(),
            first_timestamp_max_try: default_max_try(),
            horizon_days: default_horizon_days(),
        }
    }
}

impl ArchiveConfig {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.trim().is_empty() {
            return Err(Error::Config("root_dir must not be empty".to_string()));
        }
        if matches!(&self.machine, Some(m) if m.is_empty() || m.contains('/')) {
            return Err(Error::Config(
                "machine must be non-empty and contain no '/'".to_string(),
            ));
        }
        if self.first_timestamp_max_try == 0 {
            return Err(Error::Config(
                "first_timestamp_max_try must be at least 1".to_string(),
            ));
        }
        if self.horizon_days < 0 {
            return Err(Error::Config("horizon_days must not be negative".to_string()));
        }
        Ok(())
    }

    /// Configured machine name, falling back to the host name.
    pub fn machine_name(&self) -> String {
        self.machine.clone().unwrap_or_else(default_machine)
    }

    /// Backend serving `root_dir`
    pub fn backend(&self) -> Result<Arc<dyn ArchiveBackend>> {
        backend_for_path(&self.root_dir)
    }

    /// First-timestamp lookup with the configured cache size and retry budget
    pub fn probe(&self) -> TimestampProbe {
        let cache = if self.first_timestamp_cache_capacity == DEFAULT_CACHE_CAPACITY {
            TimestampProbe::default().cache_handle()
        } else {
            Arc::new(FirstTimestampCache::new(self.first_timestamp_cache_capacity))
        };
        TimestampProbe::new(cache, self.first_timestamp_max_try)
    }
}

/// This host's name, or `localhost` when it cannot be determined
pub fn default_machine() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_root_dir() -> String {
    DEFAULT_ROOT_DIR.to_string()
}

fn default_compression() -> Compression {
    Compression::Gzip
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_max_try() -> usize {
    DEFAULT_MAX_TRY
}

fn default_horizon_days() -> i64 {
    DEFAULT_HORIZON_DAYS
}
