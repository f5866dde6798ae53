//! Configuration System
//!
//! Explicit configuration value handed to the engine at construction. Layered sources, lowest
//! to highest precedence: built-in defaults, the user config file, an explicit config file,
//! `CONFIG_FS_*` environment variables. CLI flags are applied on top by the binary.

mod sources;

use crate::dynamic::DEFAULT_DYNAMIC_PREFIX;
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MOUNT_POINT: &str = "/config";
pub const DEFAULT_STORE_URL: &str = "etcd://localhost:4001";
pub const DEFAULT_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory the key/value tree is mirrored into
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Key/value backend URL (`etcd://host:port` or `memory://`)
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Remove the whole mirror when the engine stops
    #[serde(default)]
    pub delete_on_exit: bool,

    /// Build the mirror from the key/value tree before serving live events
    #[serde(default = "default_true")]
    pub pre_sync: bool,

    /// Whether the mirror is meant to be read-only (informational)
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Seconds between forced resynchronizations; 0 disables them
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Marker prefix identifying templated values
    #[serde(default = "default_dynamic_prefix")]
    pub dynamic_prefix: String,

    /// Remove mirror entries with no key/value counterpart during a forced resync
    #[serde(default = "default_true")]
    pub prune_on_resync: bool,

    /// Observe filesystem notifications under the mount point
    #[serde(default = "default_true")]
    pub watch_mount: bool,

    /// Buffer size of each event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound on partition workers applying events concurrently
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_mount_point() -> PathBuf {
    PathBuf::from(DEFAULT_MOUNT_POINT)
}

fn default_store_url() -> String {
    DEFAULT_STORE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_dynamic_prefix() -> String {
    DEFAULT_DYNAMIC_PREFIX.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            store_url: default_store_url(),
            delete_on_exit: false,
            pre_sync: true,
            read_only: true,
            interval_secs: default_interval_secs(),
            dynamic_prefix: default_dynamic_prefix(),
            prune_on_resync: true,
            watch_mount: true,
            channel_capacity: default_channel_capacity(),
            worker_count: default_worker_count(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Validate the configuration and normalize the mount point
    ///
    /// Trailing separators are stripped and an existing mount point is canonicalized so
    /// filesystem notifications can be mapped back to keys.
    pub fn validated(mut self) -> Result<Self, SyncError> {
        if self.mount_point.as_os_str().is_empty() {
            return Err(SyncError::Configuration("Mount point cannot be empty".to_string()));
        }
        if !self.mount_point.is_absolute() {
            return Err(SyncError::Configuration(format!(
                "Mount point must be an absolute path: {}",
                self.mount_point.display()
            )));
        }
        let trimmed = self.mount_point.to_string_lossy().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(SyncError::Configuration(
                "Mount point cannot be the filesystem root".to_string(),
            ));
        }
        self.mount_point = PathBuf::from(trimmed);
        if self.mount_point.exists() {
            if let Ok(canonical) = dunce::canonicalize(&self.mount_point) {
                self.mount_point = canonical;
            }
        }
        if self.mount_point.parent().is_none() {
            return Err(SyncError::Configuration(format!(
                "Mount point cannot be the filesystem root: {}",
                self.mount_point.display()
            )));
        }

        Url::parse(&self.store_url).map_err(|e| {
            SyncError::Configuration(format!("Invalid store url {}: {}", self.store_url, e))
        })?;

        if self.dynamic_prefix.is_empty() {
            return Err(SyncError::Configuration(
                "Dynamic prefix cannot be empty".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::Configuration(
                "Channel capacity must be at least 1".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(SyncError::Configuration(
                "Worker count must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, SyncError> {
        toml::to_string_pretty(self)
            .map_err(|e| SyncError::Configuration(format!("Failed to serialize config: {}", e)))
    }
}

/// Loads `SyncConfig` from the layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, user file, `explicit` file (if any) and environment
    pub fn load(explicit: Option<&Path>) -> Result<SyncConfig, SyncError> {
        let mut builder = sources::builder_with_defaults()?;
        builder = sources::add_user_file(builder)?;
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(SyncError::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = sources::add_file(builder, path);
        }
        builder = sources::add_environment(builder);

        let config: SyncConfig = builder.build()?.try_deserialize()?;
        debug!(mount = %config.mount_point.display(), store = %config.store_url, "Loaded configuration");
        config.validated()
    }

    /// Load a single config file on top of the defaults, ignoring other sources
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, SyncError> {
        let builder = sources::add_file(sources::builder_with_defaults()?, path);
        let config: SyncConfig = builder.build()?.try_deserialize()?;
        config.validated()
    }

    /// Per-user config file location
    pub fn user_config_path() -> Option<PathBuf> {
        sources::user_config_path()
    }
}
