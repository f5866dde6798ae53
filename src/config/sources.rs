//! Config sources: defaults, user file, explicit file, environment.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_INTERVAL_SECS, DEFAULT_MOUNT_POINT, DEFAULT_STORE_URL,
    DEFAULT_WORKER_COUNT,
};
use crate::dynamic::DEFAULT_DYNAMIC_PREFIX;

/// Create a Config builder with defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("mount_point", DEFAULT_MOUNT_POINT)?
        .set_default("store_url", DEFAULT_STORE_URL)?
        .set_default("delete_on_exit", false)?
        .set_default("pre_sync", true)?
        .set_default("read_only", true)?
        .set_default("interval_secs", DEFAULT_INTERVAL_SECS as i64)?
        .set_default("dynamic_prefix", DEFAULT_DYNAMIC_PREFIX)?
        .set_default("prune_on_resync", true)?
        .set_default("watch_mount", true)?
        .set_default("channel_capacity", DEFAULT_CHANNEL_CAPACITY as i64)?
        .set_default("worker_count", DEFAULT_WORKER_COUNT as i64)
}

/// Path to the per-user config file: `$XDG_CONFIG_HOME/config-fs/config.toml` on Linux.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "config-fs").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the user config file to the builder if it exists.
pub fn add_user_file(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match user_config_path() {
        Some(path) if path.exists() => {
            debug!(config_path = %path.display(), "Using user configuration file");
            Ok(add_file(builder, &path))
        }
        _ => Ok(builder),
    }
}

/// Add a TOML config file to the builder.
pub fn add_file(builder: ConfigBuilder<DefaultState>, path: &Path) -> ConfigBuilder<DefaultState> {
    builder.add_source(File::from(path).required(true))
}

/// Add `CONFIG_FS_*` environment overrides (e.g. `CONFIG_FS_MOUNT_POINT`).
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("CONFIG_FS")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}
