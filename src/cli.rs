//! CLI: clap types for the `config-fs` binary and how flags layer over loaded configuration.

use crate::config::SyncConfig;
use clap::Parser;
use std::path::PathBuf;

/// config-fs - Mirror a key/value store onto the local filesystem
#[derive(Parser, Debug)]
#[command(name = "config-fs")]
#[command(about = "Mirror a hierarchical key/value store onto a local directory tree")]
pub struct Cli {
    /// Configuration file path (layered over the user config file)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory the key/value tree is mirrored into
    #[arg(long)]
    pub mount: Option<PathBuf>,

    /// Key/value store url (etcd://host:port or memory://)
    #[arg(long)]
    pub store: Option<String>,

    /// Remove the mirrored tree on exit
    #[arg(long)]
    pub delete: bool,

    /// Seconds between forced resynchronizations (0 disables)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Skip the initial build of the mirror
    #[arg(long)]
    pub no_sync: bool,

    /// Whether the mirror is read-only
    #[arg(long)]
    pub read_only: Option<bool>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,
}

impl Cli {
    /// Apply flags over a loaded configuration. Flags win over every other source.
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(ref mount) = self.mount {
            config.mount_point = mount.clone();
        }
        if let Some(ref store) = self.store {
            config.store_url = store.clone();
        }
        if self.delete {
            config.delete_on_exit = true;
        }
        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if self.no_sync {
            config.pre_sync = false;
        }
        if let Some(read_only) = self.read_only {
            config.read_only = read_only;
        }

        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.logging.format = format.clone();
        }
        config
    }
}
