//! config-fs: Key/Value Store Filesystem Mirror
//!
//! Keeps a local directory tree convergent with a hierarchical key/value store. Leaves become
//! files, directories become directories, and templated values are rendered before they are
//! written and re-rendered when the keys they read change.

pub mod cli;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod fs;
pub mod kv;
pub mod logging;
pub mod mirror;
pub mod sync;
pub mod types;
pub mod watch;

pub use config::{ConfigLoader, SyncConfig};
pub use error::SyncError;
pub use sync::{ConfigurationStore, LifecycleState, SyncHandle};
