//! Key/Value Backends
//!
//! The hierarchical key/value store the mirror is built from. Backends are selected by the
//! scheme of the configured store URL.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdKvStore;
pub use memory::MemoryKvStore;

use crate::error::KvError;
use crate::types::{Node, NodeChange};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Channel carrying watch deliveries into the engine
pub type NodeUpdateSender = mpsc::Sender<NodeChange>;

/// Key/value store interface
#[async_trait]
pub trait KvStore: Send + Sync {
    /// The URL this store was created from
    fn url(&self) -> &str;

    /// Retrieve a single key
    async fn get(&self, key: &str) -> Result<Node, KvError>;

    /// List the immediate children of a directory (never recursive)
    async fn list(&self, path: &str) -> Result<Vec<Node>, KvError>;

    /// Set a leaf value, creating missing parent directories
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Delete a leaf
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Recursively delete a path
    async fn remove_path(&self, path: &str) -> Result<(), KvError>;

    /// Create a directory node
    async fn mkdir(&self, path: &str) -> Result<(), KvError>;

    /// Deliver every change at or below `key` to `updates` until the handle is cancelled
    async fn watch(&self, key: &str, updates: NodeUpdateSender) -> Result<WatchHandle, KvError>;
}

/// Cancellation handle for an established watch
#[derive(Debug, Clone)]
pub struct WatchHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl WatchHandle {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel: Arc::new(cancel),
        }
    }

    /// Stop delivering events for this watch
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for WatchHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a key/value store from its URL
///
/// Supported schemes: `etcd://host:port` and `memory://`.
pub async fn new_kv_store(url: &str) -> Result<Arc<dyn KvStore>, KvError> {
    info!(store = %url, "Creating a new configuration provider");
    let uri = Url::parse(url).map_err(|e| {
        error!(store = %url, error = %e, "Failed to parse the store url");
        KvError::InvalidUrl(format!("{}: {}", url, e))
    })?;

    match uri.scheme() {
        "etcd" => {
            let agent = EtcdKvStore::connect(url, &uri).await.map_err(|e| {
                error!(store = %url, error = %e, "Failed to create the K/V agent");
                e
            })?;
            Ok(Arc::new(agent))
        }
        "memory" => Ok(Arc::new(MemoryKvStore::new(url))),
        _ => Err(KvError::UnsupportedScheme(url.to_string())),
    }
}
