//! Reconciliation handlers
//!
//! Apply one observed key/value change, or one template re-render request, to the mirror.
//! Callers serialize work per path (see `dispatch`); nothing in here takes locks of its own
//! beyond the registry and index internals.

use super::stats::SyncStats;
use crate::dynamic::{DynamicStore, DynamicUpdateSender};
use crate::error::{PathError, SyncError};
use crate::fs::FileStore;
use crate::kv::KvStore;
use crate::mirror::{hash_content, MirrorIndex, MountPoint};
use crate::types::{normalize_key, NodeChange, NodeKind, Operation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Shared state every handler operates on
pub struct Reconciler {
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) fs: Arc<dyn FileStore>,
    pub(crate) dynamic: Arc<dyn DynamicStore>,
    pub(crate) mount: MountPoint,
    pub(crate) index: MirrorIndex,
    pub(crate) stats: Arc<SyncStats>,
    dynamic_events: DynamicUpdateSender,
}

/// Result of writing one leaf into the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

impl Reconciler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        fs: Arc<dyn FileStore>,
        dynamic: Arc<dyn DynamicStore>,
        mount: MountPoint,
        stats: Arc<SyncStats>,
        dynamic_events: DynamicUpdateSender,
    ) -> Self {
        Self {
            kv,
            fs,
            dynamic,
            mount,
            index: MirrorIndex::new(),
            stats,
            dynamic_events,
        }
    }

    /// Converts the key path to the full path on disk: mount point + key
    pub fn full_path(&self, key: &str) -> PathBuf {
        self.mount.full_path(key)
    }

    pub fn mirror_index(&self) -> &MirrorIndex {
        &self.index
    }

    /// Handle a change to the key/value store, reporting (not returning) failures
    pub async fn handle_node_event(&self, change: NodeChange) {
        self.stats.record_node_event();
        if let Err(e) = self.apply_node_change(&change).await {
            self.stats.record_failure();
            error!(change = %change, error = %e, "Failed to apply key/value change");
        }
    }

    /// Handle a template re-render request, reporting (not returning) failures
    pub async fn handle_template_event(&self, path: &str) {
        self.stats.record_template_event();
        if let Err(e) = self.apply_template_update(path).await {
            self.stats.record_failure();
            error!(path = %path, error = %e, "Failed to refresh templated resource");
        }
    }

    #[instrument(skip_all, fields(change = %change))]
    pub async fn apply_node_change(&self, change: &NodeChange) -> Result<(), SyncError> {
        debug!("Received node event, synchronizing");
        let node = &change.node;
        match (change.operation, node.kind) {
            (Operation::Deleted, NodeKind::Directory) => {
                self.delete_store_config_directory(&node.path)
            }
            (Operation::Deleted, NodeKind::File) => self.delete_store_config_file(&node.path),
            (Operation::Changed, NodeKind::Directory) => {
                self.update_store_config_directory(&node.path)
            }
            (Operation::Changed, NodeKind::File) => self
                .update_store_config_file(&node.path, &node.value)
                .await
                .map(|_| ()),
        }
    }

    /// Re-render a registered resource and overwrite its mirrored file
    pub async fn apply_template_update(&self, path: &str) -> Result<WriteOutcome, SyncError> {
        debug!(path = %path, "Received template event, resynchronizing");
        let resource = self.dynamic.is_dynamic(path).ok_or_else(|| {
            SyncError::Consistency(format!(
                "The resource for path: {} no longer exists",
                path
            ))
        })?;
        let content = self.dynamic.content(&resource, false).await?;
        self.write_file(resource.path(), &content)
    }

    /// Delete a file from the mirror, unregistering its dynamic resource first
    pub fn delete_store_config_file(&self, key: &str) -> Result<(), SyncError> {
        let full_path = self.full_path(key);
        debug!(path = %full_path.display(), "Deleting configuration file");

        if self.dynamic.delete(key) {
            debug!(key = %key, "Released templated resource");
        }
        self.index.remove(key);

        if !self.fs.exists(&full_path) {
            return Err(PathError::DoesNotExist(full_path).into());
        }
        if !self.fs.is_file(&full_path) {
            return Err(PathError::NotAFile(full_path).into());
        }
        self.fs.delete(&full_path)?;
        self.stats.record_removal();
        Ok(())
    }

    /// Delete a directory and everything below it, including templated resources
    pub fn delete_store_config_directory(&self, key: &str) -> Result<(), SyncError> {
        let full_path = self.full_path(key);
        debug!(path = %full_path.display(), "Deleting configuration directory");
        self.check_directory(&full_path)?;

        let released = self.dynamic.delete_prefix(key);
        if !released.is_empty() {
            debug!(key = %key, released = released.len(), "Released templated resources below directory");
        }
        self.index.remove_subtree(key);

        self.fs.rmdir(&full_path)?;
        self.stats.record_removal();
        Ok(())
    }

    /// Ensure the mirrored directory and its ancestors exist; children arrive separately
    pub fn update_store_config_directory(&self, key: &str) -> Result<(), SyncError> {
        self.ensure_directory(key)
    }

    /// Create or update a leaf in the mirror
    ///
    /// A path already registered as dynamic is unregistered first. It is registered again
    /// only when the new value is itself templated; otherwise the raw value is mirrored.
    pub async fn update_store_config_file(
        &self,
        key: &str,
        value: &str,
    ) -> Result<WriteOutcome, SyncError> {
        let full_path = self.full_path(key);
        let parent = self.fs.dirname(&full_path);
        self.fs.mkdirp(&parent)?;

        if self.dynamic.delete(key) {
            debug!(key = %key, "Dynamic resource has changed, releasing");
        }

        if self.dynamic.is_dynamic_content(key, value) {
            let content = match self
                .dynamic
                .create(key, value, self.dynamic_events.clone())
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    // the mirror must not keep rendered content for an unregistered path
                    self.discard_file(key, &full_path);
                    return Err(e.into());
                }
            };
            return self.write_file(key, &content);
        }

        self.write_file(key, value)
    }

    /// Upsert a mirrored file unless it already holds exactly `content`
    ///
    /// The index is consulted first; only keys it cannot vouch for are hashed on disk.
    pub fn write_file(&self, key: &str, content: &str) -> Result<WriteOutcome, SyncError> {
        let full_path = self.full_path(key);
        if self.index.holds(key, content) && self.fs.is_file(&full_path) {
            self.stats.record_unchanged();
            return Ok(WriteOutcome::Unchanged);
        }
        let hash = hash_content(content);
        if self.fs.content_hash(&full_path) == Some(hash) {
            self.index.record_file(key, content);
            self.stats.record_unchanged();
            return Ok(WriteOutcome::Unchanged);
        }
        self.fs.create(&full_path, content)?;
        self.index.record_file(key, content);
        self.stats.record_write();
        debug!(path = %full_path.display(), hash = %hex::encode(&hash[..8]), "Updated configuration file");
        Ok(WriteOutcome::Written)
    }

    /// Create a mirrored directory (and ancestors) if missing
    pub fn ensure_directory(&self, key: &str) -> Result<(), SyncError> {
        let full_path = self.full_path(key);
        if !self.fs.is_directory(&full_path) {
            debug!(path = %full_path.display(), "Creating configuration directory");
            self.fs.mkdirp(&full_path)?;
        }
        self.index.record_directory(&normalize_key(key));
        Ok(())
    }

    /// Remove the whole mirror and forget every registration
    pub fn delete_configuration(&self) -> Result<(), SyncError> {
        let mount = self.mount.path();
        info!(mount = %mount.display(), "Deleting the entire configuration directory as requested");
        self.dynamic.delete_prefix("/");
        self.index.clear();
        if !self.fs.exists(&mount) {
            return Ok(());
        }
        self.fs.rmdir(&mount).map_err(|e| {
            error!(mount = %mount.display(), error = %e, "Failed to remove the configuration directory");
            SyncError::from(e)
        })
    }

    pub(crate) fn check_directory(&self, path: &Path) -> Result<(), PathError> {
        if !self.fs.exists(path) {
            return Err(PathError::DoesNotExist(path.to_path_buf()));
        }
        if !self.fs.is_directory(path) {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
        Ok(())
    }

    fn discard_file(&self, key: &str, full_path: &Path) {
        self.index.remove(key);
        if self.fs.is_file(full_path) {
            if let Err(e) = self.fs.delete(full_path) {
                warn!(path = %full_path.display(), error = %e, "Failed to discard stale file");
            }
        }
    }
}
