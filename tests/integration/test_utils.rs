//! Shared test utilities for integration tests
//!
//! Every harness gets its own scratch mount point under a `TempDir` and an in-process
//! `memory://` store, so tests never share state and can run in parallel.

use config_fs::dynamic::{DynamicStore, TemplateStore};
use config_fs::fs::LocalFileStore;
use config_fs::kv::{KvStore, MemoryKvStore};
use config_fs::sync::ConfigurationStore;
use config_fs::SyncConfig;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Upper bound for any eventually-consistent assertion
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Harness {
    _temp: TempDir,
    pub mount: PathBuf,
    pub kv: Arc<MemoryKvStore>,
    pub store: ConfigurationStore,
}

impl Harness {
    /// Harness with the resync timer and mount watcher disabled
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut SyncConfig)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = SyncConfig {
            mount_point: temp.path().join("mnt"),
            store_url: "memory://".to_string(),
            interval_secs: 0,
            watch_mount: false,
            ..Default::default()
        };
        configure(&mut config);
        let mount = config.mount_point.clone();

        let kv = Arc::new(MemoryKvStore::new("memory://"));
        let kv_dyn: Arc<dyn KvStore> = kv.clone();
        let dynamic: Arc<dyn DynamicStore> = Arc::new(TemplateStore::new(
            config.dynamic_prefix.clone(),
            Arc::clone(&kv_dyn),
        ));
        let store = ConfigurationStore::with_components(
            config,
            kv_dyn,
            Arc::new(LocalFileStore::new()),
            dynamic,
        );
        Self {
            _temp: temp,
            mount,
            kv,
            store,
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.store.mount_point().full_path(key)
    }

    pub fn read(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path(key)).ok()
    }

    pub fn is_dynamic(&self, key: &str) -> bool {
        self.store.dynamic_store().is_dynamic(key).is_some()
    }

    /// Snapshot of the mirror: key -> Some(content) for files, None for directories
    pub fn mirror_tree(&self) -> BTreeMap<String, Option<String>> {
        let mut tree = BTreeMap::new();
        if !self.mount.exists() {
            return tree;
        }
        for entry in WalkDir::new(&self.mount).min_depth(1) {
            let entry = entry.unwrap();
            let key = self.store.mount_point().key_for(entry.path()).unwrap();
            if entry.file_type().is_dir() {
                tree.insert(key, None);
            } else {
                tree.insert(key, Some(std::fs::read_to_string(entry.path()).unwrap()));
            }
        }
        tree
    }

    /// Snapshot of the key/value tree in the same shape as `mirror_tree`
    pub async fn kv_tree(&self) -> BTreeMap<String, Option<String>> {
        let mut tree = BTreeMap::new();
        let mut pending = vec!["/".to_string()];
        while let Some(dir) = pending.pop() {
            for node in self.kv.list(&dir).await.unwrap() {
                if node.is_dir() {
                    pending.push(node.path.clone());
                    tree.insert(node.path, None);
                } else {
                    tree.insert(node.path, Some(node.value));
                }
            }
        }
        tree
    }
}

/// Poll `check` until it holds or the convergence timeout expires
pub async fn eventually<F, Fut>(description: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + CONVERGENCE_TIMEOUT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition never held: {}", description);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
