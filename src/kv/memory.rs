//! In-process key/value tree
//!
//! Behaves like the etcd v2 keys space closely enough to drive the engine in tests and dry
//! runs: implicit parent directories on `set`, single-level `list`, and prefix watches.

use super::{KvStore, NodeUpdateSender, WatchHandle};
use crate::error::KvError;
use crate::types::{is_under, normalize_key, parent_key, Node, NodeChange};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tracing::debug;

struct Subscriber {
    key: String,
    updates: NodeUpdateSender,
    handle: WatchHandle,
}

/// Memory-backed key/value store. `None` values are directories.
pub struct MemoryKvStore {
    url: String,
    entries: RwLock<BTreeMap<String, Option<String>>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryKvStore {
    pub fn new(url: impl Into<String>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), None);
        Self {
            url: url.into(),
            entries: RwLock::new(entries),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Number of live (not cancelled) watches
    pub fn watch_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.handle.is_cancelled() && !s.updates.is_closed());
        subscribers.len()
    }

    fn to_node(key: &str, entry: &Option<String>) -> Node {
        match entry {
            Some(value) => Node::file(key, value.clone()),
            None => Node::directory(key),
        }
    }

    /// Create missing ancestor directories of `key`, failing if one of them is a leaf
    fn ensure_ancestors(
        entries: &mut BTreeMap<String, Option<String>>,
        key: &str,
    ) -> Result<(), KvError> {
        let mut ancestors = Vec::new();
        let mut current = parent_key(key);
        while let Some(parent) = current {
            current = parent_key(&parent);
            ancestors.push(parent);
        }
        for ancestor in ancestors.iter().rev() {
            match entries.get(ancestor) {
                Some(Some(_)) => {
                    return Err(KvError::Backend(format!("Not a directory: {}", ancestor)))
                }
                Some(None) => {}
                None => {
                    entries.insert(ancestor.clone(), None);
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, change: NodeChange) {
        let targets: Vec<NodeUpdateSender> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !s.handle.is_cancelled() && !s.updates.is_closed());
            subscribers
                .iter()
                .filter(|s| is_under(&change.node.path, &s.key))
                .map(|s| s.updates.clone())
                .collect()
        };
        debug!(change = %change, watchers = targets.len(), "Publishing change");
        for target in targets {
            // A receiver that went away simply stops getting updates
            let _ = target.send(change.clone()).await;
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self, key: &str) -> Result<Node, KvError> {
        let key = normalize_key(key);
        let entries = self.entries.read();
        entries
            .get(&key)
            .map(|entry| Self::to_node(&key, entry))
            .ok_or(KvError::NotFound(key))
    }

    async fn list(&self, path: &str) -> Result<Vec<Node>, KvError> {
        let path = normalize_key(path);
        let entries = self.entries.read();
        match entries.get(&path) {
            None => return Err(KvError::NotFound(path)),
            Some(Some(_)) => {
                return Err(KvError::Backend(format!("Not a directory: {}", path)))
            }
            Some(None) => {}
        }
        let children = entries
            .iter()
            .filter(|(key, _)| {
                key.as_str() != path && parent_key(key).as_deref() == Some(path.as_str())
            })
            .map(|(key, entry)| Self::to_node(key, entry))
            .collect();
        Ok(children)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let key = normalize_key(key);
        {
            let mut entries = self.entries.write();
            if let Some(None) = entries.get(&key) {
                return Err(KvError::Backend(format!("Not a file: {}", key)));
            }
            Self::ensure_ancestors(&mut entries, &key)?;
            entries.insert(key.clone(), Some(value.to_string()));
        }
        self.publish(NodeChange::changed(Node::file(key, value))).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let key = normalize_key(key);
        let removed = {
            let mut entries = self.entries.write();
            match entries.get(&key).map(|entry| entry.is_some()) {
                None => return Err(KvError::NotFound(key)),
                Some(false) => return Err(KvError::Backend(format!("Not a file: {}", key))),
                Some(true) => entries.remove(&key).flatten().unwrap_or_default(),
            }
        };
        self.publish(NodeChange::deleted(Node::file(key, removed))).await;
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), KvError> {
        let path = normalize_key(path);
        if path == "/" {
            return Err(KvError::Backend("Refusing to remove the root".to_string()));
        }
        let node = {
            let mut entries = self.entries.write();
            let node = match entries.get(&path) {
                None => return Err(KvError::NotFound(path)),
                Some(entry) => Self::to_node(&path, entry),
            };
            entries.retain(|key, _| !is_under(key, &path));
            node
        };
        self.publish(NodeChange::deleted(node)).await;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), KvError> {
        let path = normalize_key(path);
        {
            let mut entries = self.entries.write();
            match entries.get(&path) {
                Some(Some(_)) => {
                    return Err(KvError::Backend(format!("Not a directory: {}", path)))
                }
                Some(None) => return Ok(()),
                None => {}
            }
            Self::ensure_ancestors(&mut entries, &path)?;
            entries.insert(path.clone(), None);
        }
        self.publish(NodeChange::changed(Node::directory(path))).await;
        Ok(())
    }

    async fn watch(&self, key: &str, updates: NodeUpdateSender) -> Result<WatchHandle, KvError> {
        let handle = WatchHandle::new();
        self.subscribers.lock().push(Subscriber {
            key: normalize_key(key),
            updates,
            handle: handle.clone(),
        });
        Ok(handle)
    }
}
