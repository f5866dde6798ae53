//! Mirror Paths and Index
//!
//! `MountPoint` is the only place key paths are turned into filesystem paths (and back).
//! `MirrorIndex` records what the engine last wrote for each key so unchanged content is
//! never rewritten.

use crate::types::{is_under, normalize_key, NodeKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Root directory of the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Mount path without a trailing separator; empty when mounted at `/`
    root: String,
}

impl MountPoint {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().to_string();
        Self {
            root: raw.trim_end_matches('/').to_string(),
        }
    }

    /// The mount directory itself
    pub fn path(&self) -> PathBuf {
        if self.root.is_empty() {
            PathBuf::from("/")
        } else {
            PathBuf::from(&self.root)
        }
    }

    /// Translate a key path to its mirrored filesystem path: mount point + key
    pub fn full_path(&self, key: &str) -> PathBuf {
        let key = normalize_key(key);
        if key == "/" {
            return self.path();
        }
        PathBuf::from(format!("{}{}", self.root, key))
    }

    /// Inverse of `full_path`; `None` for paths outside the mount
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.path()).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(name) => {
                    segments.push(name.to_string_lossy().to_string())
                }
                _ => return None,
            }
        }
        Some(normalize_key(&segments.join("/")))
    }
}

/// What the engine last wrote at a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub kind: NodeKind,
    pub content_hash: Option<[u8; 32]>,
}

/// Path-indexed record of the mirror's expected state
#[derive(Debug, Default)]
pub struct MirrorIndex {
    entries: RwLock<BTreeMap<String, MirrorEntry>>,
}

impl MirrorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&self, key: &str, content: &str) {
        self.entries.write().insert(
            normalize_key(key),
            MirrorEntry {
                kind: NodeKind::File,
                content_hash: Some(hash_content(content)),
            },
        );
    }

    pub fn record_directory(&self, key: &str) {
        self.entries.write().insert(
            normalize_key(key),
            MirrorEntry {
                kind: NodeKind::Directory,
                content_hash: None,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<MirrorEntry> {
        self.entries.read().get(&normalize_key(key)).cloned()
    }

    /// Whether the index says `key` already holds exactly `content`
    pub fn holds(&self, key: &str, content: &str) -> bool {
        self.get(key)
            .and_then(|entry| entry.content_hash)
            .map(|hash| hash == hash_content(content))
            .unwrap_or(false)
    }

    pub fn remove(&self, key: &str) -> Option<MirrorEntry> {
        self.entries.write().remove(&normalize_key(key))
    }

    /// Drop a key and everything below it, returning the removed keys
    pub fn remove_subtree(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize_key(prefix);
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| is_under(key, &prefix))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        doomed
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

pub fn hash_content(content: &str) -> [u8; 32] {
    *blake3::hash(content.as_bytes()).as_bytes()
}
