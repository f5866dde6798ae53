//! Core types shared by the backends and the synchronization engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry read from the key/value store
///
/// Nodes are produced fresh by every `get`, `list` and watch delivery; nothing
/// holds on to them between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Absolute, slash-delimited key path
    pub path: String,
    /// Leaf value; empty for directories
    pub value: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn file(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            kind: NodeKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: String::new(),
            kind: NodeKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Mutation observed by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Changed,
    Deleted,
}

/// One unit delivered by a key/value watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub operation: Operation,
    pub node: Node,
}

impl NodeChange {
    pub fn changed(node: Node) -> Self {
        Self {
            operation: Operation::Changed,
            node,
        }
    }

    pub fn deleted(node: Node) -> Self {
        Self {
            operation: Operation::Deleted,
            node,
        }
    }
}

impl fmt::Display for NodeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.operation {
            Operation::Changed => "changed",
            Operation::Deleted => "deleted",
        };
        let kind = match self.node.kind {
            NodeKind::File => "file",
            NodeKind::Directory => "dir",
        };
        write!(f, "{} {} {}", op, kind, self.node.path)
    }
}

/// Normalize a key path: leading slash, no trailing slash (except root), no empty segments
pub fn normalize_key(key: &str) -> String {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// Parent of a normalized key; the root has no parent
pub fn parent_key(key: &str) -> Option<String> {
    if key == "/" {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(key[..idx].to_string()),
        None => None,
    }
}

/// Whether `key` equals `prefix` or lies below it
pub fn is_under(key: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}
