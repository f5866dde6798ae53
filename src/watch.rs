//! Mount Point Watcher
//!
//! Observes filesystem changes under the mount point and forwards them to the engine. The
//! mirror is one-directional: notifications are only observed, never written back.

use crate::error::SyncError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A change observed under the mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNotification {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl FileNotification {
    pub fn path(&self) -> &Path {
        match self {
            FileNotification::Created(p)
            | FileNotification::Modified(p)
            | FileNotification::Removed(p) => p,
            FileNotification::Renamed { to, .. } => to,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileNotification::Created(_) => "created",
            FileNotification::Modified(_) => "modified",
            FileNotification::Removed(_) => "removed",
            FileNotification::Renamed { .. } => "renamed",
        }
    }
}

impl fmt::Display for FileNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.path().display())
    }
}

/// Recursive watch on the mount point; dropping it stops the watch
pub struct MountWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl MountWatcher {
    /// Start watching `root`, delivering notifications into `events`
    ///
    /// Notifications that do not fit in the channel are dropped.
    pub fn start(root: &Path, events: mpsc::Sender<FileNotification>) -> Result<Self, SyncError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(notification) = convert_event(event) {
                    if let Err(e) = events.try_send(notification) {
                        debug!(error = %e, "Dropping filesystem notification");
                    }
                }
            }
            Err(e) => error!(error = %e, "Filesystem watch error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "Watching mount point");
        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Convert a notify event into a `FileNotification`
pub fn convert_event(event: Event) -> Option<FileNotification> {
    match event.kind {
        EventKind::Create(_) => event.paths.first().cloned().map(FileNotification::Created),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            if event.paths.len() >= 2 {
                Some(FileNotification::Renamed {
                    from: event.paths[0].clone(),
                    to: event.paths[1].clone(),
                })
            } else {
                event.paths.first().cloned().map(FileNotification::Modified)
            }
        }
        EventKind::Modify(_) => event.paths.first().cloned().map(FileNotification::Modified),
        EventKind::Remove(_) => event.paths.first().cloned().map(FileNotification::Removed),
        _ => None,
    }
}
