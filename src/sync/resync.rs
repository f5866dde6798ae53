//! Forced resynchronization
//!
//! A full rebuild followed, optionally, by a prune of mirror entries that no longer have a
//! key/value counterpart. Callers hold the exclusive side of the tree gate while this runs.

use super::builder::BuildReport;
use super::reconcile::Reconciler;
use crate::error::{PathError, SyncError};
use crate::types::is_under;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of a forced resynchronization
#[derive(Debug)]
pub struct ResyncReport {
    pub build: BuildReport,
    pub pruned: Vec<String>,
}

impl Reconciler {
    pub async fn resync(&self, prune: bool) -> Result<ResyncReport, SyncError> {
        // compare against disk, not against what was last written
        self.index.clear();
        let build = self.build_file_system().await?;
        let pruned = if prune { self.prune(&build) } else { Vec::new() };
        self.stats.record_pruned(pruned.len());
        self.stats.record_resync();
        info!(
            written = build.written,
            unchanged = build.unchanged,
            failures = build.failures.len(),
            pruned = pruned.len(),
            "Forced resynchronization complete"
        );
        Ok(ResyncReport { build, pruned })
    }

    /// Remove mirrored entries the last build did not see
    ///
    /// Entries below a directory whose listing failed are left alone.
    pub fn prune(&self, build: &BuildReport) -> Vec<String> {
        let protected =
            |key: &str| build.failed_dirs.iter().any(|dir| is_under(key, dir));
        let mut pruned = Vec::new();

        let mut entries = WalkDir::new(self.mount.path()).min_depth(1).into_iter();
        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Failed to walk the mirror while pruning");
                    continue;
                }
            };
            let Some(key) = self.mount.key_for(entry.path()) else {
                continue;
            };
            if build.seen.contains(&key) || protected(&key) {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            debug!(key = %key, is_dir, "Pruning entry with no key/value counterpart");
            self.dynamic.delete_prefix(&key);
            self.index.remove_subtree(&key);
            let result = if is_dir {
                entries.skip_current_dir();
                self.fs.rmdir(entry.path())
            } else {
                self.fs.delete(entry.path())
            };
            match result {
                Ok(()) => pruned.push(key),
                Err(PathError::DoesNotExist(_)) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to prune entry"),
            }
        }
        pruned
    }
}
