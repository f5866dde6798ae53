//! Node Tree Builder
//!
//! Materializes the key/value tree into the mirror, one listing per directory. The build is
//! best effort: a child that fails is reported and its siblings are still processed.

use super::reconcile::{Reconciler, WriteOutcome};
use crate::error::SyncError;
use crate::types::{normalize_key, Node};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A child that could not be materialized
#[derive(Debug)]
pub struct BuildFailure {
    pub key: String,
    pub error: SyncError,
}

/// Outcome of one build pass
#[derive(Debug, Default)]
pub struct BuildReport {
    pub files: usize,
    pub directories: usize,
    pub written: usize,
    pub unchanged: usize,
    pub failures: Vec<BuildFailure>,
    /// Every key the key/value store listed during the pass
    pub seen: HashSet<String>,
    /// Directories whose listing failed; their mirrored contents are unknown
    pub failed_dirs: Vec<String>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, key: &str, error: SyncError) {
        warn!(key = %key, error = %error, "Failed to synchronize node");
        self.failures.push(BuildFailure {
            key: key.to_string(),
            error,
        });
    }
}

impl Reconciler {
    /// Build the whole mirror from the key/value root
    ///
    /// Only a failure to list the root itself is returned as an error.
    pub async fn build_file_system(&self) -> Result<BuildReport, SyncError> {
        info!(mount = %self.mount.path().display(), "Building the file system from the key/value store");
        let mut report = BuildReport::default();
        self.ensure_directory("/")?;
        report.seen.insert("/".to_string());

        let children = self.kv.list("/").await?;
        self.build_children(children, &mut report).await;

        info!(
            files = report.files,
            directories = report.directories,
            written = report.written,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            "Finished building the file system"
        );
        Ok(report)
    }

    /// Materialize the immediate children of `key`, recursing into directories
    pub fn build_directory<'a>(
        &'a self,
        key: &'a str,
        report: &'a mut BuildReport,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            debug!(key = %key, "Building directory");
            let children = self.kv.list(key).await?;
            self.build_children(children, report).await;
            Ok(())
        }
        .boxed()
    }

    async fn build_children(&self, children: Vec<Node>, report: &mut BuildReport) {
        for child in children {
            let key = normalize_key(&child.path);
            report.seen.insert(key.clone());

            if child.is_dir() {
                report.directories += 1;
                if let Err(e) = self.ensure_directory(&key) {
                    report.record_failure(&key, e);
                    report.failed_dirs.push(key);
                    continue;
                }
                if let Err(e) = self.build_directory(&key, report).await {
                    report.record_failure(&key, e);
                    report.failed_dirs.push(key);
                }
                continue;
            }

            report.files += 1;
            match self.build_file(&key, &child.value).await {
                Ok(WriteOutcome::Written) => report.written += 1,
                Ok(WriteOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => report.record_failure(&key, e),
            }
        }
    }

    async fn build_file(&self, key: &str, value: &str) -> Result<WriteOutcome, SyncError> {
        if let Some(resource) = self.dynamic.is_dynamic(key) {
            if resource.source() == value {
                let content = self.dynamic.content(&resource, false).await?;
                return self.write_file(key, &content);
            }
        }
        self.update_store_config_file(key, value).await
    }
}
