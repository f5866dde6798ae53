//! Event dispatch
//!
//! Events are routed to partition workers keyed by the first segment of their path. Segments
//! are hashed onto a fixed number of worker slots, so one segment always lands on the same
//! worker. Each worker applies its queue in delivery order, so changes to the same subtree
//! never race, while unrelated subtrees proceed in parallel. Workers hold the shared side of the tree
//! gate for each job; a forced resynchronization takes the exclusive side.

use super::reconcile::Reconciler;
use crate::types::{normalize_key, NodeChange};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// A unit of reconciliation work
#[derive(Debug, Clone)]
pub enum Job {
    /// A key/value change
    Node(NodeChange),
    /// A templated resource needs a re-render
    Template(String),
}

impl Job {
    pub fn path(&self) -> &str {
        match self {
            Job::Node(change) => &change.node.path,
            Job::Template(path) => path,
        }
    }

    /// First path segment; the root maps to the empty partition
    pub fn partition(&self) -> String {
        partition_of(self.path())
    }
}

pub fn partition_of(path: &str) -> String {
    normalize_key(path)
        .split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

struct Worker {
    queue: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

/// Routes jobs to a bounded set of partition workers
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    gate: Arc<RwLock<()>>,
    workers: Vec<Option<Worker>>,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>, worker_count: usize) -> Self {
        Self {
            reconciler,
            gate: Arc::new(RwLock::new(())),
            workers: (0..worker_count.max(1)).map(|_| None).collect(),
        }
    }

    fn slot_for(&self, partition: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        partition.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    /// Queue a job without waiting for it to run
    pub fn dispatch(&mut self, job: Job) {
        let partition = job.partition();
        let slot = self.slot_for(&partition);
        let job = match &self.workers[slot] {
            Some(worker) => match worker.queue.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => {
                    warn!(partition = %partition, slot, "Partition worker exited, restarting");
                    job
                }
            },
            None => job,
        };

        let worker = self.spawn_worker(slot);
        if worker.queue.send(job).is_err() {
            error!(partition = %partition, slot, "Failed to queue job on a fresh worker");
        }
        self.workers[slot] = Some(worker);
    }

    fn spawn_worker(&self, slot: usize) -> Worker {
        let (queue, mut rx) = mpsc::unbounded_channel::<Job>();
        let reconciler = Arc::clone(&self.reconciler);
        let gate = Arc::clone(&self.gate);

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let _shared = gate.read().await;
                match job {
                    Job::Node(change) => reconciler.handle_node_event(change).await,
                    Job::Template(path) => reconciler.handle_template_event(&path).await,
                }
            }
            debug!(slot, "Partition worker finished");
        });
        debug!(slot, "Started partition worker");
        Worker { queue, handle }
    }

    /// Start a forced resynchronization under the exclusive gate
    pub fn spawn_resync(&self, tasks: &mut JoinSet<()>, prune: bool) {
        let reconciler = Arc::clone(&self.reconciler);
        let gate = Arc::clone(&self.gate);
        tasks.spawn(async move {
            let _exclusive = gate.write().await;
            if let Err(e) = reconciler.resync(prune).await {
                reconciler.stats.record_failure();
                error!(error = %e, "Forced resynchronization failed");
            }
        });
    }

    /// Number of workers currently running
    pub fn worker_count(&self) -> usize {
        self.workers.iter().filter(|worker| worker.is_some()).count()
    }

    /// Close every queue and wait for the workers to apply what they already accepted
    pub async fn drain(&mut self) {
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .iter_mut()
            .filter_map(Option::take)
            .map(|worker| {
                drop(worker.queue);
                worker.handle
            })
            .collect();
        let worker_count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Partition worker failed");
            }
        }
        info!(worker_count, "Drained partition workers");
    }
}
