//! Synchronization Engine
//!
//! `ConfigurationStore` keeps the mirror convergent with the key/value tree. After an
//! optional initial build it multiplexes five event sources (key/value changes, template
//! re-render requests, filesystem notifications, the resync timer and shutdown) and hands
//! reconciliation work to partition workers without waiting for it.

pub mod builder;
pub mod dispatch;
pub mod reconcile;
pub mod resync;
pub mod stats;

pub use builder::{BuildFailure, BuildReport};
pub use dispatch::{Dispatcher, Job};
pub use reconcile::{Reconciler, WriteOutcome};
pub use resync::ResyncReport;
pub use stats::{SyncStats, SyncStatsSnapshot};

use crate::config::SyncConfig;
use crate::dynamic::{DynamicStore, TemplateStore};
use crate::error::{KvError, SyncError};
use crate::fs::{FileStore, LocalFileStore};
use crate::kv::{new_kv_store, KvStore, WatchHandle};
use crate::mirror::{MirrorIndex, MountPoint};
use crate::types::NodeChange;
use crate::watch::{FileNotification, MountWatcher};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Engine lifecycle: `Init → Presync (optional) → Running → ShuttingDown → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Init,
    Presync,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::Presync => "presync",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Receivers consumed once by `synchronize`
struct Channels {
    shutdown: mpsc::Receiver<()>,
    dynamic: mpsc::Receiver<String>,
}

/// The mirror engine
pub struct ConfigurationStore {
    config: SyncConfig,
    reconciler: Arc<Reconciler>,
    stats: Arc<SyncStats>,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: mpsc::Sender<()>,
    channels: Mutex<Option<Channels>>,
}

/// Handle on a running engine
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<Result<(), SyncError>>,
}

impl SyncHandle {
    /// Wait until the engine reaches `Stopped`
    pub async fn wait(self) -> Result<(), SyncError> {
        self.task
            .await
            .map_err(|e| SyncError::Task(format!("Synchronization loop failed: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl ConfigurationStore {
    /// Create an engine from configuration, connecting to the configured backend
    pub async fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let config = config.validated()?;
        let kv = new_kv_store(&config.store_url)
            .await
            .map_err(startup_error)?;
        let dynamic: Arc<dyn DynamicStore> =
            Arc::new(TemplateStore::new(config.dynamic_prefix.clone(), Arc::clone(&kv)));
        Ok(Self::with_components(
            config,
            kv,
            Arc::new(LocalFileStore::new()),
            dynamic,
        ))
    }

    /// Create an engine over explicit collaborators
    pub fn with_components(
        config: SyncConfig,
        kv: Arc<dyn KvStore>,
        fs: Arc<dyn FileStore>,
        dynamic: Arc<dyn DynamicStore>,
    ) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (dynamic_tx, dynamic_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let stats = Arc::new(SyncStats::default());
        let reconciler = Arc::new(Reconciler::new(
            kv,
            fs,
            dynamic,
            MountPoint::new(&config.mount_point),
            Arc::clone(&stats),
            dynamic_tx,
        ));
        let (state, _) = watch::channel(LifecycleState::Init);

        Self {
            config,
            reconciler,
            stats,
            state: Arc::new(state),
            shutdown: shutdown_tx,
            channels: Mutex::new(Some(Channels {
                shutdown: shutdown_rx,
                dynamic: dynamic_rx,
            })),
        }
    }

    /// Build the mirror (if pre-sync is enabled) and start serving live events
    ///
    /// Failing to create the mount point, to build the tree or to watch the key/value root
    /// aborts startup.
    pub async fn synchronize(&self) -> Result<SyncHandle, SyncError> {
        let channels = self.channels.lock().take().ok_or_else(|| {
            SyncError::Configuration("The synchronization engine was already started".to_string())
        })?;
        match self.start(channels).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                error!(error = %e, "Failed to start configuration synchronization");
                self.state.send_replace(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    async fn start(&self, channels: Channels) -> Result<SyncHandle, SyncError> {
        let reconciler = Arc::clone(&self.reconciler);
        let mount = reconciler.mount.path();
        info!(
            mount = %mount.display(),
            store = %reconciler.kv.url(),
            read_only = self.config.read_only,
            "Starting the configuration synchronization"
        );
        reconciler.fs.mkdirp(&mount)?;

        if self.config.pre_sync {
            self.state.send_replace(LifecycleState::Presync);
            info!("Performing a preliminary synchronization of the file system");
            reconciler.build_file_system().await?;
        }

        let capacity = self.config.channel_capacity.max(1);
        let (node_tx, node_rx) = mpsc::channel(capacity);
        let root_watch = reconciler.kv.watch("/", node_tx).await?;

        let (fs_tx, fs_rx) = mpsc::channel(capacity);
        let fs_watcher = if self.config.watch_mount {
            match MountWatcher::start(&mount, fs_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(mount = %mount.display(), error = %e, "Unable to watch the mount point");
                    None
                }
            }
        } else {
            None
        };

        let ticker = if self.config.interval_secs > 0 {
            let period = Duration::from_secs(self.config.interval_secs);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(ticker)
        } else {
            None
        };

        self.state.send_replace(LifecycleState::Running);
        let event_loop = EventLoop {
            reconciler,
            stats: Arc::clone(&self.stats),
            state: Arc::clone(&self.state),
            node_rx,
            dynamic_rx: channels.dynamic,
            fs_rx,
            shutdown_rx: channels.shutdown,
            ticker,
            prune: self.config.prune_on_resync,
            delete_on_exit: self.config.delete_on_exit,
            worker_count: self.config.worker_count,
        };
        let task = tokio::spawn(event_loop.run(root_watch, fs_watcher));
        Ok(SyncHandle { task })
    }

    /// Request shutdown; returns immediately
    pub fn close(&self) {
        match self.shutdown.try_send(()) {
            Ok(()) => info!("Shutdown requested"),
            Err(mpsc::error::TrySendError::Full(())) => {
                warn!("A shutdown request is already pending, ignoring")
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Synchronization already stopped")
            }
        }
    }

    /// Remove the whole mirror from disk
    pub fn delete_configuration(&self) -> Result<(), SyncError> {
        self.reconciler.delete_configuration()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn mount_point(&self) -> &MountPoint {
        &self.reconciler.mount
    }

    pub fn dynamic_store(&self) -> Arc<dyn DynamicStore> {
        Arc::clone(&self.reconciler.dynamic)
    }

    pub fn kv_store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.reconciler.kv)
    }

    pub fn mirror_index(&self) -> &MirrorIndex {
        self.reconciler.mirror_index()
    }
}

fn startup_error(err: KvError) -> SyncError {
    match err {
        KvError::InvalidUrl(_) | KvError::UnsupportedScheme(_) | KvError::Unreachable(_) => {
            SyncError::Configuration(err.to_string())
        }
        other => SyncError::Kv(other),
    }
}

/// State owned by the running coordinator task
struct EventLoop {
    reconciler: Arc<Reconciler>,
    stats: Arc<SyncStats>,
    state: Arc<watch::Sender<LifecycleState>>,
    node_rx: mpsc::Receiver<NodeChange>,
    dynamic_rx: mpsc::Receiver<String>,
    fs_rx: mpsc::Receiver<FileNotification>,
    shutdown_rx: mpsc::Receiver<()>,
    ticker: Option<Interval>,
    prune: bool,
    delete_on_exit: bool,
    worker_count: usize,
}

impl EventLoop {
    async fn run(
        mut self,
        root_watch: WatchHandle,
        fs_watcher: Option<MountWatcher>,
    ) -> Result<(), SyncError> {
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.reconciler), self.worker_count);
        let mut resyncs: JoinSet<()> = JoinSet::new();
        info!("Entering the synchronization loop");

        loop {
            // shutdown is checked last so everything delivered before close() is dispatched
            tokio::select! {
                biased;

                Some(change) = self.node_rx.recv() => {
                    dispatcher.dispatch(Job::Node(change));
                }
                Some(path) = self.dynamic_rx.recv() => {
                    dispatcher.dispatch(Job::Template(path));
                }
                Some(notification) = self.fs_rx.recv() => {
                    self.observe(&notification);
                }
                _ = next_tick(&mut self.ticker) => {
                    if resyncs.is_empty() {
                        info!("Forcing a resynchronization of the file system");
                        dispatcher.spawn_resync(&mut resyncs, self.prune);
                    } else {
                        debug!("Resynchronization still running, skipping tick");
                    }
                }
                Some(result) = resyncs.join_next(), if !resyncs.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Resynchronization task failed");
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Received shutdown request");
                    break;
                }
            }
        }

        self.state.send_replace(LifecycleState::ShuttingDown);
        root_watch.cancel();
        drop(fs_watcher);
        dispatcher.drain().await;
        while let Some(result) = resyncs.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Resynchronization task failed");
            }
        }

        let result = if self.delete_on_exit {
            self.reconciler.delete_configuration()
        } else {
            Ok(())
        };
        self.state.send_replace(LifecycleState::Stopped);
        info!("Configuration synchronization stopped");
        result
    }

    fn observe(&self, notification: &FileNotification) {
        self.stats.record_fs_event();
        let key = self.reconciler.mount.key_for(notification.path());
        debug!(
            notification = %notification,
            key = ?key,
            "Observed a change under the mount point"
        );
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
