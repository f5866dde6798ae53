//! Dynamic Resources
//!
//! Key/value leaves whose value starts with the dynamic prefix are templates. They are
//! rendered before being mirrored and stay registered so that a change to any key the
//! template reads can trigger a re-render.

pub mod template;

pub use template::Template;

use crate::error::RenderError;
use crate::kv::{KvStore, WatchHandle};
use crate::types::{is_under, normalize_key};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default marker identifying templated values
pub const DEFAULT_DYNAMIC_PREFIX: &str = "$TEMPLATE$";

/// Channel carrying paths whose resource needs a re-render
pub type DynamicUpdateSender = mpsc::Sender<String>;

/// A registered template bound to one key path
#[derive(Debug)]
pub struct DynamicResource {
    path: String,
    source: String,
    template: Template,
    content: Mutex<String>,
    stale: Arc<AtomicBool>,
    watches: Vec<WatchHandle>,
}

impl DynamicResource {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw key/value value, prefix included
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Last rendered content
    pub fn cached_content(&self) -> String {
        self.content.lock().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn release(&self) {
        for watch in &self.watches {
            watch.cancel();
        }
    }
}

/// Registry and renderer for dynamic resources
#[async_trait]
pub trait DynamicStore: Send + Sync {
    /// Look up the registered resource for a path
    fn is_dynamic(&self, path: &str) -> Option<Arc<DynamicResource>>;

    /// Whether a value carries the dynamic marker
    fn is_dynamic_content(&self, path: &str, value: &str) -> bool;

    /// Register a resource, subscribe it to re-render notifications and return its content
    async fn create(
        &self,
        path: &str,
        value: &str,
        notify: DynamicUpdateSender,
    ) -> Result<String, RenderError>;

    /// Unregister a resource; returns whether one was registered
    fn delete(&self, path: &str) -> bool;

    /// Unregister every resource at or below `prefix`
    fn delete_prefix(&self, prefix: &str) -> Vec<String>;

    /// Rendered content, re-rendering when forced or when the resource went stale
    async fn content(
        &self,
        resource: &DynamicResource,
        force: bool,
    ) -> Result<String, RenderError>;

    /// Registered paths
    fn paths(&self) -> Vec<String>;
}

/// `DynamicStore` rendering templates against a key/value store
pub struct TemplateStore {
    prefix: String,
    kv: Arc<dyn KvStore>,
    resources: RwLock<HashMap<String, Arc<DynamicResource>>>,
}

impl TemplateStore {
    pub fn new(prefix: impl Into<String>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            prefix: prefix.into(),
            kv,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn template_text<'a>(&self, value: &'a str) -> &'a str {
        value.strip_prefix(self.prefix.as_str()).unwrap_or(value)
    }

    /// Watch one key and forward its changes as re-render requests for `path`
    async fn subscribe(
        &self,
        key: &str,
        path: &str,
        stale: Arc<AtomicBool>,
        notify: DynamicUpdateSender,
    ) -> Result<WatchHandle, RenderError> {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = self.kv.watch(key, tx).await?;
        let forward = handle.clone();
        let path = path.to_string();

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = forward.cancelled() => break,
                    change = rx.recv() => change,
                };
                let Some(change) = change else { break };
                debug!(path = %path, change = %change, "Template dependency changed");
                stale.store(true, Ordering::SeqCst);
                if notify.send(path.clone()).await.is_err() {
                    break;
                }
            }
        });
        Ok(handle)
    }
}

#[async_trait]
impl DynamicStore for TemplateStore {
    fn is_dynamic(&self, path: &str) -> Option<Arc<DynamicResource>> {
        self.resources.read().get(&normalize_key(path)).cloned()
    }

    fn is_dynamic_content(&self, _path: &str, value: &str) -> bool {
        value.starts_with(self.prefix.as_str())
    }

    async fn create(
        &self,
        path: &str,
        value: &str,
        notify: DynamicUpdateSender,
    ) -> Result<String, RenderError> {
        let path = normalize_key(path);
        let template = Template::parse(self.template_text(value))?;

        // watches go up before the first render so no dependency change is missed
        let stale = Arc::new(AtomicBool::new(false));
        let mut watches = Vec::new();
        for key in template.keys() {
            match self.subscribe(&key, &path, Arc::clone(&stale), notify.clone()).await {
                Ok(handle) => watches.push(handle),
                Err(e) => {
                    watches.iter().for_each(WatchHandle::cancel);
                    return Err(e);
                }
            }
        }

        let content = match template.render(self.kv.as_ref()).await {
            Ok(content) => content,
            Err(e) => {
                watches.iter().for_each(WatchHandle::cancel);
                return Err(e);
            }
        };

        let resource = Arc::new(DynamicResource {
            path: path.clone(),
            source: value.to_string(),
            template,
            content: Mutex::new(content.clone()),
            stale,
            watches,
        });
        if let Some(previous) = self.resources.write().insert(path.clone(), resource) {
            warn!(path = %path, "Replacing an existing dynamic resource");
            previous.release();
        }
        debug!(path = %path, "Registered dynamic resource");
        Ok(content)
    }

    fn delete(&self, path: &str) -> bool {
        match self.resources.write().remove(&normalize_key(path)) {
            Some(resource) => {
                resource.release();
                debug!(path = %resource.path, "Unregistered dynamic resource");
                true
            }
            None => false,
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize_key(prefix);
        let mut resources = self.resources.write();
        let doomed: Vec<String> = resources
            .keys()
            .filter(|path| is_under(path, &prefix))
            .cloned()
            .collect();
        for path in &doomed {
            if let Some(resource) = resources.remove(path) {
                resource.release();
            }
        }
        doomed
    }

    async fn content(
        &self,
        resource: &DynamicResource,
        force: bool,
    ) -> Result<String, RenderError> {
        let stale = resource.stale.swap(false, Ordering::SeqCst);
        if !force && !stale {
            return Ok(resource.cached_content());
        }
        match resource.template.render(self.kv.as_ref()).await {
            Ok(content) => {
                *resource.content.lock() = content.clone();
                Ok(content)
            }
            Err(e) => {
                resource.stale.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.resources.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}
