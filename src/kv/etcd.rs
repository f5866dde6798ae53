//! etcd v2 keys API backend
//!
//! Talks plain HTTP/JSON to `/v2/keys`. Watches are long-polls with `wait=true`, resumed from
//! the last seen `modifiedIndex` so no change is skipped between polls. The first poll starts
//! right after the newest `X-Etcd-Index` the client has observed, so changes made after the
//! preliminary listing still reach the watch.

use super::{KvStore, NodeUpdateSender, WatchHandle};
use crate::error::KvError;
use crate::types::{normalize_key, Node, NodeChange, NodeKind, Operation};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: u16 = 4001;
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);
const INDEX_HEADER: &str = "X-Etcd-Index";

/// etcd error code for "key already exists"
const ERROR_NODE_EXIST: u64 = 105;
/// etcd error code for "not a file" (returned when the target is a directory)
const ERROR_NOT_FILE: u64 = 102;
/// etcd error code for "the requested history has been cleared"
const ERROR_EVENT_INDEX_CLEARED: u64 = 401;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: String,
    node: EtcdNode,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    #[serde(rename = "modifiedIndex", default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: u64,
}

impl EtcdNode {
    fn into_node(self) -> Node {
        let path = normalize_key(self.key.as_deref().unwrap_or("/"));
        if self.dir {
            Node::directory(path)
        } else {
            Node::file(path, self.value.unwrap_or_default())
        }
    }
}

/// Map an etcd action to the watch operation it represents
fn operation_for(action: &str) -> Option<Operation> {
    match action {
        "set" | "create" | "update" | "compareAndSwap" => Some(Operation::Changed),
        "delete" | "expire" | "compareAndDelete" => Some(Operation::Deleted),
        _ => None,
    }
}

/// Map a non-success response body to the error it represents
fn error_from_body(key: &str, status: StatusCode, body: &[u8]) -> KvError {
    if status == StatusCode::NOT_FOUND {
        return KvError::NotFound(key.to_string());
    }
    match serde_json::from_slice::<EtcdErrorBody>(body) {
        Ok(err) if err.error_code == ERROR_EVENT_INDEX_CLEARED => KvError::HistoryCleared(err.index),
        Ok(err) => KvError::Backend(format!(
            "etcd error {}: {} ({})",
            err.error_code,
            err.message,
            err.cause.unwrap_or_default()
        )),
        Err(_) => KvError::Backend(format!("etcd returned {}", status)),
    }
}

/// The cluster index a response was served at
fn response_index(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(INDEX_HEADER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// etcd v2 client
pub struct EtcdKvStore {
    url: String,
    endpoint: String,
    client: Client,
    /// Newest `X-Etcd-Index` seen on any response
    last_index: Arc<AtomicU64>,
}

impl EtcdKvStore {
    /// Build a client for `etcd://host[:port]` without contacting the cluster
    pub fn new(url: &str, uri: &Url) -> Result<Self, KvError> {
        let host = uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| KvError::InvalidUrl(format!("{}: missing host", url)))?;
        let port = uri.port().unwrap_or(DEFAULT_PORT);
        Ok(Self {
            url: url.to_string(),
            endpoint: format!("http://{}:{}", host, port),
            client: Client::new(),
            last_index: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build a client and verify the cluster answers
    pub async fn connect(url: &str, uri: &Url) -> Result<Self, KvError> {
        let store = Self::new(url, uri)?;
        let version_url = format!("{}/version", store.endpoint);
        let response = store
            .client
            .get(&version_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| KvError::Unreachable(format!("{}: {}", store.endpoint, e)))?;
        if !response.status().is_success() {
            return Err(KvError::Unreachable(format!(
                "{}: version check returned {}",
                store.endpoint,
                response.status()
            )));
        }
        info!(endpoint = %store.endpoint, "Connected to etcd");
        Ok(store)
    }

    fn keys_url(&self, key: &str) -> String {
        let key = normalize_key(key);
        if key == "/" {
            format!("{}/v2/keys/", self.endpoint)
        } else {
            format!("{}/v2/keys{}", self.endpoint, key)
        }
    }

    async fn decode(key: &str, response: Response) -> Result<EtcdResponse, KvError> {
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }
        Err(error_from_body(key, status, &body))
    }

    /// Remember the cluster index a response was served at
    fn observe_index(&self, response: &Response) {
        if let Some(index) = response_index(response) {
            self.last_index.fetch_max(index, Ordering::SeqCst);
        }
    }

    /// Index the first watch poll should wait from
    async fn watch_start(&self, watch_url: &str) -> Option<u64> {
        let observed = self.last_index.load(Ordering::SeqCst);
        if observed > 0 {
            return Some(observed + 1);
        }
        match self.client.get(watch_url).send().await {
            Ok(response) => response_index(&response).map(|index| index + 1),
            Err(e) => {
                warn!(error = %e, "Unable to read the current etcd index, watching from now");
                None
            }
        }
    }

    /// Decode an error response, returning its etcd error code when present
    async fn error_code(response: Response) -> Result<Option<u64>, KvError> {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice::<EtcdErrorBody>(&body)
            .ok()
            .map(|err| err.error_code))
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self, key: &str) -> Result<Node, KvError> {
        let response = self.client.get(self.keys_url(key)).send().await?;
        self.observe_index(&response);
        Ok(Self::decode(key, response).await?.node.into_node())
    }

    async fn list(&self, path: &str) -> Result<Vec<Node>, KvError> {
        let response = self.client.get(self.keys_url(path)).send().await?;
        self.observe_index(&response);
        let listing = Self::decode(path, response).await?;
        if !listing.node.dir {
            return Err(KvError::Backend(format!("Not a directory: {}", path)));
        }
        Ok(listing
            .node
            .nodes
            .into_iter()
            .map(EtcdNode::into_node)
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let response = self
            .client
            .put(self.keys_url(key))
            .form(&[("value", value)])
            .send()
            .await?;
        Self::decode(key, response).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let response = self.client.delete(self.keys_url(key)).send().await?;
        Self::decode(key, response).await.map(|_| ())
    }

    async fn remove_path(&self, path: &str) -> Result<(), KvError> {
        let response = self
            .client
            .delete(self.keys_url(path))
            .query(&[("recursive", "true")])
            .send()
            .await?;
        Self::decode(path, response).await.map(|_| ())
    }

    async fn mkdir(&self, path: &str) -> Result<(), KvError> {
        let response = self
            .client
            .put(self.keys_url(path))
            .query(&[("dir", "true")])
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        match Self::error_code(response).await? {
            // already present as a directory
            Some(ERROR_NODE_EXIST) | Some(ERROR_NOT_FILE) => Ok(()),
            Some(code) => Err(KvError::Backend(format!("mkdir {} failed: etcd error {}", path, code))),
            None => Err(KvError::Backend(format!("mkdir {} failed", path))),
        }
    }

    async fn watch(&self, key: &str, updates: NodeUpdateSender) -> Result<WatchHandle, KvError> {
        let handle = WatchHandle::new();
        let watch_handle = handle.clone();
        let client = self.client.clone();
        let watch_url = self.keys_url(key);
        let key = normalize_key(key);
        let mut wait_index = self.watch_start(&watch_url).await;
        debug!(key = %key, wait_index = ?wait_index, "Starting etcd watch");

        tokio::spawn(async move {
            loop {
                let mut request = client
                    .get(&watch_url)
                    .query(&[("wait", "true"), ("recursive", "true")]);
                if let Some(index) = wait_index {
                    request = request.query(&[("waitIndex", index.to_string())]);
                }

                let outcome = tokio::select! {
                    _ = watch_handle.cancelled() => break,
                    response = request.send() => response,
                };

                let decoded = match outcome {
                    Ok(response) => Self::decode(&key, response).await,
                    Err(e) => Err(KvError::from(e)),
                };

                match decoded {
                    Ok(event) => {
                        wait_index = Some(event.node.modified_index + 1);
                        let Some(operation) = operation_for(&event.action) else {
                            debug!(action = %event.action, "Ignoring etcd action");
                            continue;
                        };
                        let change = NodeChange {
                            operation,
                            node: event.node.into_node(),
                        };
                        if updates.send(change).await.is_err() {
                            debug!(key = %key, "Watch receiver dropped, ending watch");
                            break;
                        }
                    }
                    Err(KvError::HistoryCleared(current)) => {
                        error!(
                            key = %key,
                            requested = ?wait_index,
                            current,
                            "etcd cleared the watch history, changes in between were lost until the next resync"
                        );
                        wait_index = Some(current + 1);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Watch poll failed, retrying");
                        tokio::select! {
                            _ = watch_handle.cancelled() => break,
                            _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                        }
                    }
                }
            }
            debug!(key = %key, "Watch loop finished");
        });

        Ok(handle)
    }
}
