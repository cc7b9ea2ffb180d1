use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::DavError;
use crate::models::{DirectoryListing, FileInfo};
use super::connection::RemoteConnection;

/// The remote primitive a recorded call or injected failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    CreateContainer,
    Put,
    Get,
    Move,
    Delete,
    Stat,
}

/// One call received by an [`InMemoryConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub url: String,
    pub destination: Option<String>,
}

#[derive(Debug, Clone)]
enum Node {
    Container {
        modified: DateTime<Utc>,
        version: u64,
    },
    File {
        data: Bytes,
        modified: DateTime<Utc>,
        version: u64,
    },
}

#[derive(Default)]
struct State {
    /// Keyed by decoded path without trailing slash; the root is implicit
    nodes: BTreeMap<String, Node>,
    calls: Vec<RecordedCall>,
    failures: HashMap<Operation, VecDeque<DavError>>,
    /// Failures bound to the n-th call (0-based) of an operation
    scheduled: HashMap<Operation, Vec<(usize, DavError)>>,
    next_version: u64,
}

/// A `RemoteConnection` backed by an in-process tree.
///
/// It follows the same status semantics as [`WebDAVConnection`](super::WebDAVConnection)
/// (MKCOL on an existing path is `AlreadyExists`, PUT or MKCOL under a missing
/// parent is `NotFound`, MOVE onto an existing path without overwrite is
/// `Conflict`), records every call, and can inject failures and latency.
/// Host and port are ignored; only the URL path addresses a node.
#[derive(Default)]
pub struct InMemoryConnection {
    state: Mutex<State>,
    put_latency: Mutex<Option<Duration>>,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `operation` call fails with `error` instead of running.
    /// Multiple injections for the same operation are consumed in order.
    pub fn inject_failure(&self, operation: Operation, error: DavError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Lets the next `skip` calls of `operation` run, then fails the one after
    /// with `error`.
    pub fn inject_failure_after(&self, operation: Operation, skip: usize, error: DavError) {
        let mut state = self.lock();
        let seen = state.calls.iter().filter(|c| c.operation == operation).count();
        state
            .scheduled
            .entry(operation)
            .or_default()
            .push((seen + skip, error));
    }

    /// Every `put` sleeps this long before storing its bytes
    pub fn set_put_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.put_latency.lock() {
            *guard = Some(latency);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Seeds a file, creating missing parents
    pub fn insert_file(&self, url: &Url, data: impl Into<Bytes>) {
        let key = node_key(url);
        let mut state = self.lock();
        let mut prefix = String::new();
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        if let Some((_, parents)) = segments.split_last() {
            for segment in parents {
                prefix.push('/');
                prefix.push_str(segment);
                let version = state.bump_version();
                state.nodes.entry(prefix.clone()).or_insert(Node::Container {
                    modified: Utc::now(),
                    version,
                });
            }
        }
        let version = state.bump_version();
        state.nodes.insert(
            key,
            Node::File {
                data: data.into(),
                modified: Utc::now(),
                version,
            },
        );
    }

    /// Removes a node and everything below it, as a concurrent client would
    pub fn remove(&self, url: &Url) {
        let key = node_key(url);
        let mut state = self.lock();
        state.remove_subtree(&key);
    }

    pub fn exists(&self, url: &Url) -> bool {
        let key = node_key(url);
        key.is_empty() || self.lock().nodes.contains_key(&key)
    }

    pub fn is_container(&self, url: &Url) -> bool {
        let key = node_key(url);
        key.is_empty() || matches!(self.lock().nodes.get(&key), Some(Node::Container { .. }))
    }

    pub fn read(&self, url: &Url) -> Option<Bytes> {
        match self.lock().nodes.get(&node_key(url)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Paths of all stored nodes, decoded and without trailing slashes
    pub fn paths(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Every mutation is a single map operation, so a poisoned tree is
        // still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call and returns an injected failure, if one is queued
    fn begin(&self, operation: Operation, url: &Url, destination: Option<&Url>) -> Result<(), DavError> {
        let mut state = self.lock();
        let index = state.calls.iter().filter(|c| c.operation == operation).count();
        state.calls.push(RecordedCall {
            operation,
            url: url.to_string(),
            destination: destination.map(|d| d.to_string()),
        });

        let scheduled = state.scheduled.get_mut(&operation).and_then(|pending| {
            let at = pending.iter().position(|(n, _)| *n == index)?;
            Some(pending.remove(at).1)
        });

        match scheduled.or_else(|| state.failures.get_mut(&operation).and_then(|q| q.pop_front())) {
            Some(error) => {
                debug!("Injected failure for {:?} on {}: {}", operation, url, error);
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl State {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn is_container(&self, key: &str) -> bool {
        key.is_empty() || matches!(self.nodes.get(key), Some(Node::Container { .. }))
    }

    fn children(&self, key: &str) -> Vec<(String, Node)> {
        let prefix = format!("{}/", key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }

    fn subtree_keys(&self, key: &str) -> Vec<String> {
        let prefix = format!("{}/", key);
        let mut keys: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if self.nodes.contains_key(key) {
            keys.push(key.to_string());
        }
        keys
    }

    fn remove_subtree(&mut self, key: &str) -> Vec<(String, Node)> {
        self.subtree_keys(key)
            .into_iter()
            .filter_map(|k| self.nodes.remove(&k).map(|n| (k, n)))
            .collect()
    }
}

/// Decoded URL path without trailing slash; the root maps to ""
fn node_key(url: &Url) -> String {
    let path = urlencoding::decode(url.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| url.path().to_string());
    path.trim_end_matches('/').to_string()
}

fn parent_key(key: &str) -> String {
    match key.rfind('/') {
        Some(cut) => key[..cut].to_string(),
        None => String::new(),
    }
}

fn href_for(key: &str, is_container: bool) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    let mut href = encoded.join("/");
    if is_container {
        href.push('/');
    }
    href
}

fn file_info(key: &str, node: &Node) -> FileInfo {
    let name = key.rsplit('/').next().unwrap_or("").to_string();
    match node {
        Node::Container { modified, version } => FileInfo {
            path: href_for(key, true),
            name,
            size: 0,
            mime_type: "httpd/unix-directory".to_string(),
            last_modified: Some(*modified),
            etag: format!("\"{}\"", version),
            is_directory: true,
        },
        Node::File { data, modified, version } => FileInfo {
            path: href_for(key, false),
            name,
            size: data.len() as i64,
            mime_type: "application/octet-stream".to_string(),
            last_modified: Some(*modified),
            etag: format!("\"{}\"", version),
            is_directory: false,
        },
    }
}

#[async_trait]
impl RemoteConnection for InMemoryConnection {
    async fn list(&self, container: &Url) -> Result<DirectoryListing, DavError> {
        self.begin(Operation::List, container, None)?;
        let key = node_key(container);
        let state = self.lock();

        if let Some(Node::File { .. }) = state.nodes.get(&key) {
            return Err(DavError::conflict(container.as_str(), "a file exists at this path"));
        }
        if !state.is_container(&key) {
            return Err(DavError::not_found(container.as_str()));
        }

        let files = state
            .children(&key)
            .iter()
            .map(|(k, n)| file_info(k, n))
            .collect();

        Ok(DirectoryListing {
            files,
            server_date: Utc::now(),
        })
    }

    async fn create_container(&self, url: &Url) -> Result<(), DavError> {
        self.begin(Operation::CreateContainer, url, None)?;
        let key = node_key(url);
        let mut state = self.lock();

        if key.is_empty() || state.nodes.contains_key(&key) {
            return Err(DavError::already_exists(url.as_str()));
        }
        if !state.is_container(&parent_key(&key)) {
            return Err(DavError::not_found(url.as_str()));
        }

        let version = state.bump_version();
        state.nodes.insert(
            key,
            Node::Container {
                modified: Utc::now(),
                version,
            },
        );
        Ok(())
    }

    async fn put(&self, data: Bytes, url: &Url) -> Result<(), DavError> {
        self.begin(Operation::Put, url, None)?;

        let latency = self.put_latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let key = node_key(url);
        let mut state = self.lock();

        if !state.is_container(&parent_key(&key)) {
            return Err(DavError::not_found(url.as_str()));
        }
        if state.is_container(&key) {
            return Err(DavError::conflict(url.as_str(), "a container exists at this path"));
        }

        let version = state.bump_version();
        state.nodes.insert(
            key,
            Node::File {
                data,
                modified: Utc::now(),
                version,
            },
        );
        Ok(())
    }

    async fn get(&self, url: &Url) -> Result<Bytes, DavError> {
        self.begin(Operation::Get, url, None)?;
        self.read(url)
            .ok_or_else(|| DavError::not_found(url.as_str()))
    }

    async fn move_resource(
        &self,
        source: &Url,
        destination: &Url,
        overwrite: bool,
    ) -> Result<Url, DavError> {
        self.begin(Operation::Move, source, Some(destination))?;
        let source_key = node_key(source);
        let destination_key = node_key(destination);
        let mut state = self.lock();

        if source_key.is_empty() || !state.nodes.contains_key(&source_key) {
            return Err(DavError::not_found(source.as_str()));
        }
        if destination_key.is_empty() || source_key == destination_key {
            return Err(DavError::conflict(destination.as_str(), "source and destination are the same"));
        }
        if !state.is_container(&parent_key(&destination_key)) {
            return Err(DavError::not_found(destination.as_str()));
        }
        if state.nodes.contains_key(&destination_key) {
            if !overwrite {
                return Err(DavError::conflict(destination.as_str(), "destination already exists"));
            }
            state.remove_subtree(&destination_key);
        }

        // Nodes move as a single map update under the lock, so no reader
        // can see a half-moved tree.
        let moved = state.remove_subtree(&source_key);
        for (key, node) in moved {
            let relocated = format!("{}{}", destination_key, &key[source_key.len()..]);
            state.nodes.insert(relocated, node);
        }

        Ok(destination.clone())
    }

    async fn delete(&self, url: &Url) -> Result<(), DavError> {
        self.begin(Operation::Delete, url, None)?;
        let key = node_key(url);
        let mut state = self.lock();

        if key.is_empty() || !state.nodes.contains_key(&key) {
            return Err(DavError::not_found(url.as_str()));
        }
        state.remove_subtree(&key);
        Ok(())
    }

    async fn stat(&self, url: &Url) -> Result<FileInfo, DavError> {
        self.begin(Operation::Stat, url, None)?;
        let key = node_key(url);
        let state = self.lock();

        match state.nodes.get(&key) {
            Some(node) => Ok(file_info(&key, node)),
            None if key.is_empty() => Ok(FileInfo {
                path: "/".to_string(),
                name: String::new(),
                size: 0,
                mime_type: "httpd/unix-directory".to_string(),
                last_modified: None,
                etag: String::new(),
                is_directory: true,
            }),
            None => Err(DavError::not_found(url.as_str())),
        }
    }
}
