//! In-process document store.
//!
//! Data is one JSON tree addressed by slash-separated paths. Writing a path
//! replaces its whole subtree; writing `null` or an empty object deletes it,
//! and parents left empty are pruned. Transactions compare the value they
//! computed from against the value present at commit time and re-run on
//! mismatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use opshub_protocol::DEFAULT_MAX_TRANSACTION_RETRIES;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{
    DocumentStore, Snapshot, StoreError, StoreFuture, Subscription, TxCommit, TxDecision, TxUpdate,
};

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Attempts a transaction gets before failing with `TooManyRetries`.
    pub max_transaction_retries: u32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_retries: DEFAULT_MAX_TRANSACTION_RETRIES,
        }
    }
}

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<Snapshot>,
    last: Option<Value>,
}

struct Inner {
    root: Value,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    denied_prefixes: Vec<String>,
    offline: bool,
    writes: u64,
}

pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root: Value::Object(Map::new()),
                watchers: HashMap::new(),
                next_watcher_id: 0,
                denied_prefixes: Vec::new(),
                offline: false,
                writes: 0,
            })),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronous read backing [`DocumentStore::read`].
    pub fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let path = normalize(path)?;
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.get(&path).cloned())
    }

    /// Synchronous replace backing [`DocumentStore::write`].
    pub fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let path = normalize(path)?;
        let mut inner = self.lock();
        inner.check_online()?;
        inner.check_writable(&path)?;
        inner.set(&path, value);
        inner.notify(&path);
        Ok(())
    }

    /// Synchronous delete backing [`DocumentStore::remove`].
    pub fn delete(&self, path: &str) -> Result<(), StoreError> {
        let path = normalize(path)?;
        let mut inner = self.lock();
        inner.check_online()?;
        inner.check_writable(&path)?;
        inner.set(&path, Value::Null);
        inner.notify(&path);
        Ok(())
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.lock().offline = !available;
        tracing::info!(available, "Memory store availability changed");
    }

    /// Reject every write at or below `prefix`, like a security rule would.
    pub fn deny_writes(&self, prefix: &str) {
        let prefix = prefix.trim_matches('/').to_string();
        let mut inner = self.lock();
        if !inner.denied_prefixes.contains(&prefix) {
            inner.denied_prefixes.push(prefix);
        }
    }

    pub fn allow_all_writes(&self) {
        self.lock().denied_prefixes.clear();
    }

    /// Number of committed mutations since the store was created.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().watchers.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

enum Attempt {
    Done(TxCommit),
    Conflict,
}

impl DocumentStore for MemoryStore {
    fn read<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move { self.get(path) })
    }

    fn transaction<'a>(&'a self, path: &'a str, update: TxUpdate<'a>) -> StoreFuture<'a, TxCommit> {
        Box::pin(async move {
            let path = normalize(path)?;
            let max_attempts = self.config.max_transaction_retries.max(1);

            for attempt in 1..=max_attempts {
                let seen = {
                    let inner = self.lock();
                    inner.check_online()?;
                    inner.check_writable(&path)?;
                    inner.get(&path).cloned()
                };

                // The update function runs without the lock held so that other
                // writers can interleave; the commit below detects them.
                let decision = update(seen.as_ref());

                let outcome = {
                    let mut inner = self.lock();
                    inner.check_online()?;
                    match decision {
                        TxDecision::Abort => Attempt::Done(TxCommit {
                            committed: false,
                            snapshot: seen,
                            attempts: attempt,
                        }),
                        TxDecision::Set(_) if inner.get(&path) != seen.as_ref() => Attempt::Conflict,
                        TxDecision::Set(value) => {
                            inner.set(&path, value);
                            let snapshot = inner.get(&path).cloned();
                            inner.notify(&path);
                            Attempt::Done(TxCommit {
                                committed: true,
                                snapshot,
                                attempts: attempt,
                            })
                        }
                    }
                };

                match outcome {
                    Attempt::Done(commit) => return Ok(commit),
                    Attempt::Conflict => {
                        tracing::debug!(path = %path, attempt, "Transaction conflict, retrying");
                        tokio::task::yield_now().await;
                    }
                }
            }

            tracing::warn!(path = %path, attempts = max_attempts, "Transaction retries exhausted");
            Err(StoreError::TooManyRetries {
                path,
                attempts: max_attempts,
            })
        })
    }

    fn write<'a>(&'a self, path: &'a str, value: Value) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.put(path, value) })
    }

    fn remove<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.delete(path) })
    }

    fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let path = normalize(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.lock();
            inner.check_online()?;
            let current = inner.get(&path).cloned();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            // The receiver is still in hand, so this send cannot fail.
            let _ = tx.send(Snapshot {
                path: path.clone(),
                value: current.clone(),
            });
            inner.watchers.insert(
                id,
                Watcher {
                    path: path.clone(),
                    tx,
                    last: current,
                },
            );
            id
        };
        tracing::debug!(path = %path, watcher = id, "Subscription opened");

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let released_path = path.clone();
        Ok(Subscription::new(path, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .watchers
                    .remove(&id);
                tracing::debug!(path = %released_path, watcher = id, "Subscription released");
            }
        }))
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn check_writable(&self, path: &str) -> Result<(), StoreError> {
        if self.denied_prefixes.iter().any(|p| is_under(path, p)) {
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.split('/') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('/').collect();
        let is_empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            remove_at(&mut self.root, &segments);
        } else if let Some((last, parents)) = segments.split_last() {
            let mut node = &mut self.root;
            for segment in parents {
                node = ensure_object(node)
                    .entry(segment.to_string())
                    .or_insert(Value::Null);
            }
            ensure_object(node).insert(last.to_string(), value);
        }
        self.writes += 1;
    }

    /// Push a fresh snapshot to every watcher whose view includes `changed`.
    fn notify(&mut self, changed: &str) {
        let mut closed = Vec::new();
        let mut pending = Vec::new();
        for (id, watcher) in &self.watchers {
            if is_under(changed, &watcher.path) || is_under(&watcher.path, changed) {
                pending.push(*id);
            }
        }
        for id in pending {
            let current = match self.watchers.get(&id) {
                Some(w) => self.get(&w.path).cloned(),
                None => continue,
            };
            let Some(watcher) = self.watchers.get_mut(&id) else {
                continue;
            };
            if watcher.last == current {
                continue;
            }
            watcher.last = current.clone();
            let snapshot = Snapshot {
                path: watcher.path.clone(),
                value: current,
            };
            if watcher.tx.send(snapshot).is_err() {
                closed.push(id);
            }
        }
        for id in closed {
            self.watchers.remove(&id);
        }
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

/// Remove the value at `segments`, pruning parents left empty.
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(*first).is_some();
    }
    let Some(child) = map.get_mut(*first) else {
        return false;
    };
    let removed = remove_at(child, rest);
    if removed && child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(*first);
    }
    removed
}

fn normalize(path: &str) -> Result<String, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

/// True if `path` equals `prefix` or lies below it.
fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
