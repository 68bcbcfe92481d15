//! Per-key memoization of asynchronous loads.
//!
//! At most one load runs per key. It runs as its own task, so it completes and
//! is cached even when every caller has gone away; concurrent callers share it
//! and see the same value or the same failure. Failures stay cached.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::OnceCell;

use crate::error::LoadError;

type Outcome<V> = Result<V, LoadError>;

type InFlight<V> = Shared<BoxFuture<'static, Outcome<V>>>;

struct Entry<V> {
    /// Set by the load task once it settles.
    result: Arc<OnceCell<Outcome<V>>>,
    task: Option<InFlight<V>>,
}

impl<V> Entry<V> {
    fn settled(&self) -> Option<&Outcome<V>> {
        self.result.get()
    }
}

/// Observable state of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<V> {
    NotStarted,
    Loading,
    Loaded(V),
    Failed(LoadError),
}

impl<V> LoadState<V> {
    pub fn is_settled(&self) -> bool {
        matches!(self, LoadState::Loaded(_) | LoadState::Failed(_))
    }
}

pub struct LoadCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> std::fmt::Debug for LoadCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("LoadCache").field("entries", &len).finish()
    }
}

impl<K, V> Default for LoadCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> LoadCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `key`, or start (or join) its load.
    ///
    /// The load is spawned on the current tokio runtime.
    pub async fn get_or_load<F, Fut>(&self, key: &K, load: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let task = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) => match (entry.settled(), &entry.task) {
                    (Some(outcome), _) => return outcome.clone(),
                    (None, Some(task)) => task.clone(),
                    (None, None) => return Err(LoadError::new("load was never started")),
                },
                None => {
                    let result = Arc::new(OnceCell::new());
                    let task = spawn_load(load(), result.clone());
                    entries.insert(
                        key.clone(),
                        Entry {
                            result,
                            task: Some(task.clone()),
                        },
                    );
                    task
                }
            }
        };
        task.await
    }

    /// Settled result, without starting anything.
    pub fn get(&self, key: &K) -> Option<Outcome<V>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).and_then(|entry| entry.settled().cloned())
    }

    /// Loaded value, if any.
    pub fn value(&self, key: &K) -> Option<V> {
        self.get(key).and_then(Result::ok)
    }

    /// Store a value, replacing whatever was cached or in flight for `key`.
    pub fn insert(&self, key: K, value: V) {
        let entry = Entry {
            result: Arc::new(OnceCell::new_with(Some(Ok(value)))),
            task: None,
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, entry);
    }

    pub fn state(&self, key: &K) -> LoadState<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key).map(Entry::settled) {
            None => LoadState::NotStarted,
            Some(None) => LoadState::Loading,
            Some(Some(Ok(value))) => LoadState::Loaded(value.clone()),
            Some(Some(Err(err))) => LoadState::Failed(err.clone()),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// Keys with a settled, successful value.
    pub fn loaded_keys(&self) -> Vec<K> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(_, entry)| matches!(entry.settled(), Some(Ok(_))))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Run `load` as a detached task that records its outcome in `result`.
fn spawn_load<V, Fut>(load: Fut, result: Arc<OnceCell<Outcome<V>>>) -> InFlight<V>
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = Outcome<V>> + Send + 'static,
{
    let recorder = result.clone();
    let handle = tokio::spawn(async move {
        let outcome = load.await;
        let _ = recorder.set(outcome.clone());
        outcome
    });
    async move {
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(LoadError::new(format!("load task failed: {}", e))));
        let _ = result.set(outcome.clone());
        outcome
    }
    .boxed()
    .shared()
}
