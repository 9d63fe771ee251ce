//! Shared query cache
//!
//! Each read command plus canonical argument is one entry. Concurrent
//! readers of an entry share a single in-flight fetch, and every
//! invalidation bumps the entry's generation so a fetch started before it
//! can never overwrite what came after.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::gateway::CommandExecutor;

/// Cache identity: a command name and its argument.
#[derive(Debug, Clone)]
pub struct QueryKey {
    command: String,
    argument: Value,
    canonical: String,
}

impl QueryKey {
    pub fn new(command: impl Into<String>, argument: Value) -> Self {
        // serde_json maps are ordered, so equal values print identically.
        let canonical = argument.to_string();
        Self {
            command: command.into(),
            argument,
            canonical,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn argument(&self) -> &Value {
        &self.argument
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command && self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.command.hash(state);
        self.canonical.hash(state);
    }
}

/// What a view renders for one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub value: Option<Value>,
    pub is_loading: bool,
    pub error: Option<String>,
}

type Fetch = Shared<BoxFuture<'static, Result<Value, String>>>;

struct Entry {
    state: watch::Sender<QueryState>,
    stale: bool,
    generation: u64,
    in_flight: Option<Fetch>,
}

impl Entry {
    fn new() -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            state,
            stale: true,
            generation: 0,
            in_flight: None,
        }
    }
}

type Entries = Arc<Mutex<HashMap<QueryKey, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct QueryCache {
    executor: Arc<dyn CommandExecutor>,
    entries: Entries,
}

enum Lookup {
    Fresh(QueryState),
    Fetching(Fetch, u64),
}

impl QueryCache {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cached state if fresh, otherwise the result of a (shared) fetch.
    pub async fn query(&self, key: &QueryKey) -> QueryState {
        loop {
            let (fetch, generation) = match self.lookup(key) {
                Lookup::Fresh(state) => return state,
                Lookup::Fetching(fetch, generation) => (fetch, generation),
            };

            let _ = fetch.await;

            let settled = lock(&self.entries)
                .get(key)
                .filter(|entry| entry.generation == generation)
                .map(|entry| entry.state.borrow().clone());
            if let Some(state) = settled {
                return state;
            }
            debug!("{} invalidated while fetching, fetching again", key.command);
        }
    }

    /// Watches `key`; starts a background fetch when it has no fresh value.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<QueryState> {
        let (receiver, stale) = {
            let mut entries = lock(&self.entries);
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            (entry.state.subscribe(), entry.stale)
        };

        if stale {
            self.refetch_in_background(key);
        }
        receiver
    }

    /// Current state without fetching
    pub fn peek(&self, key: &QueryKey) -> Option<QueryState> {
        lock(&self.entries)
            .get(key)
            .map(|entry| entry.state.borrow().clone())
    }

    /// Marks `key` stale and forgets any in-flight fetch. Subscribed keys
    /// are re-fetched right away; others on their next `query`.
    pub fn invalidate(&self, key: &QueryKey) {
        let watched = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(key) else {
                return;
            };

            entry.generation += 1;
            entry.stale = true;
            entry.in_flight = None;
            entry.state.send_if_modified(|state| {
                let was_loading = state.is_loading;
                state.is_loading = false;
                was_loading
            });
            entry.state.receiver_count() > 0
        };

        debug!("Invalidated {} (watched: {})", key.command, watched);
        if watched {
            self.refetch_in_background(key);
        }
    }

    /// Invalidates every cached argument variant of `command`.
    pub fn invalidate_command(&self, command: &str) {
        let keys: Vec<QueryKey> = lock(&self.entries)
            .keys()
            .filter(|key| key.command == command)
            .cloned()
            .collect();

        for key in keys {
            self.invalidate(&key);
        }
    }

    fn refetch_in_background(&self, key: &QueryKey) {
        if let Lookup::Fetching(fetch, _) = self.lookup(key) {
            tokio::spawn(fetch);
        }
    }

    fn lookup(&self, key: &QueryKey) -> Lookup {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);

        if let Some(fetch) = &entry.in_flight {
            return Lookup::Fetching(fetch.clone(), entry.generation);
        }
        if !entry.stale {
            return Lookup::Fresh(entry.state.borrow().clone());
        }

        let generation = entry.generation;
        entry.state.send_modify(|state| state.is_loading = true);

        let cache = self.clone();
        let key = key.clone();
        let fetch = async move { cache.fetch(key, generation).await }
            .boxed()
            .shared();
        entry.in_flight = Some(fetch.clone());
        Lookup::Fetching(fetch, generation)
    }

    async fn fetch(&self, key: QueryKey, generation: u64) -> Result<Value, String> {
        let result = self
            .executor
            .execute_command(&key.command, key.argument.clone())
            .await
            .map_err(|e| e.to_string());

        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(&key) else {
            return result;
        };
        if entry.generation != generation {
            debug!("Discarding result of superseded {} fetch", key.command);
            return result;
        }

        entry.in_flight = None;
        // A failed fetch is retried by the next reader.
        entry.stale = result.is_err();
        entry.state.send_modify(|state| {
            state.is_loading = false;
            match &result {
                Ok(value) => {
                    state.value = Some(value.clone());
                    state.error = None;
                }
                Err(error) => state.error = Some(error.clone()),
            }
        });

        result
    }
}
