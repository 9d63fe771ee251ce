//! Which queries a successful mutation makes stale

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::gateway::CommandExecutor;
use crate::sync::query::{QueryCache, QueryKey, QueryState};

#[derive(Debug, Clone)]
pub struct InvalidationPolicy {
    rules: HashMap<String, Vec<String>>,
}

impl InvalidationPolicy {
    /// Policy with no rules; every command is treated as read-only.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, mutation: &str, queries: &[&str]) -> Self {
        self.rules
            .entry(mutation.to_string())
            .or_default()
            .extend(queries.iter().map(|query| query.to_string()));
        self
    }

    pub fn is_mutation(&self, command: &str) -> bool {
        self.rules.contains_key(command)
    }

    pub fn dependents(&self, command: &str) -> &[String] {
        self.rules.get(command).map_or(&[], Vec::as_slice)
    }

    /// The task-list and clock views used by every front end.
    pub fn headlines() -> Self {
        const SEARCH: &str = "headline-search";
        const CLOCK: &str = "clocking-status";

        Self::empty()
            .with_rule("headline-create", &[SEARCH])
            .with_rule("headline-update", &[SEARCH])
            .with_rule("headline-duplicate", &[SEARCH])
            .with_rule("headline-remove", &[SEARCH])
            .with_rule("clocking-start", &[SEARCH, CLOCK])
            .with_rule("clocking-stop", &[SEARCH, CLOCK])
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::headlines()
    }
}

/// Reads through the cache, writes through the executor and invalidates
/// per the policy.
#[derive(Clone)]
pub struct ViewSync {
    executor: Arc<dyn CommandExecutor>,
    cache: QueryCache,
    policy: Arc<InvalidationPolicy>,
}

impl ViewSync {
    pub fn new(executor: Arc<dyn CommandExecutor>, policy: InvalidationPolicy) -> Self {
        Self {
            cache: QueryCache::new(executor.clone()),
            executor,
            policy: Arc::new(policy),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn query(&self, command: &str, argument: Value) -> QueryState {
        self.cache.query(&QueryKey::new(command, argument)).await
    }

    pub fn subscribe(&self, command: &str, argument: Value) -> watch::Receiver<QueryState> {
        self.cache.subscribe(&QueryKey::new(command, argument))
    }

    /// Runs `command`; on success every dependent query is invalidated
    /// before the result is returned.
    pub async fn mutate(&self, command: &str, argument: Value) -> Result<Value, BridgeError> {
        let result = self.executor.execute_command(command, argument).await?;

        let dependents = self.policy.dependents(command);
        if dependents.is_empty() {
            debug!("{} invalidates nothing", command);
        }
        for query in dependents {
            info!("{} invalidates {}", command, query);
            self.cache.invalidate_command(query);
        }

        Ok(result)
    }
}
