//! API Client
//!
//! Single entry point wiring the executor, the response cache and the
//! mutation coordinator over one transport, one clock and one event bus.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::cache::{CacheStats, QueryOptions, QueryResult, ResponseCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{ApiError, PersistError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::executor::{HttpTransport, RequestExecutor, Transport};
use crate::models::GraphqlResponse;
use crate::mutation::{
    CacheWrite, MutationCoordinator, MutationOperation, MutationOutcome, MutationState, OptimisticApply,
    Reconcile, Resolution,
};
use crate::persist::{self, Snapshot};
use crate::throttle::QuotaState;
use crate::usage::{UsageBucket, UsageRecorder};

// == Api Client ==
/// Cheap to clone; clones share quota, cache, mutations and history.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<Config>,
    executor: RequestExecutor,
    cache: ResponseCache,
    mutations: MutationCoordinator,
}

impl ApiClient {
    // == Constructors ==
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Builds a client with an injected clock, e.g. a `ManualClock` in tests.
    pub fn with_clock(config: Config, transport: Arc<dyn Transport>, clock: SharedClock) -> Self {
        let executor = RequestExecutor::new(&config, transport, clock, EventBus::new());
        let cache = ResponseCache::new(&config, executor.clone());
        let mutations = MutationCoordinator::new(cache.clone());

        Self {
            config: Arc::new(config),
            executor,
            cache,
            mutations,
        }
    }

    /// Client talking to `config.endpoint` over HTTP.
    pub fn from_config(config: Config) -> Self {
        let transport = Arc::new(HttpTransport::from_config(&config));
        Self::new(config, transport)
    }

    // == Queries ==
    pub async fn query<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: Value,
        options: QueryOptions,
    ) -> Result<QueryResult<T>> {
        self.cache.query(document, variables, options).await
    }

    pub async fn query_value(
        &self,
        document: &str,
        variables: Value,
        options: QueryOptions,
    ) -> Result<QueryResult<Value>> {
        self.cache.query_value(document, variables, options).await
    }

    /// Sends a document straight through the executor, bypassing the cache.
    pub async fn execute(&self, document: &str, variables: Value) -> Result<GraphqlResponse> {
        self.executor.execute(document, variables, None).await
    }

    // == Mutations ==
    pub async fn register_mutation(
        &self,
        operation: MutationOperation,
        optimistic: Option<OptimisticApply>,
    ) -> Uuid {
        self.mutations.register_mutation(operation, optimistic).await
    }

    pub async fn complete_mutation(&self, id: Uuid, writes: Vec<CacheWrite>) -> Resolution {
        self.mutations.complete_mutation(id, writes).await
    }

    pub async fn fail_mutation(&self, id: Uuid, error: ApiError) -> Resolution {
        self.mutations.fail_mutation(id, error).await
    }

    pub async fn run_mutation(
        &self,
        operation: MutationOperation,
        document: &str,
        variables: Value,
        optimistic: Option<OptimisticApply>,
        reconcile: Reconcile,
    ) -> Result<MutationOutcome> {
        self.mutations
            .run_mutation(operation, document, variables, optimistic, reconcile)
            .await
    }

    pub async fn mutation_state(&self, id: Uuid) -> Option<MutationState> {
        self.mutations.mutation_state(id).await
    }

    // == Cache ==
    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    // == Observability ==
    /// Receiver for rate-limit, throttle and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.executor.events().subscribe()
    }

    pub async fn usage_summary(&self, window_ms: u64) -> Vec<UsageBucket> {
        self.executor.usage().read().await.summarize(window_ms)
    }

    pub async fn quota_status(&self) -> QuotaState {
        self.executor.tracker().read().await.state()
    }

    /// Removes stale cache entries and times out old pending mutations.
    pub async fn sweep(&self) -> (usize, usize) {
        let expired = self.cache.cleanup_expired().await;
        let timed_out = self.mutations.fail_stale(self.config.mutation_timeout).await;
        (expired, timed_out)
    }

    // == Persistence ==
    pub async fn snapshot(&self) -> Snapshot {
        let cache = self
            .cache
            .store()
            .read()
            .await
            .entries()
            .map(|entry| (entry.key.clone(), entry.clone()))
            .collect();
        let usage = self.executor.usage().read().await.records().cloned().collect();

        Snapshot {
            saved_at: self.executor.clock().now_ms(),
            cache,
            usage,
        }
    }

    /// Loads entries and history from `snapshot`, skipping entries already stale.
    pub async fn restore(&self, mut snapshot: Snapshot) {
        let dropped = snapshot.drop_expired(self.executor.clock().now_ms());
        let restored = snapshot.cache.len();
        {
            let mut store = self.cache.store().write().await;
            for entry in snapshot.cache.into_values() {
                store.insert(entry);
            }
        }
        *self.executor.usage().write().await =
            UsageRecorder::from_records(self.config.history_capacity, snapshot.usage);

        info!(restored, dropped, "Snapshot restored");
    }

    pub async fn save_snapshot(&self, path: &Path) -> std::result::Result<(), PersistError> {
        persist::save(path, &self.snapshot().await).await
    }

    /// Restores from `path` if the file exists. Returns whether it did.
    pub async fn load_snapshot(&self, path: &Path) -> std::result::Result<bool, PersistError> {
        match persist::load(path).await? {
            Some(snapshot) => {
                self.restore(snapshot).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Accessors ==
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }
}
