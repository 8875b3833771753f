//! Response Cache
//!
//! Content-addressed, TTL-scoped cache in front of the request executor.
//! Misses fetch through the executor, sanitize the payload and store it with
//! the category TTL. Concurrent misses on one key share a single fetch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{
    cache_key, collect_resource_tags, resource_tag, CacheCategory, CacheEntry, CachePolicies, CacheStats,
    CacheStore, Sanitizer,
};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::executor::RequestExecutor;
use crate::models::operation_name;

// == Query Options ==
/// Per-call cache behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Wins over the category TTL when set
    pub ttl_override_ms: Option<u64>,
    pub category: Option<CacheCategory>,
    /// Skip the lookup and always fetch; the fresh result is still stored
    pub bypass_cache: bool,
    /// Selects the PII policy and adds `Type` / `Type-id` tags
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Extra key material, e.g. the shop or user the data belongs to
    pub context: Option<String>,
    pub estimated_cost: Option<f64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: CacheCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn ttl_override(mut self, ttl: Duration) -> Self {
        self.ttl_override_ms = Some(ttl.as_millis() as u64);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: Option<&str>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id.map(str::to_string);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }
}

// == Query Result ==
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub data: T,
    pub from_cache: bool,
    /// Unix milliseconds at which the data was fetched from the API
    pub last_fetched: u64,
}

impl QueryResult<Value> {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            data: entry.data.clone(),
            from_cache: true,
            last_fetched: entry.stored_at,
        }
    }
}

type FetchOutcome = Result<QueryResult<Value>>;

// == Response Cache ==
/// Cheap to clone; clones share the same table and in-flight fetches.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<RwLock<CacheStore>>,
    executor: RequestExecutor,
    sanitizer: Sanitizer,
    policies: CachePolicies,
    clock: SharedClock,
    /// One receiver per key being fetched; the sender lives in the fetch task.
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<FetchOutcome>>>>,
}

impl ResponseCache {
    // == Constructor ==
    pub fn new(config: &Config, executor: RequestExecutor) -> Self {
        let clock = Arc::clone(executor.clock());
        Self {
            inner: Arc::new(CacheInner {
                store: Arc::new(RwLock::new(CacheStore::new(config.max_entries))),
                executor,
                sanitizer: Sanitizer::new(&config.pii_fields),
                policies: config.cache_policies.clone(),
                clock,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    // == Query ==
    /// Runs `document` and decodes its `data` into `T`.
    ///
    /// # Arguments
    /// * `document` - GraphQL document, passed through untouched
    /// * `variables` - Operation variables; key order does not affect caching
    /// * `options` - TTL, category, bypass and PII settings for this call
    pub async fn query<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: Value,
        options: QueryOptions,
    ) -> Result<QueryResult<T>> {
        let result = self.query_value(document, variables, options).await?;
        let data = serde_json::from_value(result.data).map_err(|err| ApiError::Decode {
            message: err.to_string(),
        })?;
        Ok(QueryResult {
            data,
            from_cache: result.from_cache,
            last_fetched: result.last_fetched,
        })
    }

    /// Like [`ResponseCache::query`] but returns the raw JSON `data`.
    ///
    /// A fresh fetch returns the payload as the API sent it; only the stored
    /// copy is sanitized.
    pub async fn query_value(
        &self,
        document: &str,
        variables: Value,
        options: QueryOptions,
    ) -> Result<QueryResult<Value>> {
        let key = cache_key(document, &variables, options.context.as_deref());

        if options.bypass_cache {
            debug!(key = %short(&key), "Cache bypassed");
            return self
                .inner
                .fetch_and_store(key, document.to_string(), variables, options)
                .await;
        }

        let now = self.inner.clock.now_ms();
        let cached = self.inner.store.write().await.lookup(&key, now);
        if let Some(result) = cached.and_then(|entry| self.inner.serve(&entry, &options)) {
            debug!(key = %short(&key), "Cache hit");
            return Ok(result);
        }

        Arc::clone(&self.inner)
            .coalesced_fetch(key, document.to_string(), variables, options)
            .await
    }

    // == Invalidate ==
    /// Drops every entry tagged with `pattern` or whose operation name starts with it.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.inner.store.write().await.invalidate(pattern);
        info!(pattern, removed, "Cache invalidated");
        removed
    }

    pub async fn cleanup_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();
        self.inner.store.write().await.cleanup_expired(now)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.store.read().await.stats()
    }

    pub fn store(&self) -> &Arc<RwLock<CacheStore>> {
        &self.inner.store
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.inner.sanitizer
    }

    pub fn policies(&self) -> &CachePolicies {
        &self.inner.policies
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.inner.executor
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

impl CacheInner {
    /// Joins the fetch already running for `key`, or starts one.
    async fn coalesced_fetch(
        self: Arc<Self>,
        key: String,
        document: String,
        variables: Value,
        options: QueryOptions,
    ) -> FetchOutcome {
        let mut receiver = {
            let mut in_flight = self.in_flight.lock().await;

            // A fetch may have landed between the lookup and taking the lock.
            let now = self.clock.now_ms();
            let landed = self.store.read().await.peek_fresh(&key, now).cloned();
            if let Some(result) = landed.and_then(|entry| self.serve(&entry, &options)) {
                return Ok(result);
            }

            // A receiver whose sender is gone belongs to a fetch that died.
            let joinable = in_flight
                .get(&key)
                .filter(|receiver| receiver.has_changed().is_ok())
                .cloned();

            match joinable {
                Some(receiver) => {
                    self.store.write().await.record_coalesced();
                    debug!(key = %short(&key), "Joining in-flight fetch");
                    receiver
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.clone(), receiver.clone());

                    let inner = Arc::clone(&self);
                    tokio::spawn(async move {
                        let outcome = inner
                            .fetch_and_store(key.clone(), document, variables, options)
                            .await;
                        inner.in_flight.lock().await.remove(&key);
                        let _ = sender.send(Some(outcome));
                    });
                    receiver
                }
            }
        };

        loop {
            if let Some(outcome) = receiver.borrow_and_update().clone() {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                return Err(ApiError::Network {
                    message: "shared fetch ended without a result".to_string(),
                    attempts: 0,
                });
            }
        }
    }

    /// Cached entry as seen by a reader with `options`.
    ///
    /// The entry was sanitized for whoever stored it; a reader declaring a
    /// resource type gets that type's PII policy applied on top. `None` means
    /// the entry cannot be served to this reader and must be refetched.
    fn serve(&self, entry: &CacheEntry, options: &QueryOptions) -> Option<QueryResult<Value>> {
        let Some(resource_type) = options.resource_type.as_deref() else {
            return Some(QueryResult::from_entry(entry));
        };
        match self.sanitizer.sanitize(&entry.data, Some(resource_type)) {
            Ok(clean) => Some(QueryResult {
                data: clean,
                from_cache: true,
                last_fetched: entry.stored_at,
            }),
            Err(err) => {
                warn!(key = %short(&entry.key), error = %err, "Cached entry failed reader sanitization");
                None
            }
        }
    }

    async fn fetch_and_store(
        &self,
        key: String,
        document: String,
        variables: Value,
        options: QueryOptions,
    ) -> FetchOutcome {
        let response = self
            .executor
            .execute(&document, variables, options.estimated_cost)
            .await?;
        let fetched_at = self.clock.now_ms();
        let data = response.data.unwrap_or(Value::Null);

        match self.sanitizer.sanitize(&data, options.resource_type.as_deref()) {
            Ok(clean) => {
                let mut tags = BTreeSet::new();
                collect_resource_tags(&clean, &mut tags);
                if let Some(resource_type) = &options.resource_type {
                    tags.insert(resource_type.clone());
                    if let Some(id) = &options.resource_id {
                        tags.insert(resource_tag(resource_type, id));
                    }
                }

                let category = options.category.unwrap_or_default();
                let ttl = self
                    .policies
                    .resolve_ttl(category, options.ttl_override_ms.map(Duration::from_millis));
                let entry = CacheEntry::new(key.clone(), clean, category, ttl, fetched_at, tags)
                    .with_operation(operation_name(&document));

                debug!(key = %short(&key), ?category, ttl_ms = entry.ttl_ms, "Cache store");
                self.store.write().await.insert(entry);
            }
            Err(err) => {
                warn!(key = %short(&key), error = %err, "Payload failed sanitization, serving uncached");
                self.store.write().await.record_uncacheable();
            }
        }

        Ok(QueryResult {
            data,
            from_cache: false,
            last_fetched: fetched_at,
        })
    }
}

/// Key prefix for log lines.
fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::EventBus;
    use crate::testing::{self, ScriptedTransport};
    use serde_json::json;

    const DOC: &str = "query GetProduct($id: ID!) { product(id: $id) { __typename id title } }";

    fn cache_with(transport: &ScriptedTransport, clock: &ManualClock) -> ResponseCache {
        let mut config = Config::default().with_pii_fields("Customer", &["email", "phone"]);
        config.cache_policies.set_ttl(CacheCategory::Volatile, Duration::from_millis(1_000));
        let executor = RequestExecutor::new(
            &config,
            Arc::new(transport.clone()),
            Arc::new(clock.clone()),
            EventBus::new(),
        );
        ResponseCache::new(&config, executor)
    }

    fn product(id: &str) -> Value {
        json!({"product": {"__typename": "Product", "id": format!("gid://shopify/Product/{}", id), "title": "Hat"}})
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let transport = ScriptedTransport::new().respond(testing::data(product("1")));
        let clock = ManualClock::new(10_000);
        let cache = cache_with(&transport, &clock);

        let first = cache.query_value(DOC, json!({"id": "1"}), QueryOptions::new()).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.last_fetched, 10_000);

        let second = cache.query_value(DOC, json!({"id": "1"}), QueryOptions::new()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_ttl_boundary_triggers_refetch() {
        let transport = ScriptedTransport::new()
            .respond(testing::data(product("1")))
            .respond(testing::data(product("1")));
        let clock = ManualClock::new(10_000);
        let cache = cache_with(&transport, &clock);
        let options = QueryOptions::new().category(CacheCategory::Volatile);

        cache.query_value(DOC, json!({"id": "1"}), options.clone()).await.unwrap();

        clock.advance(999);
        let before = cache.query_value(DOC, json!({"id": "1"}), options.clone()).await.unwrap();
        assert!(before.from_cache);

        clock.advance(1);
        let at = cache.query_value(DOC, json!({"id": "1"}), options).await.unwrap();
        assert!(!at.from_cache);
        assert_eq!(at.last_fetched, 11_000);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_ttl_override_beats_category() {
        let transport = ScriptedTransport::new()
            .respond(testing::data(product("1")))
            .respond(testing::data(product("1")));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);
        let options = QueryOptions::new()
            .category(CacheCategory::Static)
            .ttl_override(Duration::from_millis(50));

        cache.query_value(DOC, json!({}), options.clone()).await.unwrap();
        clock.advance(50);
        let again = cache.query_value(DOC, json!({}), options).await.unwrap();
        assert!(!again.from_cache);
    }

    #[tokio::test]
    async fn test_bypass_fetches_and_stores() {
        let transport = ScriptedTransport::new()
            .respond(testing::data(product("1")))
            .respond(testing::data(product("1")));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        cache.query_value(DOC, json!({}), QueryOptions::new()).await.unwrap();
        let bypassed = cache
            .query_value(DOC, json!({}), QueryOptions::new().bypass_cache())
            .await
            .unwrap();
        assert!(!bypassed.from_cache);
        assert_eq!(transport.calls(), 2);
        assert_eq!(cache.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_pii_never_stored() {
        let payload = json!({"customer": {
            "__typename": "Customer", "id": "7", "email": "a@example.com", "phone": "555", "name": "Ada"
        }});
        let transport = ScriptedTransport::new().respond(testing::data(payload));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);
        let options = QueryOptions::new().resource("Customer", Some("7"));

        let live = cache.query_value(DOC, json!({}), options.clone()).await.unwrap();
        assert_eq!(live.data["customer"]["email"], "a@example.com");

        let cached = cache.query_value(DOC, json!({}), options).await.unwrap();
        assert!(cached.from_cache);
        assert!(cached.data["customer"].get("email").is_none());
        assert!(cached.data["customer"].get("phone").is_none());
        assert_eq!(cached.data["customer"]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_reader_pii_policy_applies_to_untyped_entry() {
        let payload = json!({"customer": {"id": "7", "email": "a@example.com", "phone": "555", "name": "Ada"}});
        let transport = ScriptedTransport::new().respond(testing::data(payload));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        // Stored by a caller that declared no resource type.
        cache.query_value(DOC, json!({}), QueryOptions::new()).await.unwrap();

        let typed = cache
            .query_value(DOC, json!({}), QueryOptions::new().resource("Customer", Some("7")))
            .await
            .unwrap();
        assert!(typed.from_cache);
        assert!(typed.data["customer"].get("email").is_none());
        assert!(typed.data["customer"].get("phone").is_none());
        assert_eq!(typed.data["customer"]["name"], "Ada");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_shape_served_live_every_time() {
        let transport = ScriptedTransport::new()
            .respond(testing::data(json!(["not", "an", "object"])))
            .respond(testing::data(json!(["not", "an", "object"])));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        let first = cache.query_value(DOC, json!({}), QueryOptions::new()).await.unwrap();
        let second = cache.query_value(DOC, json!({}), QueryOptions::new()).await.unwrap();
        assert!(!first.from_cache);
        assert!(!second.from_cache);
        assert_eq!(transport.calls(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.uncacheable, 2);
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let transport = ScriptedTransport::new()
            .respond_after(Duration::from_millis(50), testing::data(product("1")));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        let (a, b, c) = tokio::join!(
            cache.query_value(DOC, json!({"id": "1"}), QueryOptions::new()),
            cache.query_value(DOC, json!({"id": "1"}), QueryOptions::new()),
            cache.query_value(DOC, json!({"id": "1"}), QueryOptions::new()),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.data, b.data);
        assert_eq!(b.data, c.data);
        assert_eq!(cache.stats().await.coalesced, 2);
        assert_eq!(cache.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_the_error() {
        let transport = ScriptedTransport::new()
            .respond_after(Duration::from_millis(20), testing::validation_error("bad field"));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        let (a, b) = tokio::join!(
            cache.query_value(DOC, json!({}), QueryOptions::new()),
            cache.query_value(DOC, json!({}), QueryOptions::new()),
        );
        assert!(matches!(a, Err(ApiError::GraphqlValidation { .. })));
        assert!(matches!(b, Err(ApiError::GraphqlValidation { .. })));
        assert_eq!(transport.calls(), 1);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_resource_tag() {
        let transport = ScriptedTransport::new()
            .respond(testing::data(product("123")))
            .respond(testing::data(product("456")));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        cache.query_value(DOC, json!({"id": "123"}), QueryOptions::new()).await.unwrap();
        cache.query_value(DOC, json!({"id": "456"}), QueryOptions::new()).await.unwrap();

        assert_eq!(cache.invalidate("Product-123").await, 1);
        let kept = cache.query_value(DOC, json!({"id": "456"}), QueryOptions::new()).await.unwrap();
        assert!(kept.from_cache);
    }

    #[tokio::test]
    async fn test_typed_query_decodes() {
        #[derive(Debug, Deserialize)]
        struct Payload {
            product: Product,
        }
        #[derive(Debug, Deserialize)]
        struct Product {
            title: String,
        }

        let transport = ScriptedTransport::new().respond(testing::data(product("1")));
        let clock = ManualClock::new(0);
        let cache = cache_with(&transport, &clock);

        let result: QueryResult<Payload> = cache.query(DOC, json!({}), QueryOptions::new()).await.unwrap();
        assert_eq!(result.data.product.title, "Hat");

        let mismatch: Result<QueryResult<u32>> = cache.query(DOC, json!({}), QueryOptions::new()).await;
        assert!(matches!(mismatch, Err(ApiError::Decode { .. })));
    }
}
