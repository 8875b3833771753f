//! Mutation Coordinator
//!
//! Applies optimistic cache patches for in-flight mutations and resolves each
//! one exactly once: committed with the server's values, or failed and rolled
//! back to the captured snapshot.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{collect_resource_tags, CacheEntry, CacheStore, ResponseCache};
use crate::error::{ApiError, Result};
use crate::mutation::{CacheWrite, Patch};

/// Terminal mutations kept for `mutation_state` lookups.
pub const ARCHIVE_CAPACITY: usize = 256;

// == Operation ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOperation {
    pub kind: MutationKind,
    /// Also selects the PII policy applied to every write
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

impl MutationOperation {
    pub fn new(kind: MutationKind, resource_type: impl Into<String>, resource_id: Option<&str>) -> Self {
        Self {
            kind,
            resource_type: resource_type.into(),
            resource_id: resource_id.map(str::to_string),
            input: Value::Null,
        }
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationState {
    Pending,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingMutation {
    pub id: Uuid,
    pub operation: MutationOperation,
    pub patch: Patch,
    pub state: MutationState,
    pub registered_at: u64,
    pub resolved_at: Option<u64>,
    /// Why the mutation failed, once it has
    pub error: Option<ApiError>,
}

/// Result of a complete/fail call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The transition happened
    Applied,
    /// The id was already terminal; nothing changed
    AlreadyTerminal(MutationState),
    /// The id was never registered, or has aged out of the archive
    Unknown,
}

/// Read-only access to the cache for optimistic apply functions.
pub struct CacheView<'a> {
    store: &'a CacheStore,
}

impl<'a> CacheView<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.store.peek(key).map(|entry| &entry.data)
    }

    /// Keys of every entry carrying `tag`, e.g. all cached views of `Product-123`.
    pub fn keys_tagged(&self, tag: &str) -> Vec<String> {
        self.store
            .entries()
            .filter(|entry| entry.tags.contains(tag))
            .map(|entry| entry.key.clone())
            .collect()
    }
}

/// Computes the optimistic writes from the current cache contents.
pub type OptimisticApply = Box<dyn for<'a> FnOnce(&CacheView<'a>) -> Vec<CacheWrite> + Send>;

/// Turns the server's `data` into the authoritative cache writes.
pub type Reconcile = Box<dyn FnOnce(&Value) -> Vec<CacheWrite> + Send>;

#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub id: Uuid,
    pub data: Value,
}

#[derive(Default)]
struct MutationTable {
    pending: HashMap<Uuid, PendingMutation>,
    archive: VecDeque<PendingMutation>,
}

impl MutationTable {
    fn terminal_state(&self, id: &Uuid) -> Option<MutationState> {
        self.archive.iter().find(|m| m.id == *id).map(|m| m.state)
    }

    fn retire(&mut self, mutation: PendingMutation) {
        self.archive.push_back(mutation);
        while self.archive.len() > ARCHIVE_CAPACITY {
            self.archive.pop_front();
        }
    }
}

// == Mutation Coordinator ==
/// Cheap to clone; clones share the pending table.
#[derive(Clone)]
pub struct MutationCoordinator {
    cache: ResponseCache,
    table: Arc<RwLock<MutationTable>>,
}

impl MutationCoordinator {
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            table: Arc::new(RwLock::new(MutationTable::default())),
        }
    }

    // == Register ==
    /// Records a pending mutation and applies its optimistic writes right away.
    ///
    /// Every key the apply function writes is snapshotted first, including
    /// keys that were absent, so a later failure restores them exactly.
    /// Returns before any network traffic.
    pub async fn register_mutation(
        &self,
        operation: MutationOperation,
        optimistic: Option<OptimisticApply>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = self.cache.clock().now_ms();
        let mut patch = Patch::new();

        // Table before store, everywhere.
        let mut table = self.table.write().await;
        if let Some(apply) = optimistic {
            let mut store = self.cache.store().write().await;
            let writes = apply(&CacheView { store: &store });
            for write in writes {
                let Some(entry) = self.build_entry(&store, &write, &operation.resource_type, now) else {
                    continue;
                };
                patch.capture(&write.key, store.peek(&write.key).cloned(), entry.data.clone());
                store.insert_without_eviction(entry);
            }
        }

        info!(%id, kind = ?operation.kind, resource = %operation.resource_type, keys = patch.len(), "Mutation registered");
        table.pending.insert(
            id,
            PendingMutation {
                id,
                operation,
                patch,
                state: MutationState::Pending,
                registered_at: now,
                resolved_at: None,
                error: None,
            },
        );
        id
    }

    // == Complete ==
    /// PENDING -> COMMITTED, replacing optimistic values with `writes`.
    ///
    /// Patch keys that `writes` does not cover are evicted so the next query
    /// refetches them. A terminal id is left alone.
    pub async fn complete_mutation(&self, id: Uuid, writes: Vec<CacheWrite>) -> Resolution {
        let mut table = self.table.write().await;
        let Some(mut mutation) = table.pending.remove(&id) else {
            return self.ignored(&table, id, "complete");
        };

        let now = self.cache.clock().now_ms();
        {
            let mut store = self.cache.store().write().await;
            let mut covered = HashSet::new();
            for write in &writes {
                if let Some(entry) = self.build_entry(&store, write, &mutation.operation.resource_type, now) {
                    covered.insert(write.key.clone());
                    store.insert(entry);
                }
            }
            for key in mutation.patch.keys().filter(|key| !covered.contains(*key)) {
                store.remove(key);
            }
        }

        mutation.state = MutationState::Committed;
        mutation.resolved_at = Some(now);
        info!(%id, writes = writes.len(), "Mutation committed");
        table.retire(mutation);
        Resolution::Applied
    }

    // == Fail ==
    /// PENDING -> FAILED, restoring every patched key to its snapshot.
    pub async fn fail_mutation(&self, id: Uuid, error: ApiError) -> Resolution {
        let mut table = self.table.write().await;
        let Some(mut mutation) = table.pending.remove(&id) else {
            return self.ignored(&table, id, "fail");
        };

        mutation.patch.revert(&mut *self.cache.store().write().await);

        mutation.state = MutationState::Failed;
        mutation.resolved_at = Some(self.cache.clock().now_ms());
        warn!(%id, kind = error.kind(), restored = mutation.patch.len(), "Mutation failed, rolled back");
        mutation.error = Some(error);
        table.retire(mutation);
        Resolution::Applied
    }

    // == Run ==
    /// Registers, sends and resolves a mutation in one call.
    ///
    /// The work runs on its own task, so the mutation reaches a terminal state
    /// even if the caller stops waiting.
    pub async fn run_mutation(
        &self,
        operation: MutationOperation,
        document: &str,
        variables: Value,
        optimistic: Option<OptimisticApply>,
        reconcile: Reconcile,
    ) -> Result<MutationOutcome> {
        let id = self.register_mutation(operation, optimistic).await;
        let coordinator = self.clone();
        let document = document.to_string();

        let handle = tokio::spawn(async move {
            let executor = coordinator.cache.executor().clone();
            match executor.execute(&document, variables, None).await {
                Ok(response) => {
                    let data = response.data.unwrap_or(Value::Null);
                    coordinator.complete_mutation(id, reconcile(&data)).await;
                    Ok(MutationOutcome { id, data })
                }
                Err(error) => {
                    coordinator.fail_mutation(id, error.clone()).await;
                    Err(error)
                }
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                let error = ApiError::Network {
                    message: format!("mutation task failed: {}", join_error),
                    attempts: 0,
                };
                self.fail_mutation(id, error.clone()).await;
                Err(error)
            }
        }
    }

    /// Fails every mutation pending for at least `max_age` with a timeout.
    pub async fn fail_stale(&self, max_age: Duration) -> usize {
        let now = self.cache.clock().now_ms();
        let max_age_ms = max_age.as_millis() as u64;
        let stale: Vec<(Uuid, u64)> = self
            .table
            .read()
            .await
            .pending
            .values()
            .filter(|m| now.saturating_sub(m.registered_at) >= max_age_ms)
            .map(|m| (m.id, now.saturating_sub(m.registered_at)))
            .collect();

        let mut failed = 0;
        for (id, elapsed_ms) in stale {
            if self.fail_mutation(id, ApiError::Timeout { elapsed_ms }).await == Resolution::Applied {
                failed += 1;
            }
        }
        failed
    }

    pub async fn mutation_state(&self, id: Uuid) -> Option<MutationState> {
        let table = self.table.read().await;
        table
            .pending
            .get(&id)
            .map(|m| m.state)
            .or_else(|| table.terminal_state(&id))
    }

    /// Snapshot of a mutation, pending or archived.
    pub async fn mutation(&self, id: Uuid) -> Option<PendingMutation> {
        let table = self.table.read().await;
        table
            .pending
            .get(&id)
            .or_else(|| table.archive.iter().find(|m| m.id == id))
            .cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.table.read().await.pending.len()
    }

    fn ignored(&self, table: &MutationTable, id: Uuid, action: &str) -> Resolution {
        match table.terminal_state(&id) {
            Some(state) => {
                debug!(%id, ?state, action, "Mutation already terminal, ignoring");
                Resolution::AlreadyTerminal(state)
            }
            None => {
                debug!(%id, action, "Unknown mutation id, ignoring");
                Resolution::Unknown
            }
        }
    }

    /// Sanitized entry for `write`, or `None` if the data cannot be cached safely.
    fn build_entry(
        &self,
        store: &CacheStore,
        write: &CacheWrite,
        resource_type: &str,
        now: u64,
    ) -> Option<CacheEntry> {
        let clean = match self.cache.sanitizer().sanitize(&write.data, Some(resource_type)) {
            Ok(clean) => clean,
            Err(err) => {
                warn!(key = %write.key, error = %err, "Skipping mutation write that failed sanitization");
                return None;
            }
        };

        let existing = store.peek(&write.key);
        let category = write
            .category
            .or(existing.map(|e| e.category))
            .unwrap_or_default();
        let mut tags = existing.map(|e| e.tags.clone()).unwrap_or_default();
        collect_resource_tags(&clean, &mut tags);

        Some(CacheEntry::new(
            write.key.clone(),
            clean,
            category,
            self.cache.policies().ttl_for(category),
            now,
            tags,
        ))
    }
}
