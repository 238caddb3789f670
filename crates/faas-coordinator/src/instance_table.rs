//! In-memory registry of Ready instances, plus the Reaper's idle
//! eviction loop.
//!
//! The map is never exposed to callers directly (Design Note: "shared
//! mutable map"); everything goes through `get`/`register`/`touch`, and
//! only the Reaper removes entries on its own initiative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use faas_common::DEFAULT_IDLE_TIMEOUT_SECONDS;
use faas_runtime::RuntimeAdapter;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};

/// A live, reachable container bound to a function name.
#[derive(Debug, Clone)]
pub struct Instance {
    pub container_id: String,
    pub upstream_address: String,
    pub last_accessed: Instant,
    pub idle_timeout: Duration,
    /// Wall-clock stamp for diagnostics only; eviction math runs
    /// entirely on `last_accessed`.
    pub started_at: DateTime<Utc>,
}

/// Process-wide map of `function_name -> Instance`.
#[derive(Clone)]
pub struct InstanceTable {
    inner: Arc<RwLock<HashMap<String, Instance>>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read-only lookup of the upstream address for a function, if a
    /// Ready instance is present.
    pub async fn get(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .get(name)
            .map(|i| i.upstream_address.clone())
    }

    /// Inserts or replaces the Instance for `name`. `timeout_seconds`
    /// of zero is interpreted as the default (10s).
    pub async fn register(
        &self,
        name: &str,
        container_id: String,
        upstream_address: String,
        timeout_seconds: u64,
    ) {
        let timeout_seconds = if timeout_seconds == 0 {
            DEFAULT_IDLE_TIMEOUT_SECONDS
        } else {
            timeout_seconds
        };
        let instance = Instance {
            container_id: container_id.clone(),
            upstream_address,
            last_accessed: Instant::now(),
            idle_timeout: Duration::from_secs(timeout_seconds),
            started_at: Utc::now(),
        };
        self.inner.write().await.insert(name.to_string(), instance);
        let prefix: String = container_id.chars().take(12).collect();
        info!(function = name, container_id = %prefix, timeout_seconds, "registered instance");
    }

    /// Updates `last_accessed` to now, if the function currently has a
    /// Ready instance. A no-op on miss.
    pub async fn touch(&self, name: &str) {
        if let Some(instance) = self.inner.write().await.get_mut(name) {
            instance.last_accessed = Instant::now();
        }
    }

    /// Read-only peek at which entries look idle as of `now`. Used only
    /// by tests to check the eviction predicate without mutating the
    /// table; the Reaper does not use this, since a scan-then-remove
    /// across two lock acquisitions would let a `Touch` land in between
    /// (see `evict_idle`).
    async fn idle_entries(&self, now: Instant) -> Vec<(String, Instance)> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, instance)| now.duration_since(instance.last_accessed) > instance.idle_timeout)
            .map(|(name, instance)| (name.clone(), instance.clone()))
            .collect()
    }

    /// Atomically evicts every entry idle past its timeout as of `now`
    /// and returns what was removed. The idle check and the removal
    /// happen under one write-lock acquisition, so a `Touch` cannot
    /// land between "decide idle" and "remove": it either completes
    /// before this call takes the lock (and the refreshed
    /// `last_accessed` is what gets checked) or it blocks until this
    /// call releases the lock (and by then the entry, if evicted, is
    /// already gone, making the touch a harmless no-op).
    async fn evict_idle(&self, now: Instant) -> Vec<(String, Instance)> {
        let mut map = self.inner.write().await;
        let idle_names: Vec<String> = map
            .iter()
            .filter(|(_, instance)| now.duration_since(instance.last_accessed) > instance.idle_timeout)
            .map(|(name, _)| name.clone())
            .collect();
        idle_names
            .into_iter()
            .filter_map(|name| map.remove(&name).map(|instance| (name, instance)))
            .collect()
    }
}

impl Default for InstanceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that evicts idle instances at a fixed 1Hz cadence.
///
/// Stop calls use no request-scoped context; they are not cancellable
/// by any in-flight client request, so one caller's aborted request
/// can never interrupt another function's eviction.
pub struct Reaper {
    table: InstanceTable,
    runtime: Arc<dyn RuntimeAdapter>,
}

impl Reaper {
    pub fn new(table: InstanceTable, runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self { table, runtime }
    }

    /// Runs the eviction loop forever. Intended to be spawned as a
    /// single dedicated background task for the process's lifetime.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        info!("reaper background job started");
        loop {
            ticker.tick().await;
            self.reap_once().await;
        }
    }

    /// Scans the table once, evicting every instance idle past its
    /// timeout. Returns the number of instances evicted (used by
    /// tests; the background loop ignores the count).
    pub async fn reap_once(&self) -> usize {
        let now = Instant::now();
        let evicted = self.table.evict_idle(now).await;
        for (name, instance) in &evicted {
            info!(
                function = %name,
                idle_for = ?now.duration_since(instance.last_accessed),
                "evicting idle instance"
            );
            if let Err(e) = self.runtime.stop(&instance.container_id).await {
                error!(function = %name, error = %e, "failed to stop idle container");
            }
        }
        evicted.len()
    }
}
