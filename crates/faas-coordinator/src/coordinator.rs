//! The Invocation Coordinator: the central state machine mapping a
//! function name to a live, healthy upstream address.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use faas_common::{FaasError, Result, WARMUP_IDLE_TIMEOUT_SECONDS};
use faas_registry::Registry;
use faas_runtime::RuntimeAdapter;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::instance_table::InstanceTable;

const READINESS_ATTEMPTS: u32 = 20;
const READINESS_INTERVAL: Duration = Duration::from_millis(100);
const WARMUP_GRACE: Duration = Duration::from_millis(200);

/// Outcome of a `Warmup` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    AlreadyRunning,
    WarmedUp,
}

/// Orchestrates cold start, readiness probing, hot-path routing, and
/// per-function single-flight admission.
pub struct Coordinator {
    registry: Arc<Registry>,
    runtime: Arc<dyn RuntimeAdapter>,
    table: InstanceTable,
    http: reqwest::Client,
    /// Per-function admission guard: only one cold start per function
    /// name may be in flight at a time. Created lazily on first use.
    start_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl Coordinator {
    pub fn new(registry: Arc<Registry>, runtime: Arc<dyn RuntimeAdapter>, table: InstanceTable) -> Self {
        Self {
            registry,
            runtime,
            table,
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(500))
                .build()
                .expect("http client builds with a fixed config"),
            start_locks: DashMap::new(),
        }
    }

    pub fn table(&self) -> &InstanceTable {
        &self.table
    }

    /// Resolves `function_name` to an upstream address, cold-starting
    /// a container if necessary. Increments the invocation counter
    /// unconditionally, matching the spec's step 1.
    #[instrument(skip(self))]
    pub async fn resolve(&self, function_name: &str) -> Result<String> {
        metrics::counter!("http_requests_total", "function" => function_name.to_string(), "status" => "invoked")
            .increment(1);

        if let Some(address) = self.table.get(function_name).await {
            self.table.touch(function_name).await;
            return Ok(address);
        }

        self.cold_start(function_name).await
    }

    async fn cold_start(&self, function_name: &str) -> Result<String> {
        let lock = self.lock_for(function_name);
        let _guard = lock.lock().await;

        // Another caller may have completed the cold start while we
        // waited for the guard; re-check before starting a second
        // container.
        if let Some(address) = self.table.get(function_name).await {
            self.table.touch(function_name).await;
            return Ok(address);
        }

        let def = self.registry.get(function_name).await?;
        let started = self.runtime.start(&def.image_reference, function_name).await?;

        if self.probe_ready(&started.address).await {
            self.table
                .register(
                    function_name,
                    started.container_id,
                    started.address.clone(),
                    def.effective_idle_timeout_seconds(),
                )
                .await;
            Ok(started.address)
        } else {
            warn!(function = function_name, "readiness probe exhausted, stopping container");
            self.runtime.stop(&started.container_id).await?;
            Err(FaasError::ReadinessTimeout)
        }
    }

    /// Pre-warms a function in anticipation of load. Does not proxy a
    /// request. Extends the lease to 300s regardless of FunctionDef.
    #[instrument(skip(self))]
    pub async fn warmup(&self, function_name: &str) -> Result<WarmupOutcome> {
        if self.table.get(function_name).await.is_some() {
            self.table.touch(function_name).await;
            return Ok(WarmupOutcome::AlreadyRunning);
        }

        let lock = self.lock_for(function_name);
        let _guard = lock.lock().await;

        if self.table.get(function_name).await.is_some() {
            self.table.touch(function_name).await;
            return Ok(WarmupOutcome::AlreadyRunning);
        }

        let def = self.registry.get(function_name).await?;
        let started = self.runtime.start(&def.image_reference, function_name).await?;

        tokio::time::sleep(WARMUP_GRACE).await;

        self.table
            .register(
                function_name,
                started.container_id,
                started.address,
                WARMUP_IDLE_TIMEOUT_SECONDS,
            )
            .await;
        info!(function = function_name, "warmed up");
        Ok(WarmupOutcome::WarmedUp)
    }

    fn lock_for(&self, function_name: &str) -> Arc<AsyncMutex<()>> {
        self.start_locks
            .entry(function_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn probe_ready(&self, address: &str) -> bool {
        let url = format!("http://{address}/health");
        for _ in 0..READINESS_ATTEMPTS {
            if let Ok(resp) = self.http.get(&url).send().await {
                if resp.status().is_success() {
                    return true;
                }
            }
            tokio::time::sleep(READINESS_INTERVAL).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faas_common::FunctionDef;
    use faas_runtime::test_support::FakeRuntimeAdapter;
    use std::sync::atomic::Ordering;
    use std::sync::Arc as StdArc;

    async fn registry_with(def: FunctionDef) -> StdArc<Registry> {
        let registry = Registry::open_in_memory().unwrap();
        registry.register(def).await.unwrap();
        StdArc::new(registry)
    }

    fn sample_def(name: &str, idle_timeout_seconds: u64) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            runtime: "docker".to_string(),
            image_reference: "example.com/greet:latest".to_string(),
            created_at: chrono::Utc::now(),
            memory_limit: 128,
            idle_timeout_seconds,
        }
    }

    #[tokio::test]
    async fn resolve_on_unknown_function_is_not_found() {
        let registry = StdArc::new(Registry::open_in_memory().unwrap());
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = Coordinator::new(registry, runtime.clone(), InstanceTable::new());

        let err = coordinator.resolve("nope").await.unwrap_err();
        assert!(matches!(err, FaasError::NotFound(_)));
        assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_cold_then_hot_reuses_instance() {
        let registry = registry_with(sample_def("greet", 60)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = Coordinator::new(registry, runtime.clone(), InstanceTable::new());

        let first = coordinator.resolve("greet").await.unwrap();
        let second = coordinator.resolve("greet").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn readiness_timeout_stops_container_and_clears_table() {
        // A runtime adapter whose started container never becomes ready:
        // probe_ready always dials a closed port, so every probe fails fast.
        let registry = registry_with(sample_def("slow", 60)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = Coordinator::new(registry, runtime.clone(), InstanceTable::new());

        // FakeRuntimeAdapter hands back 127.0.0.1:2000x, which nothing is
        // listening on, so every readiness GET fails immediately and the
        // loop runs to completion instead of waiting for real timeouts.
        let err = coordinator.resolve("slow").await.unwrap_err();
        assert!(matches!(err, FaasError::ReadinessTimeout));
        assert_eq!(runtime.stop_count(), 1);
        assert_eq!(coordinator.table().get("slow").await, None);
    }

    #[tokio::test]
    async fn start_failure_never_registers_an_instance() {
        let registry = registry_with(sample_def("broken", 60)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::failing());
        let coordinator = Coordinator::new(registry, runtime.clone(), InstanceTable::new());

        let err = coordinator.resolve("broken").await.unwrap_err();
        assert!(matches!(err, FaasError::StartFailure(_)));
        assert_eq!(coordinator.table().get("broken").await, None);
    }

    #[tokio::test]
    async fn warmup_on_cold_function_forces_300s_lease() {
        let registry = registry_with(sample_def("spike", 5)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = Coordinator::new(registry, runtime, InstanceTable::new());

        let outcome = coordinator.warmup("spike").await.unwrap();
        assert_eq!(outcome, WarmupOutcome::WarmedUp);

        // The FunctionDef asked for a 5s lease; warmup must have forced
        // the 300s override regardless.
        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(coordinator.table().get("spike").await.is_some());
    }

    #[tokio::test]
    async fn warmup_on_already_running_touches_and_reports_running() {
        let registry = registry_with(sample_def("spike", 60)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = Coordinator::new(registry, runtime.clone(), InstanceTable::new());

        coordinator.warmup("spike").await.unwrap();
        let outcome = coordinator.warmup("spike").await.unwrap();

        assert_eq!(outcome, WarmupOutcome::AlreadyRunning);
        assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_starts_for_same_function_produce_one_instance() {
        let registry = registry_with(sample_def("burst", 60)).await;
        let runtime = StdArc::new(FakeRuntimeAdapter::new());
        let coordinator = StdArc::new(Coordinator::new(registry, runtime.clone(), InstanceTable::new()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.resolve("burst").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Exactly one Instance must be present for the function no matter
        // how many containers the race allowed the adapter to start.
        assert!(coordinator.table().get("burst").await.is_some());
        // Any extra containers started by the race must have been Stop'd.
        let started = runtime.start_calls.load(Ordering::SeqCst);
        let stopped = runtime.stop_count();
        assert_eq!(stopped, started.saturating_sub(1));
    }
}
