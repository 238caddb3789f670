mod admin;
mod app;
mod error;
mod invoke;
mod state;

use std::env;
use std::sync::Arc;

use faas_coordinator::{Coordinator, InstanceTable, Reaper};
use faas_proxy::EdgeProxy;
use faas_registry::Registry;
use faas_runtime::{DockerRuntimeAdapter, RuntimeAdapter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use crate::app::create_app;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once");

    let database_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/nanolambda.db".to_string());
    if let Some(parent) = std::path::Path::new(&database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let registry = Arc::new(Registry::open(&database_path)?);

    let runtime: Arc<dyn RuntimeAdapter> = Arc::new(DockerRuntimeAdapter::connect_local()?);

    let table = InstanceTable::new();
    let coordinator = Arc::new(Coordinator::new(registry.clone(), runtime.clone(), table.clone()));
    let proxy = Arc::new(EdgeProxy::new());

    let reaper = Reaper::new(table, runtime.clone());
    tokio::spawn(reaper.run());

    let state = AppState {
        registry,
        runtime,
        coordinator,
        proxy,
    };

    let app = create_app(state, prometheus_handle);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
