use std::sync::Arc;

use faas_coordinator::Coordinator;
use faas_proxy::EdgeProxy;
use faas_registry::Registry;
use faas_runtime::RuntimeAdapter;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub runtime: Arc<dyn RuntimeAdapter>,
    pub coordinator: Arc<Coordinator>,
    pub proxy: Arc<EdgeProxy>,
}
