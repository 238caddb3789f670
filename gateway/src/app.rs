use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{admin, invoke};

/// Builds the router against an already-constructed `AppState`. Split
/// out from `main` so tests can exercise the full HTTP surface against
/// a fake runtime adapter, without a socket or a live Docker daemon.
pub fn create_app(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/function/:name", post(invoke::invoke))
        .route("/admin/warmup", post(admin::warmup))
        .route("/admin/health", get(admin::health))
        .route(
            "/admin/functions",
            post(admin::register_function).get(admin::list_functions),
        )
        .route(
            "/admin/functions/:name",
            get(admin::get_function).delete(admin::delete_function),
        )
        .route("/admin/containers", get(admin::list_containers))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
