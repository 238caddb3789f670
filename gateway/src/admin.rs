//! Administrative surface: warmup, health, function CRUD, container
//! diagnostics. None of this is a deployment CLI or a dashboard; it's
//! the thin HTTP surface those tools would sit behind.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use faas_common::{FaasError, FunctionDef};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WarmupRequest {
    pub function: String,
}

#[derive(Debug, Serialize)]
pub struct WarmupResponse {
    pub status: &'static str,
}

#[instrument(skip(state))]
pub async fn warmup(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<WarmupResponse>, ApiError> {
    // Deserialized from `Value` rather than `Json<WarmupRequest>`
    // directly: axum maps a schema mismatch on the latter (missing
    // `function`, wrong type, ...) to 422. A malformed warmup body
    // should be a 400, like every other bad-request case here.
    let req: WarmupRequest = serde_json::from_value(body).map_err(|e| {
        FaasError::BadRequest(format!("invalid warmup request body: {e}"))
    })?;

    if req.function.trim().is_empty() {
        return Err(ApiError::from(FaasError::BadRequest(
            "function name must not be empty".to_string(),
        )));
    }

    let outcome = state.coordinator.warmup(&req.function).await?;
    let status = match outcome {
        faas_coordinator::WarmupOutcome::AlreadyRunning => "already_running",
        faas_coordinator::WarmupOutcome::WarmedUp => "warmed_up",
    };
    Ok(Json(WarmupResponse { status }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "component": "gateway" }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterFunctionRequest {
    pub name: String,
    pub runtime: String,
    pub image_reference: String,
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default)]
    pub idle_timeout_seconds: u64,
}

#[instrument(skip(state))]
pub async fn register_function(
    State(state): State<AppState>,
    Json(req): Json<RegisterFunctionRequest>,
) -> Result<Json<FunctionDef>, ApiError> {
    if req.name.trim().is_empty() || req.image_reference.trim().is_empty() {
        return Err(ApiError::from(FaasError::BadRequest(
            "name and image_reference are required".to_string(),
        )));
    }

    let def = FunctionDef {
        name: req.name,
        runtime: req.runtime,
        image_reference: req.image_reference,
        created_at: Utc::now(),
        memory_limit: req.memory_limit,
        idle_timeout_seconds: req.idle_timeout_seconds,
    };
    state.registry.register(def.clone()).await?;
    Ok(Json(def))
}

pub async fn list_functions(
    State(state): State<AppState>,
) -> Result<Json<Vec<FunctionDef>>, ApiError> {
    let defs = state.registry.list().await?;
    Ok(Json(defs))
}

pub async fn get_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FunctionDef>, ApiError> {
    let def = state.registry.get(&name).await?;
    Ok(Json(def))
}

pub async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.remove(&name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn list_containers(
    State(state): State<AppState>,
) -> Result<Json<Vec<faas_common::ContainerDescriptor>>, ApiError> {
    let containers = state.runtime.list_managed().await?;
    Ok(Json(containers))
}
