//! Shared domain types and the crate-wide error taxonomy for nanolambda.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The single error type that crosses crate boundaries in this workspace.
///
/// Each variant corresponds to a row in the error taxonomy: the gateway
/// binary maps these to HTTP status codes, the Reaper logs and discards
/// them instead.
#[derive(Error, Debug)]
pub enum FaasError {
    #[error("function not found: {0}")]
    NotFound(String),

    #[error("failed to start container: {0}")]
    StartFailure(String),

    #[error("readiness probe timed out")]
    ReadinessTimeout,

    #[error("proxy transport error: {0}")]
    ProxyTransport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FaasError>;

/// Default idle timeout applied when a FunctionDef doesn't specify one.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 10;

/// Idle timeout forced onto the warmup path regardless of FunctionDef.
pub const WARMUP_IDLE_TIMEOUT_SECONDS: u64 = 300;

/// Fixed internal port every function container exposes its HTTP surface on.
pub const CONTAINER_PORT: u16 = 8080;

/// A deployed serverless function: name, image, and invocation policy.
///
/// Persisted by the Registry, keyed by `name`. Re-registering a name
/// overwrites every other field atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub runtime: String,
    pub image_reference: String,
    pub created_at: DateTime<Utc>,
    pub memory_limit: i64,
    pub idle_timeout_seconds: u64,
}

impl FunctionDef {
    /// The idle timeout this definition implies, with the 10s fallback
    /// applied for a definition that asked for zero.
    pub fn effective_idle_timeout_seconds(&self) -> u64 {
        if self.idle_timeout_seconds == 0 {
            DEFAULT_IDLE_TIMEOUT_SECONDS
        } else {
            self.idle_timeout_seconds
        }
    }
}

/// A descriptor for a container the Runtime Adapter recognizes, used only
/// for the `ListManaged`/diagnostics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub container_id: String,
    pub image: String,
    pub names: Vec<String>,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_idle_timeout_falls_back_to_default() {
        let mut def = sample_def();
        def.idle_timeout_seconds = 0;
        assert_eq!(
            def.effective_idle_timeout_seconds(),
            DEFAULT_IDLE_TIMEOUT_SECONDS
        );

        def.idle_timeout_seconds = 42;
        assert_eq!(def.effective_idle_timeout_seconds(), 42);
    }

    #[test]
    fn serializes_round_trip() {
        let def = sample_def();
        let json = serde_json::to_string(&def).unwrap();
        let back: FunctionDef = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }

    fn sample_def() -> FunctionDef {
        FunctionDef {
            name: "greet".to_string(),
            runtime: "docker".to_string(),
            image_reference: "example.com/greet:latest".to_string(),
            created_at: Utc::now(),
            memory_limit: 128,
            idle_timeout_seconds: 60,
        }
    }
}
