//! Durable key-value store over `FunctionDef`, keyed by name.
//!
//! Backed by SQLite (`rusqlite`, bundled) so the gateway ships with no
//! external storage dependency. Schema matches the `functions` table
//! named in the external interface: `name` is the primary key and
//! `Register` is an upsert by name.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use faas_common::{FaasError, FunctionDef, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Durable registry of function definitions.
///
/// Concurrent `Get`/`Register`/`List` calls are serialized by holding
/// the connection behind a `tokio::sync::Mutex`; each call hands the
/// actual SQLite work to `spawn_blocking` so the runtime's worker
/// threads are never stalled on file I/O.
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    /// Opens (creating if absent) the SQLite database at `path` and
    /// ensures the `functions` table exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FaasError::Storage(format!("failed to open database: {e}")))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database. Used by tests and by callers that
    /// don't need persistence across restarts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FaasError::Storage(format!("failed to open database: {e}")))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a `FunctionDef` by name. Atomic: single
    /// upsert statement.
    #[instrument(skip(self, def), fields(name = %def.name))]
    pub async fn register(&self, def: FunctionDef) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO functions (name, runtime, image_tag, created_at, memory_limit, timeout)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                     runtime = excluded.runtime,
                     image_tag = excluded.image_tag,
                     memory_limit = excluded.memory_limit,
                     timeout = excluded.timeout",
                params![
                    def.name,
                    def.runtime,
                    def.image_reference,
                    def.created_at.to_rfc3339(),
                    def.memory_limit,
                    def.idle_timeout_seconds as i64,
                ],
            )
        })
        .await
        .map_err(|e| FaasError::Internal(format!("registry task panicked: {e}")))?
        .map_err(|e| FaasError::Storage(format!("register failed: {e}")))?;
        info!("registered function");
        Ok(())
    }

    /// Look up a `FunctionDef` by name. Returns `FaasError::NotFound`
    /// if no such function is registered, distinguishable from a
    /// storage error.
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<FunctionDef> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT name, runtime, image_tag, created_at, memory_limit, timeout
                 FROM functions WHERE name = ?1",
                params![name],
                row_to_def,
            )
            .optional()
        })
        .await
        .map_err(|e| FaasError::Internal(format!("registry task panicked: {e}")))?
        .map_err(|e| FaasError::Storage(format!("get failed: {e}")))?
        .ok_or_else(|| FaasError::NotFound(name_for_not_found()))
    }

    /// Returns all registered function definitions, in arbitrary order.
    pub async fn list(&self) -> Result<Vec<FunctionDef>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT name, runtime, image_tag, created_at, memory_limit, timeout FROM functions",
            )?;
            let rows = stmt.query_map([], row_to_def)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| FaasError::Internal(format!("registry task panicked: {e}")))?
        .map_err(|e| FaasError::Storage(format!("list failed: {e}")))
    }

    /// Deletes a `FunctionDef` by name. Idempotent: removing an absent
    /// name is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<()> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM functions WHERE name = ?1", params![name])
        })
        .await
        .map_err(|e| FaasError::Internal(format!("registry task panicked: {e}")))?
        .map_err(|e| FaasError::Storage(format!("remove failed: {e}")))?;
        debug!("removed function (if present)");
        Ok(())
    }

    /// Releases the storage handle. Subsequent calls will fail; this
    /// only matters at process shutdown.
    pub async fn close(self) {
        drop(self.conn);
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS functions (
            name TEXT PRIMARY KEY,
            runtime TEXT NOT NULL,
            image_tag TEXT NOT NULL,
            created_at TEXT NOT NULL,
            memory_limit INTEGER NOT NULL,
            timeout INTEGER NOT NULL
        );",
    )
    .map_err(|e| FaasError::Storage(format!("failed to init schema: {e}")))
}

fn row_to_def(row: &rusqlite::Row<'_>) -> rusqlite::Result<FunctionDef> {
    let created_at_raw: String = row.get(3)?;
    let created_at = parse_rfc3339(&created_at_raw);
    Ok(FunctionDef {
        name: row.get(0)?,
        runtime: row.get(1)?,
        image_reference: row.get(2)?,
        created_at,
        memory_limit: row.get(4)?,
        idle_timeout_seconds: row.get::<_, i64>(5)? as u64,
    })
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

// Kept as a function rather than inlined so the NotFound message stays
// consistent if we ever want to enrich it (e.g. with a suggestion list).
fn name_for_not_found() -> String {
    "function not found".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(name: &str) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            runtime: "docker".to_string(),
            image_reference: "example.com/greet:latest".to_string(),
            created_at: Utc::now(),
            memory_limit: 128,
            idle_timeout_seconds: 60,
        }
    }

    #[tokio::test]
    async fn register_then_get_round_trips_fields() {
        let registry = Registry::open_in_memory().unwrap();
        let def = sample("greet");
        registry.register(def.clone()).await.unwrap();

        let fetched = registry.get("greet").await.unwrap();
        assert_eq!(fetched.name, def.name);
        assert_eq!(fetched.runtime, def.runtime);
        assert_eq!(fetched.image_reference, def.image_reference);
        assert_eq!(fetched.memory_limit, def.memory_limit);
        assert_eq!(fetched.idle_timeout_seconds, def.idle_timeout_seconds);
    }

    #[tokio::test]
    async fn get_on_missing_name_returns_not_found() {
        let registry = Registry::open_in_memory().unwrap();
        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, FaasError::NotFound(_)));
    }

    #[tokio::test]
    async fn register_overwrites_by_name() {
        let registry = Registry::open_in_memory().unwrap();
        registry.register(sample("greet")).await.unwrap();

        let mut updated = sample("greet");
        updated.image_reference = "example.com/greet:v2".to_string();
        updated.idle_timeout_seconds = 120;
        registry.register(updated.clone()).await.unwrap();

        let fetched = registry.get("greet").await.unwrap();
        assert_eq!(fetched.image_reference, "example.com/greet:v2");
        assert_eq!(fetched.idle_timeout_seconds, 120);

        let all = registry.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn list_returns_all_registered_functions() {
        let registry = Registry::open_in_memory().unwrap();
        registry.register(sample("a")).await.unwrap();
        registry.register(sample("b")).await.unwrap();

        let mut names: Vec<_> = registry.list().await.unwrap().into_iter().map(|f| f.name).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::open_in_memory().unwrap();
        registry.register(sample("greet")).await.unwrap();
        registry.remove("greet").await.unwrap();
        assert!(matches!(
            registry.get("greet").await.unwrap_err(),
            FaasError::NotFound(_)
        ));

        // Removing again is not an error.
        registry.remove("greet").await.unwrap();
    }

    #[tokio::test]
    async fn persists_across_handles_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanolambda.db");
        let path_str = path.to_str().unwrap().to_string();

        {
            let registry = Registry::open(&path_str).unwrap();
            registry.register(sample("greet")).await.unwrap();
        }

        let registry = Registry::open(&path_str).unwrap();
        let fetched = registry.get("greet").await.unwrap();
        assert_eq!(fetched.name, "greet");
    }
}
