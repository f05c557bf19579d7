//! Injected persistence boundary.
//!
//! The core never writes files ad hoc; everything that must survive a
//! process restart (agents, tasks, logged messages, persistent-tier memory)
//! goes through a [`DurableStore`]. The store's own schema is opaque to the
//! core beyond the `save`/`get`/`list`/`delete` operations.

use std::path::PathBuf;

use dashmap::DashMap;
use rusqlite::{params, Connection};
use serde_json::Value;

/// Record kind for agents.
pub const KIND_AGENT: &str = "agent";
/// Record kind for tasks.
pub const KIND_TASK: &str = "task";
/// Record kind for logged messages.
pub const KIND_MESSAGE: &str = "message";
/// Record kind for persistent-tier memory entries.
pub const KIND_MEMORY: &str = "memory";

/// Durable key-value storage keyed by record kind and identifier.
///
/// Implementations must be safe to call from the maintenance sweeps, so the
/// trait is `Send + Sync`. Errors are opaque to the core.
pub trait DurableStore: Send + Sync {
    /// Insert or replace a record.
    fn save(&self, kind: &str, id: &str, payload: &Value) -> Result<(), anyhow::Error>;

    /// Fetch a record by id.
    fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, anyhow::Error>;

    /// Fetch every record of a kind.
    fn list(&self, kind: &str) -> Result<Vec<Value>, anyhow::Error>;

    /// Delete a record. Deleting an absent record is a no-op.
    fn delete(&self, kind: &str, id: &str) -> Result<(), anyhow::Error>;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// SQLite-backed durable store.
///
/// All record kinds share one `records` table keyed by `(kind, id)`, with
/// payloads stored as JSON text. A connection is opened per operation;
/// SQLite serializes access on the file itself.
pub struct SqliteStore {
    /// Path to the database file.
    pub db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn new(db_path: PathBuf) -> Result<Self, anyhow::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        store.initialize_db()?;
        Ok(store)
    }

    fn initialize_db(&self) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )",
            [],
        )?;
        Ok(())
    }
}

impl DurableStore for SqliteStore {
    fn save(&self, kind: &str, id: &str, payload: &Value) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT OR REPLACE INTO records (kind, id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                kind,
                id,
                serde_json::to_string(payload)?,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt =
            conn.prepare("SELECT payload FROM records WHERE kind = ?1 AND id = ?2")?;
        let mut rows = stmt.query(params![kind, id])?;
        match rows.next()? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    fn list(&self, kind: &str) -> Result<Vec<Value>, anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt =
            conn.prepare("SELECT payload FROM records WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND id = ?2",
            params![kind, id],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

/// Volatile store for tests and configurations that opt out of durability.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<(String, String), Value>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for InMemoryStore {
    fn save(&self, kind: &str, id: &str, payload: &Value) -> Result<(), anyhow::Error> {
        self.records
            .insert((kind.to_string(), id.to_string()), payload.clone());
        Ok(())
    }

    fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, anyhow::Error> {
        Ok(self
            .records
            .get(&(kind.to_string(), id.to_string()))
            .map(|v| v.clone()))
    }

    fn list(&self, kind: &str) -> Result<Vec<Value>, anyhow::Error> {
        let mut keyed: Vec<(String, Value)> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, v)| v).collect())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), anyhow::Error> {
        self.records.remove(&(kind.to_string(), id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &dyn DurableStore) {
        let payload = json!({"name": "research-1", "status": "idle"});
        store.save(KIND_AGENT, "a-1", &payload).unwrap();
        assert_eq!(store.get(KIND_AGENT, "a-1").unwrap(), Some(payload.clone()));

        // Replacement keeps a single record per (kind, id).
        let updated = json!({"name": "research-1", "status": "busy"});
        store.save(KIND_AGENT, "a-1", &updated).unwrap();
        assert_eq!(store.list(KIND_AGENT).unwrap().len(), 1);
        assert_eq!(store.get(KIND_AGENT, "a-1").unwrap(), Some(updated));

        // Kinds are independent namespaces.
        store.save(KIND_TASK, "a-1", &json!({"kind": "task"})).unwrap();
        assert_eq!(store.list(KIND_AGENT).unwrap().len(), 1);
        assert_eq!(store.list(KIND_TASK).unwrap().len(), 1);

        store.delete(KIND_AGENT, "a-1").unwrap();
        assert_eq!(store.get(KIND_AGENT, "a-1").unwrap(), None);
        // Deleting again is a no-op.
        store.delete(KIND_AGENT, "a-1").unwrap();
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("swarm.db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.db");
        {
            let store = SqliteStore::new(path.clone()).unwrap();
            store
                .save(KIND_MEMORY, "k1", &json!({"value": 42}))
                .unwrap();
        }
        let store = SqliteStore::new(path).unwrap();
        assert_eq!(
            store.get(KIND_MEMORY, "k1").unwrap(),
            Some(json!({"value": 42}))
        );
    }
}
