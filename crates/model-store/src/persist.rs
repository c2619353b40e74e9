//! On-disk layout: one directory per workspace holding a sqlite metadata
//! database, a `geometry/` directory with one brep blob per solid, and an
//! append-only `history/log.jsonl`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::warn;

use anvil_types::{
    ConstraintRecord, EntityRecord, OperationRecord, PropertySet, WorkspaceId, WorkspaceMeta,
};

use crate::oplog::OperationLog;
use crate::workspace::WorkspaceState;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Write-through persister for workspace state.
pub struct Persister {
    root: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl Persister {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            connections: Mutex::new(HashMap::new()),
        })
    }

    fn workspace_dir(&self, ws: &WorkspaceId) -> PathBuf {
        self.root.join(ws.as_str())
    }

    fn with_connection<T>(
        &self,
        ws: &WorkspaceId,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut connections = self.connections.lock();
        if !connections.contains_key(ws.as_str()) {
            let dir = self.workspace_dir(ws);
            fs::create_dir_all(dir.join("geometry"))?;
            fs::create_dir_all(dir.join("history"))?;
            let conn = Connection::open(dir.join("model.db"))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous  = NORMAL;
                 CREATE TABLE IF NOT EXISTS workspaces (
                     workspace_id        TEXT PRIMARY KEY,
                     meta                TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS entities (
                     id                  TEXT PRIMARY KEY,
                     kind                TEXT NOT NULL,
                     record              TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS constraints (
                     id                  TEXT PRIMARY KEY,
                     kind                TEXT NOT NULL,
                     record              TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS entity_constraints (
                     constraint_id       TEXT NOT NULL,
                     entity_id           TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS operations (
                     operation_id        INTEGER NOT NULL,
                     record              TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS validation_results (
                     entity_id           TEXT NOT NULL,
                     code                TEXT NOT NULL
                 );",
            )?;
            connections.insert(ws.as_str().to_string(), conn);
        }
        let conn = connections
            .get(ws.as_str())
            .ok_or_else(|| rusqlite::Error::InvalidQuery)?;
        f(conn)
    }

    /// Rewrite a workspace's entity, constraint and metadata tables in one
    /// transaction, and refresh solid blobs.
    pub fn sync_workspace(&self, state: &WorkspaceState) -> StoreResult<()> {
        let ws = state.id().clone();
        self.with_connection(&ws, |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM workspaces", [])?;
            tx.execute(
                "INSERT INTO workspaces (workspace_id, meta) VALUES (?1, ?2)",
                rusqlite::params![
                    state.meta.workspace_id.as_str(),
                    serde_json::to_string(&state.meta)?
                ],
            )?;
            tx.execute("DELETE FROM entities", [])?;
            tx.execute("DELETE FROM validation_results", [])?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO entities (id, kind, record) VALUES (?1, ?2, ?3)",
                )?;
                let mut vstmt = tx.prepare_cached(
                    "INSERT INTO validation_results (entity_id, code) VALUES (?1, ?2)",
                )?;
                for record in state.entities.values() {
                    stmt.execute(rusqlite::params![
                        record.id.as_str(),
                        record.kind.as_str(),
                        serde_json::to_string(record)?
                    ])?;
                    for code in &record.validation_codes {
                        vstmt.execute(rusqlite::params![record.id.as_str(), code.as_str()])?;
                    }
                }
            }
            tx.execute("DELETE FROM constraints", [])?;
            tx.execute("DELETE FROM entity_constraints", [])?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO constraints (id, kind, record) VALUES (?1, ?2, ?3)",
                )?;
                let mut estmt = tx.prepare_cached(
                    "INSERT INTO entity_constraints (constraint_id, entity_id) VALUES (?1, ?2)",
                )?;
                for record in state.constraints.values() {
                    stmt.execute(rusqlite::params![
                        record.id.as_str(),
                        record.kind.as_str(),
                        serde_json::to_string(record)?
                    ])?;
                    for entity in &record.entities {
                        estmt.execute(rusqlite::params![
                            record.id.as_str(),
                            entity.as_str()
                        ])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        self.sync_blobs(state)?;
        self.sync_snapshot(state)
    }

    fn sync_blobs(&self, state: &WorkspaceState) -> StoreResult<()> {
        let dir = self.workspace_dir(state.id()).join("geometry");
        fs::create_dir_all(&dir)?;
        let mut live: Vec<String> = Vec::new();
        for record in state.entities.values() {
            if let PropertySet::Solid { brep } = &record.properties {
                let name = format!("{}.brep", record.id);
                let path = dir.join(&name);
                live.push(name);
                fs::write(&path, brep)?;
            }
        }
        // Remove blobs of deleted solids.
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(".brep") && !live.contains(&name) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    fn sync_snapshot(&self, state: &WorkspaceState) -> StoreResult<()> {
        let Some(base) = &state.base_entities else {
            return Ok(());
        };
        let path = self.workspace_dir(state.id()).join("snapshot.json");
        let entities: Vec<&EntityRecord> = base.values().collect();
        let constraints: Vec<&ConstraintRecord> = state
            .base_constraints
            .as_ref()
            .map(|m| m.values().collect())
            .unwrap_or_default();
        let json = serde_json::json!({
            "entities": entities,
            "constraints": constraints,
        });
        fs::write(path, serde_json::to_vec(&json)?)?;
        Ok(())
    }

    /// Append one operation to the database and the history log.
    pub fn append_operation(
        &self,
        ws: &WorkspaceId,
        record: &OperationRecord,
    ) -> StoreResult<()> {
        self.with_connection(ws, |conn| {
            conn.execute(
                "INSERT INTO operations (operation_id, record) VALUES (?1, ?2)",
                rusqlite::params![record.operation_id, serde_json::to_string(record)?],
            )?;
            Ok(())
        })?;
        let path = self.workspace_dir(ws).join("history").join("log.jsonl");
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    pub fn remove_workspace(&self, ws: &WorkspaceId) -> StoreResult<()> {
        self.connections.lock().remove(ws.as_str());
        let dir = self.workspace_dir(ws);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Load every persisted workspace. Corrupt workspaces are skipped with
    /// a warning rather than failing startup.
    pub fn load_all(&self) -> StoreResult<Vec<WorkspaceState>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join("model.db").exists() {
                continue;
            }
            let ws = WorkspaceId::new(entry.file_name().to_string_lossy().to_string());
            match self.load_workspace(&ws, &entry.path()) {
                Ok(state) => out.push(state),
                Err(e) => warn!(workspace = ws.as_str(), error = %e, "skipping workspace"),
            }
        }
        Ok(out)
    }

    fn load_workspace(&self, ws: &WorkspaceId, dir: &Path) -> StoreResult<WorkspaceState> {
        self.with_connection(ws, |conn| {
            let meta: WorkspaceMeta = {
                let json: String =
                    conn.query_row("SELECT meta FROM workspaces LIMIT 1", [], |r| r.get(0))?;
                serde_json::from_str(&json)?
            };
            let mut state = WorkspaceState::new(meta);

            let mut stmt = conn.prepare("SELECT record FROM entities")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            for json in rows {
                let record: EntityRecord = serde_json::from_str(&json?)?;
                state.entities.insert(record.id.clone(), record);
            }

            let mut stmt = conn.prepare("SELECT record FROM constraints")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            for json in rows {
                let record: ConstraintRecord = serde_json::from_str(&json?)?;
                state.constraints.insert(record.id.clone(), record);
            }

            let mut stmt =
                conn.prepare("SELECT record FROM operations ORDER BY operation_id ASC")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            let mut records = Vec::new();
            for json in rows {
                records.push(serde_json::from_str::<OperationRecord>(&json?)?);
            }
            state.log = OperationLog::restore(records);

            let snapshot = dir.join("snapshot.json");
            if snapshot.exists() {
                let json: serde_json::Value = serde_json::from_slice(&fs::read(snapshot)?)?;
                let entities: Vec<EntityRecord> =
                    serde_json::from_value(json["entities"].clone())?;
                let constraints: Vec<ConstraintRecord> =
                    serde_json::from_value(json["constraints"].clone())?;
                state.base_entities =
                    Some(entities.into_iter().map(|e| (e.id.clone(), e)).collect());
                state.base_constraints = Some(
                    constraints
                        .into_iter()
                        .map(|c| (c.id.clone(), c))
                        .collect(),
                );
            }

            Ok(state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{AgentId, EntityKind, PropertySet};

    #[test]
    fn sync_and_reload_round_trips_entities() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path()).unwrap();

        let mut state = WorkspaceState::root();
        let agent = AgentId::new("p");
        state
            .create_entity(
                PropertySet::Point3d {
                    position: [1.0, 2.0, 3.0],
                },
                &agent,
                10_000,
            )
            .unwrap();
        state
            .create_entity(
                PropertySet::Solid {
                    brep: vec![1, 2, 3, 4],
                },
                &agent,
                10_000,
            )
            .unwrap();
        persister.sync_workspace(&state).unwrap();

        let loaded = persister.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let ws = &loaded[0];
        assert_eq!(ws.entities.len(), 2);
        assert_eq!(ws.id(), state.id());

        // Blob file exists under geometry/.
        let solid = state
            .entities
            .values()
            .find(|e| e.kind == EntityKind::Solid)
            .unwrap();
        let blob = dir
            .path()
            .join("main")
            .join("geometry")
            .join(format!("{}.brep", solid.id));
        assert!(blob.exists());
    }

    #[test]
    fn operations_append_to_history_log() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path()).unwrap();
        let state = WorkspaceState::root();
        persister.sync_workspace(&state).unwrap();

        let record = OperationRecord {
            operation_id: 1,
            operation_type: "entity.create.point".into(),
            workspace_id: WorkspaceId::root(),
            agent_id: AgentId::new("p"),
            timestamp: chrono::Utc::now(),
            inputs: serde_json::json!({}),
            outputs: vec![],
            status: anvil_types::OperationStatus::Success,
            error_code: None,
            execution_time_ms: 0.5,
            undo: None,
        };
        persister.append_operation(&WorkspaceId::root(), &record).unwrap();

        let log = dir.path().join("main").join("history").join("log.jsonl");
        let text = fs::read_to_string(log).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("entity.create.point"));
    }
}
