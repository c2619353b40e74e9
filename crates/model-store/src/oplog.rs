//! Append-only per-workspace operation history with cursor-based
//! undo/redo. A new operation truncates the redo tail; error entries are
//! recorded but never replayed.

use chrono::{DateTime, Duration, Utc};

use anvil_types::{OperationRecord, UndoPayload};

/// Forward payload captured while undoing, sufficient to redo without
/// re-running the original handler or kernel.
#[derive(Debug, Clone)]
pub enum RedoPayload {
    CreateEntity {
        record: Box<anvil_types::EntityRecord>,
    },
    ModifyEntity {
        id: anvil_types::EntityId,
        properties: Box<anvil_types::PropertySet>,
    },
    DeleteEntity {
        id: anvil_types::EntityId,
    },
    CreateConstraint {
        record: Box<anvil_types::ConstraintRecord>,
    },
    DeleteConstraint {
        id: anvil_types::ConstraintId,
    },
    Composite {
        items: Vec<RedoPayload>,
    },
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub record: OperationRecord,
    /// Present only while the entry sits in the redo tail.
    pub redo: Option<RedoPayload>,
}

#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
    /// Number of applied entries; everything at or past this index is the
    /// redo tail.
    cursor: usize,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            next_id: 1,
            last_timestamp: None,
        }
    }

    /// Applied operation count.
    pub fn applied_count(&self) -> usize {
        self.cursor
    }

    /// Highest applied operation id, used as a branch divergence point.
    pub fn last_applied_id(&self) -> Option<u64> {
        self.entries[..self.cursor]
            .last()
            .map(|e| e.record.operation_id)
    }

    /// Next id and a timestamp guaranteed strictly after the previous one.
    pub fn stamp(&mut self) -> (u64, DateTime<Utc>) {
        let id = self.next_id;
        let mut now = Utc::now();
        if let Some(prev) = self.last_timestamp {
            if now <= prev {
                now = prev + Duration::microseconds(1);
            }
        }
        (id, now)
    }

    /// Append a finished operation, truncating any redo tail.
    pub fn append(&mut self, record: OperationRecord) {
        self.entries.truncate(self.cursor);
        self.next_id = self.next_id.max(record.operation_id + 1);
        self.last_timestamp = Some(record.timestamp);
        self.entries.push(LogEntry {
            record,
            redo: None,
        });
        self.cursor = self.entries.len();
    }

    /// Applied entries, newest first, paginated.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<&OperationRecord> {
        self.entries[..self.cursor]
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|e| &e.record)
            .collect()
    }

    /// Walk back to the most recent reversible entry, skipping error
    /// records and informational entries without an undo payload. Returns
    /// `None` when there is nothing to undo. The caller applies the
    /// payload and hands back the captured redo payload via `confirm_undo`.
    pub fn begin_undo(&mut self) -> Option<(usize, UndoPayload, OperationRecord)> {
        let mut idx = self.cursor;
        while idx > 0 {
            idx -= 1;
            let entry = &self.entries[idx];
            if !entry.record.is_reversible() {
                continue;
            }
            let payload = entry.record.undo.clone()?;
            return Some((idx, payload, entry.record.clone()));
        }
        None
    }

    /// Finish an undo started with `begin_undo`.
    pub fn confirm_undo(&mut self, idx: usize, redo: RedoPayload) {
        self.entries[idx].redo = Some(redo);
        self.cursor = idx;
    }

    /// Next redoable entry at or after the cursor. Entries without a redo
    /// payload changed nothing when they were walked over and are skipped.
    pub fn begin_redo(&mut self) -> Option<(usize, RedoPayload, OperationRecord)> {
        let mut idx = self.cursor;
        while idx < self.entries.len() {
            let entry = &self.entries[idx];
            match &entry.redo {
                Some(payload) => return Some((idx, payload.clone(), entry.record.clone())),
                None => idx += 1,
            }
        }
        None
    }

    pub fn confirm_redo(&mut self, idx: usize) {
        self.entries[idx].redo = None;
        self.cursor = idx + 1;
    }

    /// All entries (applied and redo tail), for persistence.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Restore from persisted records (all treated as applied).
    pub fn restore(records: Vec<OperationRecord>) -> Self {
        let next_id = records
            .iter()
            .map(|r| r.operation_id + 1)
            .max()
            .unwrap_or(1);
        let last_timestamp = records.last().map(|r| r.timestamp);
        let entries: Vec<LogEntry> = records
            .into_iter()
            .map(|record| LogEntry {
                record,
                redo: None,
            })
            .collect();
        let cursor = entries.len();
        Self {
            entries,
            cursor,
            next_id,
            last_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{AgentId, EntityId, OperationStatus, WorkspaceId};

    fn record(id: u64, status: OperationStatus, undo: Option<UndoPayload>) -> OperationRecord {
        OperationRecord {
            operation_id: id,
            operation_type: "entity.create.point".to_string(),
            workspace_id: WorkspaceId::root(),
            agent_id: AgentId::new("a"),
            timestamp: Utc::now(),
            inputs: serde_json::json!({}),
            outputs: vec![],
            status,
            error_code: None,
            execution_time_ms: 0.1,
            undo,
        }
    }

    fn create_payload(tag: &str) -> UndoPayload {
        UndoPayload::CreatedEntity {
            id: EntityId(format!("main:point3d_{tag}")),
        }
    }

    #[test]
    fn append_assigns_monotonic_timestamps() {
        let mut log = OperationLog::new();
        let (id1, t1) = log.stamp();
        log.append(record(id1, OperationStatus::Success, Some(create_payload("a"))));
        let (id2, t2) = log.stamp();
        assert!(id2 > id1);
        assert!(t2 >= t1);
    }

    #[test]
    fn undo_skips_error_entries() {
        let mut log = OperationLog::new();
        log.append(record(1, OperationStatus::Success, Some(create_payload("a"))));
        log.append(record(2, OperationStatus::Error, None));
        let (idx, payload, rec) = log.begin_undo().expect("undoable entry");
        assert_eq!(idx, 0);
        assert_eq!(rec.operation_id, 1);
        assert!(matches!(payload, UndoPayload::CreatedEntity { .. }));
    }

    #[test]
    fn new_operation_truncates_redo_tail() {
        let mut log = OperationLog::new();
        log.append(record(1, OperationStatus::Success, Some(create_payload("a"))));
        log.append(record(2, OperationStatus::Success, Some(create_payload("b"))));
        let (idx, _payload, _rec) = log.begin_undo().unwrap();
        log.confirm_undo(
            idx,
            RedoPayload::DeleteEntity {
                id: EntityId("main:point3d_b".into()),
            },
        );
        assert_eq!(log.applied_count(), 1);
        assert!(log.begin_redo().is_some());
        log.append(record(3, OperationStatus::Success, Some(create_payload("c"))));
        assert!(log.begin_redo().is_none());
        assert_eq!(log.applied_count(), 2);
    }

    #[test]
    fn list_is_reverse_chronological_and_paginated() {
        let mut log = OperationLog::new();
        for i in 1..=5 {
            log.append(record(i, OperationStatus::Success, Some(create_payload("x"))));
        }
        let page = log.list(2, 1);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].operation_id, 4);
        assert_eq!(page[1].operation_id, 3);
    }
}
