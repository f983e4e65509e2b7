//! 变更跟踪（Mutation Tracker）
//!
//! 每一次对可同步记录的本地写入都会追加一条 `SyncEvent` 到 `sync_events` 表。
//! 协调引擎自身的写入通过 [`WriteOrigin::Reconciliation`] 标记，跟踪器对其不做任何记录，
//! 以免污染它自己要查询的日志。
//!
//! 日志写入是尽力而为的：失败只会通过 tracing 和失败回调上报，
//! 不会阻塞或回滚主写入。

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::identity::SyncEntity;
use crate::models::{new_id, now_millis, SyncAction, SyncEvent};

/// 写入来源标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// 编辑器等普通本地写入
    Local,
    /// 协调引擎写入（不记录）
    Reconciliation,
}

/// 日志写入失败的描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerFailure {
    pub notebook_id: String,
    pub entity_name: String,
    pub entity_id: String,
    pub action: SyncAction,
    pub message: String,
}

/// 失败上报回调
pub type TrackerFailureCallback = Arc<dyn Fn(&TrackerFailure) + Send + Sync>;

/// 变更跟踪器
#[derive(Clone, Default)]
pub struct MutationTracker {
    on_failure: Option<TrackerFailureCallback>,
}

impl std::fmt::Debug for MutationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationTracker")
            .field("has_failure_callback", &self.on_failure.is_some())
            .finish()
    }
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志写入失败时的回调
    pub fn with_failure_callback(mut self, callback: TrackerFailureCallback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    /// 记录一次写入
    ///
    /// # 参数
    /// * `action` - 写入动作
    /// * `record` - 写入后的快照（删除时为删除前的快照）
    /// * `origin` - 写入来源；`Reconciliation` 时直接返回
    ///
    /// # 返回
    /// 成功追加的事件；未记录（协调写入、分区无法解析、日志写入失败）时为 `None`
    pub fn record<E: SyncEntity>(
        &self,
        conn: &Connection,
        action: SyncAction,
        record: &E,
        origin: WriteOrigin,
    ) -> Option<SyncEvent> {
        if origin == WriteOrigin::Reconciliation {
            return None;
        }

        let entity_id = record.canonical_id();
        let Some(notebook_id) = record.owner_notebook_id() else {
            tracing::debug!(
                "[Tracker] {} {} 缺少 notebookId，跳过记录",
                E::KIND,
                entity_id
            );
            return None;
        };

        let mut event = SyncEvent {
            id: new_id(),
            notebook_id: notebook_id.to_string(),
            entity_name: E::KIND.as_str().to_string(),
            entity_id,
            action,
            created_at: now_millis(),
            seq: 0,
        };

        match MutationLog::append(conn, &event) {
            Ok(seq) => {
                event.seq = seq;
                tracing::trace!(
                    "[Tracker] {} {} {} (notebook={})",
                    event.action.as_str(),
                    event.entity_name,
                    event.entity_id,
                    event.notebook_id
                );
                Some(event)
            }
            Err(e) => {
                tracing::warn!(
                    "[Tracker] 写入变更日志失败（不影响主写入）: {} {} {}: {}",
                    action.as_str(),
                    event.entity_name,
                    event.entity_id,
                    e
                );
                if let Some(callback) = self.on_failure.as_ref() {
                    callback(&TrackerFailure {
                        notebook_id: event.notebook_id,
                        entity_name: event.entity_name,
                        entity_id: event.entity_id,
                        action,
                        message: e.to_string(),
                    });
                }
                None
            }
        }
    }
}

/// 变更日志统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationLogStats {
    pub total: usize,
    pub by_notebook: HashMap<String, usize>,
}

/// `sync_events` 表的查询与清理
pub struct MutationLog;

impl MutationLog {
    /// 追加一条事件，返回其序号
    pub fn append(conn: &Connection, event: &SyncEvent) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO sync_events (id, notebook_id, entity_name, entity_id, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.notebook_id,
                event.entity_name,
                event.entity_id,
                event.action.as_str(),
                event.created_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 某分区自上次成功推送以来的全部事件（按时间升序）
    pub fn pending_events(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<SyncEvent>> {
        let mut stmt = conn.prepare(
            "SELECT seq, id, notebook_id, entity_name, entity_id, action, created_at
             FROM sync_events
             WHERE notebook_id = ?1
             ORDER BY created_at ASC, seq ASC",
        )?;
        let rows = stmt.query_map(params![notebook_id], Self::event_from_row)?;

        let mut events = Vec::new();
        for row in rows {
            match row {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("[Tracker] 跳过无法解析的变更日志: {}", e),
            }
        }
        Ok(events)
    }

    pub fn pending_count(conn: &Connection, notebook_id: &str) -> rusqlite::Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_events WHERE notebook_id = ?1",
            params![notebook_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 当前分区最大事件序号
    pub fn max_seq(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Option<i64>> {
        conn.query_row(
            "SELECT MAX(seq) FROM sync_events WHERE notebook_id = ?1",
            params![notebook_id],
            |row| row.get(0),
        )
    }

    /// 删除分区内序号不大于 `seq` 的事件
    pub fn clear_through(conn: &Connection, notebook_id: &str, seq: i64) -> rusqlite::Result<usize> {
        conn.execute(
            "DELETE FROM sync_events WHERE notebook_id = ?1 AND seq <= ?2",
            params![notebook_id, seq],
        )
    }

    /// 删除分区全部事件
    pub fn clear(conn: &Connection, notebook_id: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "DELETE FROM sync_events WHERE notebook_id = ?1",
            params![notebook_id],
        )
    }

    pub fn stats(conn: &Connection) -> rusqlite::Result<MutationLogStats> {
        let mut stmt =
            conn.prepare("SELECT notebook_id, COUNT(*) FROM sync_events GROUP BY notebook_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = MutationLogStats::default();
        for row in rows {
            let (notebook_id, count) = row?;
            stats.total += count as usize;
            stats.by_notebook.insert(notebook_id, count as usize);
        }
        Ok(stats)
    }

    fn event_from_row(row: &Row) -> rusqlite::Result<SyncEvent> {
        let raw_action: String = row.get(5)?;
        let action = SyncAction::from_str(&raw_action).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown sync action: {}", raw_action).into(),
            )
        })?;
        Ok(SyncEvent {
            seq: row.get(0)?,
            id: row.get(1)?,
            notebook_id: row.get(2)?,
            entity_name: row.get(3)?,
            entity_id: row.get(4)?,
            action,
            created_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, NoteTag, Notebook, Tag};
    use crate::store::{remove_entity, test_connection, write_entity};
    use std::sync::Mutex;

    #[test]
    fn test_local_write_appends_event() {
        let conn = test_connection();
        let tracker = MutationTracker::new();
        let nb = Notebook::new("Work");
        let note = Note::new(&nb.id, "hello");

        write_entity(&conn, &tracker, &nb, WriteOrigin::Local).unwrap();
        write_entity(&conn, &tracker, &note, WriteOrigin::Local).unwrap();

        let events = MutationLog::pending_events(&conn, &nb.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_name, "notebook");
        assert_eq!(events[1].entity_name, "note");
        assert_eq!(events[1].entity_id, note.id);
        assert_eq!(events[1].action, SyncAction::Create);
    }

    #[test]
    fn test_reconciliation_write_is_not_logged() {
        let conn = test_connection();
        let tracker = MutationTracker::new();
        let nb = Notebook::new("Work");

        write_entity(&conn, &tracker, &nb, WriteOrigin::Reconciliation).unwrap();
        remove_entity::<Notebook>(&conn, &tracker, &nb.id, WriteOrigin::Reconciliation).unwrap();

        assert_eq!(MutationLog::pending_count(&conn, &nb.id).unwrap(), 0);
    }

    #[test]
    fn test_composite_key_event_uses_canonical_id() {
        let conn = test_connection();
        let tracker = MutationTracker::new();
        let nb = Notebook::new("Work");
        let note = Note::new(&nb.id, "x");
        let tag = Tag::new(&nb.id, "t");
        let link = NoteTag::new(&nb.id, &note.id, &tag.id);
        write_entity(&conn, &tracker, &nb, WriteOrigin::Reconciliation).unwrap();
        write_entity(&conn, &tracker, &note, WriteOrigin::Reconciliation).unwrap();
        write_entity(&conn, &tracker, &tag, WriteOrigin::Reconciliation).unwrap();

        write_entity(&conn, &tracker, &link, WriteOrigin::Local).unwrap();
        remove_entity::<NoteTag>(&conn, &tracker, &link.canonical_id(), WriteOrigin::Local)
            .unwrap();

        let events = MutationLog::pending_events(&conn, &nb.id).unwrap();
        let expected = format!("{}:{}", note.id, tag.id);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.entity_id == expected));
        assert_eq!(events[1].action, SyncAction::Delete);
    }

    #[test]
    fn test_unresolved_notebook_skips_logging() {
        let conn = test_connection();
        let tracker = MutationTracker::new();
        let mut tag = Tag::new("", "orphan");
        tag.notebook_id.clear();

        let logged = tracker.record(&conn, SyncAction::Create, &tag, WriteOrigin::Local);
        assert!(logged.is_none());
        assert_eq!(MutationLog::stats(&conn).unwrap().total, 0);
    }

    #[test]
    fn test_log_failure_does_not_block_primary_write() {
        let conn = test_connection();
        let failures: Arc<Mutex<Vec<TrackerFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let tracker = MutationTracker::new().with_failure_callback(Arc::new(move |f| {
            sink.lock().unwrap().push(f.clone());
        }));
        conn.execute_batch("DROP TABLE sync_events;").unwrap();

        let nb = Notebook::new("Work");
        let action = write_entity(&conn, &tracker, &nb, WriteOrigin::Local);

        assert!(action.is_ok(), "主写入不应因日志失败而失败");
        assert!(crate::store::exists(&conn, crate::identity::EntityKind::Notebook, &nb.id).unwrap());
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entity_id, nb.id);
    }

    #[test]
    fn test_clear_through_keeps_later_events() {
        let conn = test_connection();
        let tracker = MutationTracker::new();
        let nb = Notebook::new("Work");
        write_entity(&conn, &tracker, &nb, WriteOrigin::Local).unwrap();
        let boundary = MutationLog::max_seq(&conn, &nb.id).unwrap().unwrap();
        let note = Note::new(&nb.id, "later");
        write_entity(&conn, &tracker, &note, WriteOrigin::Local).unwrap();

        let cleared = MutationLog::clear_through(&conn, &nb.id, boundary).unwrap();

        assert_eq!(cleared, 1);
        let remaining = MutationLog::pending_events(&conn, &nb.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entity_id, note.id);
    }
}
