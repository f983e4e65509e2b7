//! 协调引擎（pull）
//!
//! 把远端快照合并进本地分区。整个合并在一个 SQLite 事务内完成，
//! 事务内没有 `.await`：要么全部提交，要么全部回滚。
//!
//! 规则（每种类型相同，按 Notebook → Tag → Note → MenuItem → NoteTag 顺序处理）：
//! - 远端有、本地有：带 updatedAt 的类型只在远端严格更新时覆盖；无 updatedAt 的类型远端优先
//! - 远端有、本地无：变更日志里有 delete 事件则不复活，否则插入
//! - 本地有、远端无：变更日志里有 create 事件则保留，否则删除
//! - 非 Notebook 记录写入前必须能找到本地笔记本（以及 NoteTag 的笔记与标签），否则跳过

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::document::{remote_document_key, ParsedSnapshot, RejectedRecords, SnapshotDocument};
use super::SyncError;
use crate::cloud_storage::CloudStorage;
use crate::identity::{EntityKind, SyncEntity};
use crate::models::{MenuItem, Note, NoteTag, Notebook, SyncAction, SyncEvent, Tag};
use crate::store::{exists, remove_entity, write_entity, NotesDatabase, StoredEntity};
use crate::tracker::{MutationLog, MutationTracker, WriteOrigin};

/// 单个类型的合并统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// 本地较新或与远端相同，未写入
    pub unchanged: usize,
    /// 本地待推送的新建记录，远端缺失但保留
    pub kept_local: usize,
    /// 本地已删除、远端仍存在，未复活
    pub suppressed: usize,
    pub skipped: usize,
}

impl KindReport {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// 被跳过的远端记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub kind: EntityKind,
    pub entity_id: String,
    pub reason: String,
}

/// 一次 pull 的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub notebook_id: String,
    /// 远端是否存在快照文档
    pub remote_found: bool,
    pub kinds: BTreeMap<EntityKind, KindReport>,
    pub skipped: Vec<SkippedRecord>,
    /// 非致命错误（例如单条远端记录格式错误）
    pub errors: Vec<String>,
}

impl ReconcileReport {
    fn new(notebook_id: &str) -> Self {
        Self {
            notebook_id: notebook_id.to_string(),
            ..Default::default()
        }
    }

    pub fn kind(&self, kind: EntityKind) -> KindReport {
        self.kinds.get(&kind).cloned().unwrap_or_default()
    }

    /// 本地实际写入次数（插入 + 更新 + 删除）
    pub fn total_writes(&self) -> usize {
        self.kinds.values().map(KindReport::writes).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.len()
    }
}

/// 变更日志索引：(类型, 规范化标识, 动作)
#[derive(Debug, Default)]
pub struct MutationLogIndex {
    entries: HashSet<(EntityKind, String, SyncAction)>,
}

impl MutationLogIndex {
    pub fn from_events(events: &[SyncEvent]) -> Self {
        let mut entries = HashSet::with_capacity(events.len());
        for event in events {
            match EntityKind::from_str(&event.entity_name) {
                Some(kind) => {
                    entries.insert((kind, event.entity_id.clone(), event.action));
                }
                None => tracing::warn!(
                    "[sync] 忽略未知类型的变更日志: {} {}",
                    event.entity_name,
                    event.entity_id
                ),
            }
        }
        Self { entries }
    }

    pub fn contains(&self, kind: EntityKind, entity_id: &str, action: SyncAction) -> bool {
        self.entries
            .contains(&(kind, entity_id.to_string(), action))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Reconciler<'a> {
    conn: &'a Connection,
    notebook_id: &'a str,
    log: MutationLogIndex,
    rejected: &'a RejectedRecords,
    tracker: MutationTracker,
    report: ReconcileReport,
}

impl<'a> Reconciler<'a> {
    fn skip(&mut self, kind: EntityKind, entity_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!("[sync] 跳过 {} {}: {}", kind, entity_id, reason);
        self.report.kinds.entry(kind).or_default().skipped += 1;
        self.report.skipped.push(SkippedRecord {
            kind,
            entity_id: entity_id.to_string(),
            reason,
        });
    }

    /// 写入前的引用检查；返回不满足时的原因
    fn missing_reference<E: SyncEntity>(&self, record: &E) -> rusqlite::Result<Option<String>> {
        if E::KIND != EntityKind::Notebook
            && !exists(self.conn, EntityKind::Notebook, self.notebook_id)?
        {
            return Ok(Some(format!("笔记本 {} 在本地不存在", self.notebook_id)));
        }
        for (kind, id) in record.dependencies() {
            if !exists(self.conn, kind, &id)? {
                return Ok(Some(format!("依赖的 {} {} 在本地不存在", kind, id)));
            }
        }
        Ok(None)
    }

    fn reconcile_kind<E: StoredEntity>(&mut self, remote: Option<&[E]>) -> Result<(), SyncError> {
        let kind = E::KIND;
        let Some(remote) = remote else {
            tracing::debug!("[sync] 远端快照未包含 {}，保持本地不变", kind);
            return Ok(());
        };

        let mut local: HashMap<String, E> = E::list_in_notebook(self.conn, self.notebook_id)?
            .into_iter()
            .map(|record| (record.canonical_id(), record))
            .collect();
        let mut seen: HashSet<String> = HashSet::with_capacity(remote.len());
        let mut counts = KindReport::default();

        for record in remote {
            let id = record.canonical_id();
            if id.trim().is_empty() {
                self.skip(kind, &id, "缺少标识");
                continue;
            }
            if !seen.insert(id.clone()) {
                self.skip(kind, &id, "远端快照中重复出现");
                continue;
            }
            match record.owner_notebook_id() {
                None => {
                    self.skip(kind, &id, "缺少 notebookId");
                    continue;
                }
                Some(owner) if owner != self.notebook_id => {
                    self.skip(kind, &id, format!("属于其他笔记本 {}", owner));
                    continue;
                }
                Some(_) => {}
            }

            match local.remove(&id) {
                Some(existing) => {
                    let remote_wins = match (record.updated_at(), existing.updated_at()) {
                        (Some(remote_ts), Some(local_ts)) => remote_ts > local_ts,
                        // 无 updatedAt 的类型远端优先；内容相同则不写
                        _ => *record != existing,
                    };
                    if !remote_wins {
                        counts.unchanged += 1;
                        continue;
                    }
                    if let Some(reason) = self.missing_reference(record)? {
                        self.skip(kind, &id, reason);
                        continue;
                    }
                    write_entity(self.conn, &self.tracker, record, WriteOrigin::Reconciliation)?;
                    counts.updated += 1;
                }
                None => {
                    if self.log.contains(kind, &id, SyncAction::Delete) {
                        counts.suppressed += 1;
                        continue;
                    }
                    // 同一标识已存在于其他分区：不能借 upsert 把它搬进来
                    if let Some(other) = E::get(self.conn, &id)? {
                        let owner = other.owner_notebook_id().unwrap_or("").to_string();
                        self.skip(kind, &id, format!("标识已被笔记本 {} 占用", owner));
                        continue;
                    }
                    if let Some(reason) = self.missing_reference(record)? {
                        self.skip(kind, &id, reason);
                        continue;
                    }
                    write_entity(self.conn, &self.tracker, record, WriteOrigin::Reconciliation)?;
                    counts.inserted += 1;
                }
            }
        }

        // 有取不出标识的被拒记录时无法判断哪些本地记录真正被远端删除
        let deletion_blocked = self.rejected.has_unidentified(kind);
        if deletion_blocked && !local.is_empty() {
            tracing::warn!(
                "[sync] 远端 {} 含无法识别的格式错误记录，本轮不删除本地 {} 记录",
                kind,
                kind
            );
        }

        // 本地剩余的记录在远端缺失
        for id in local.into_keys() {
            if seen.contains(&id) {
                continue;
            }
            if deletion_blocked || self.rejected.contains(kind, &id) {
                counts.unchanged += 1;
                continue;
            }
            if self.log.contains(kind, &id, SyncAction::Create) {
                counts.kept_local += 1;
                continue;
            }
            // 外键级联可能已在前面的类型中删除了它
            if remove_entity::<E>(self.conn, &self.tracker, &id, WriteOrigin::Reconciliation)?
                .is_some()
            {
                counts.deleted += 1;
            }
        }

        let entry = self.report.kinds.entry(kind).or_default();
        entry.inserted += counts.inserted;
        entry.updated += counts.updated;
        entry.deleted += counts.deleted;
        entry.unchanged += counts.unchanged;
        entry.kept_local += counts.kept_local;
        entry.suppressed += counts.suppressed;
        Ok(())
    }
}

/// 在一个事务内把快照应用到本地分区
pub fn apply_snapshot(
    conn: &mut Connection,
    notebook_id: &str,
    document: &SnapshotDocument,
) -> Result<ReconcileReport, SyncError> {
    apply_document(conn, notebook_id, document, &RejectedRecords::default())
}

/// 应用解析结果；格式错误被拒的远端记录不会导致本地副本被删除
pub fn apply_parsed(
    conn: &mut Connection,
    notebook_id: &str,
    parsed: &ParsedSnapshot,
) -> Result<ReconcileReport, SyncError> {
    let mut report = apply_document(conn, notebook_id, &parsed.document, &parsed.rejected)?;
    report.errors.extend(parsed.rejected.messages.iter().cloned());
    Ok(report)
}

fn apply_document(
    conn: &mut Connection,
    notebook_id: &str,
    document: &SnapshotDocument,
    rejected: &RejectedRecords,
) -> Result<ReconcileReport, SyncError> {
    let tx = conn.transaction()?;
    let events = MutationLog::pending_events(&tx, notebook_id)?;

    let mut reconciler = Reconciler {
        conn: &tx,
        notebook_id,
        log: MutationLogIndex::from_events(&events),
        rejected,
        tracker: MutationTracker::new(),
        report: ReconcileReport::new(notebook_id),
    };
    reconciler.report.remote_found = true;

    for kind in EntityKind::RECONCILE_ORDER {
        match kind {
            EntityKind::Notebook => reconciler.reconcile_kind::<Notebook>(document.notebooks.as_deref())?,
            EntityKind::Tag => reconciler.reconcile_kind::<Tag>(document.tags.as_deref())?,
            EntityKind::Note => reconciler.reconcile_kind::<Note>(document.notes.as_deref())?,
            EntityKind::MenuItem => reconciler.reconcile_kind::<MenuItem>(document.menu_items.as_deref())?,
            EntityKind::NoteTag => reconciler.reconcile_kind::<NoteTag>(document.note_tags.as_deref())?,
        }
    }

    let report = reconciler.report;
    tx.commit()?;
    Ok(report)
}

/// 下载并解析分区快照；远端没有文档时返回 `Ok(None)`
pub async fn fetch_snapshot(
    storage: &dyn CloudStorage,
    notebook_id: &str,
) -> Result<Option<ParsedSnapshot>, SyncError> {
    let key = remote_document_key(notebook_id)?;
    match storage.get(&key).await? {
        Some(bytes) => Ok(Some(SnapshotDocument::parse(&bytes)?)),
        None => Ok(None),
    }
}

/// 把已下载的快照合并到本地
///
/// 事务在阻塞线程池中执行，调用方的 future 被丢弃时事务仍会提交或回滚。
pub async fn apply_remote(
    db: &Arc<NotesDatabase>,
    notebook_id: &str,
    snapshot: Option<ParsedSnapshot>,
) -> Result<ReconcileReport, SyncError> {
    let Some(parsed) = snapshot else {
        tracing::info!("[sync] 远端尚无 {} 的快照，跳过合并", notebook_id);
        return Ok(ReconcileReport::new(notebook_id));
    };

    let report = tokio::task::spawn_blocking({
        let db = Arc::clone(db);
        let notebook_id = notebook_id.to_string();
        move || -> Result<ReconcileReport, SyncError> {
            let mut conn = db.get_conn()?;
            apply_parsed(&mut conn, &notebook_id, &parsed)
        }
    })
    .await
    .map_err(|e| SyncError::Database(format!("合并任务失败: {e}")))??;

    tracing::info!(
        "[sync] 合并完成 {}: 写入 {} 条，跳过 {} 条，错误 {} 条",
        notebook_id,
        report.total_writes(),
        report.total_skipped(),
        report.errors.len()
    );
    Ok(report)
}

/// 拉取远端快照并合并到本地（pull）
///
/// 远端没有文档时视为首次同步，返回空报告。
pub async fn reconcile(
    db: &Arc<NotesDatabase>,
    storage: &dyn CloudStorage,
    notebook_id: &str,
) -> Result<ReconcileReport, SyncError> {
    let snapshot = fetch_snapshot(storage, notebook_id).await?;
    apply_remote(db, notebook_id, snapshot).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MenuItemType, SyncEvent};
    use crate::store::test_connection;

    fn local_write<E: StoredEntity>(conn: &Connection, record: &E) {
        write_entity(conn, &MutationTracker::new(), record, WriteOrigin::Local).unwrap();
    }

    /// 写入并清空日志，模拟“已推送过”的记录
    fn synced_write<E: StoredEntity>(conn: &Connection, record: &E) {
        local_write(conn, record);
        MutationLog::clear(conn, record.owner_notebook_id().unwrap()).unwrap();
    }

    fn doc_with(nb: &Notebook) -> SnapshotDocument {
        SnapshotDocument {
            notebooks: Some(vec![nb.clone()]),
            ..SnapshotDocument::empty()
        }
    }

    #[test]
    fn test_newer_remote_note_overwrites_local() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let mut note = Note::new(&nb.id, "old");
        note.updated_at = 100;
        synced_write(&conn, &note);

        let mut remote_note = note.clone();
        remote_note.content = "A".into();
        remote_note.updated_at = 200;
        let doc = SnapshotDocument {
            notes: Some(vec![remote_note.clone()]),
            ..doc_with(&nb)
        };

        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert_eq!(Note::get(&conn, &note.id).unwrap(), Some(remote_note));
        assert_eq!(report.kind(EntityKind::Note).updated, 1);
        assert_eq!(MutationLog::pending_count(&conn, &nb.id).unwrap(), 0);
    }

    #[test]
    fn test_equal_timestamp_keeps_local() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let mut note = Note::new(&nb.id, "local");
        note.updated_at = 300;
        synced_write(&conn, &note);

        let mut remote_note = note.clone();
        remote_note.content = "remote".into();
        let doc = SnapshotDocument {
            notes: Some(vec![remote_note]),
            ..doc_with(&nb)
        };

        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert_eq!(Note::get(&conn, &note.id).unwrap(), Some(note));
        assert_eq!(report.total_writes(), 0);
    }

    #[test]
    fn test_locally_deleted_record_is_not_resurrected() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let note = Note::new(&nb.id, "gone");
        synced_write(&conn, &note);
        remove_entity::<Note>(&conn, &MutationTracker::new(), &note.id, WriteOrigin::Local)
            .unwrap();

        let doc = SnapshotDocument {
            notes: Some(vec![note.clone()]),
            ..doc_with(&nb)
        };
        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert!(Note::get(&conn, &note.id).unwrap().is_none());
        assert_eq!(report.kind(EntityKind::Note).suppressed, 1);
    }

    #[test]
    fn test_pending_local_note_tag_survives_remote_omission() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        let note = Note::new(&nb.id, "x");
        let tag = Tag::new(&nb.id, "A");
        synced_write(&conn, &nb);
        synced_write(&conn, &note);
        synced_write(&conn, &tag);
        let link = NoteTag::new(&nb.id, &note.id, &tag.id);
        local_write(&conn, &link);

        let doc = SnapshotDocument {
            notes: Some(vec![note]),
            tags: Some(vec![tag]),
            ..doc_with(&nb)
        };
        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert!(NoteTag::get(&conn, &link.canonical_id()).unwrap().is_some());
        assert_eq!(report.kind(EntityKind::NoteTag).kept_local, 1);
    }

    #[test]
    fn test_remote_drop_deletes_synced_local_record() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let item = MenuItem::new(&nb.id, "Saved search", MenuItemType::Search, Some("q".into()));
        synced_write(&conn, &item);

        let report = apply_snapshot(&mut conn, &nb.id, &doc_with(&nb)).unwrap();

        assert!(MenuItem::get(&conn, &item.id).unwrap().is_none());
        assert_eq!(report.kind(EntityKind::MenuItem).deleted, 1);
    }

    #[test]
    fn test_absent_array_leaves_kind_untouched() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let tag = Tag::new(&nb.id, "keep");
        synced_write(&conn, &tag);

        let doc = SnapshotDocument {
            notebooks: Some(vec![nb.clone()]),
            ..SnapshotDocument::default()
        };
        apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert!(Tag::get(&conn, &tag.id).unwrap().is_some());
    }

    #[test]
    fn test_record_without_local_notebook_is_skipped() {
        let mut conn = test_connection();
        let nb = Notebook::new("Remote only");
        let note = Note::new(&nb.id, "orphan");
        let doc = SnapshotDocument {
            notebooks: Some(Vec::new()),
            notes: Some(vec![note.clone()]),
            ..SnapshotDocument::default()
        };

        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert!(Note::get(&conn, &note.id).unwrap().is_none());
        assert_eq!(report.total_skipped(), 1);
        assert_eq!(report.skipped[0].kind, EntityKind::Note);
    }

    #[test]
    fn test_note_tag_with_missing_note_is_skipped() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let tag = Tag::new(&nb.id, "A");
        let link = NoteTag::new(&nb.id, "ghost-note", &tag.id);
        let doc = SnapshotDocument {
            tags: Some(vec![tag]),
            note_tags: Some(vec![link.clone()]),
            ..doc_with(&nb)
        };

        let report = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert!(NoteTag::get(&conn, &link.canonical_id()).unwrap().is_none());
        assert_eq!(report.kind(EntityKind::NoteTag).skipped, 1);
        assert_eq!(report.kind(EntityKind::Tag).inserted, 1);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        let note = Note::new(&nb.id, "x");
        let tag = Tag::new(&nb.id, "A");
        let link = NoteTag::new(&nb.id, &note.id, &tag.id);
        let doc = SnapshotDocument {
            notebooks: Some(vec![nb.clone()]),
            notes: Some(vec![note]),
            tags: Some(vec![tag]),
            note_tags: Some(vec![link]),
            menu_items: Some(Vec::new()),
            ..SnapshotDocument::default()
        };

        let first = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();
        let second = apply_snapshot(&mut conn, &nb.id, &doc).unwrap();

        assert_eq!(first.total_writes(), 4);
        assert_eq!(second.total_writes(), 0);
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        // 让 NoteTag 阶段的查询失败
        conn.execute_batch("DROP TABLE note_tags;").unwrap();

        let note = Note::new(&nb.id, "should roll back");
        let doc = SnapshotDocument {
            notes: Some(vec![note.clone()]),
            ..doc_with(&nb)
        };

        assert!(apply_snapshot(&mut conn, &nb.id, &doc).is_err());
        assert!(Note::get(&conn, &note.id).unwrap().is_none());
    }

    #[test]
    fn test_log_index_ignores_unknown_kinds() {
        let event = SyncEvent {
            id: "e".into(),
            notebook_id: "nb".into(),
            entity_name: "attachment".into(),
            entity_id: "x".into(),
            action: SyncAction::Delete,
            created_at: 0,
            seq: 1,
        };
        assert!(MutationLogIndex::from_events(&[event]).is_empty());
    }

    fn parsed(nb: &Notebook, notes_json: &str) -> ParsedSnapshot {
        let bytes = format!(
            r#"{{"version":1,"exportedAt":1,"notebooks":[{}],"notes":{}}}"#,
            serde_json::to_string(nb).unwrap(),
            notes_json
        );
        SnapshotDocument::parse(bytes.as_bytes()).unwrap()
    }

    #[test]
    fn test_malformed_remote_note_keeps_local_copy() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let note = Note::new(&nb.id, "keep me");
        synced_write(&conn, &note);

        let snapshot = parsed(
            &nb,
            &format!(
                r#"[{{"id":"{}","notebookId":"{}","content":null,"createdAt":1,"updatedAt":2}}]"#,
                note.id, nb.id
            ),
        );
        let report = apply_parsed(&mut conn, &nb.id, &snapshot).unwrap();

        assert_eq!(Note::get(&conn, &note.id).unwrap(), Some(note));
        assert_eq!(report.kind(EntityKind::Note).deleted, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("note[0]"));
    }

    #[test]
    fn test_unidentifiable_remote_record_blocks_local_deletion() {
        let mut conn = test_connection();
        let nb = Notebook::new("Work");
        synced_write(&conn, &nb);
        let note = Note::new(&nb.id, "keep me too");
        synced_write(&conn, &note);

        let snapshot = parsed(&nb, r#"[{"content":"no id"}]"#);
        let report = apply_parsed(&mut conn, &nb.id, &snapshot).unwrap();

        assert!(Note::get(&conn, &note.id).unwrap().is_some());
        assert_eq!(report.kind(EntityKind::Note).unchanged, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_remote_id_owned_by_other_notebook_is_not_moved() {
        let mut conn = test_connection();
        let home = Notebook::new("Home");
        let work = Notebook::new("Work");
        synced_write(&conn, &home);
        synced_write(&conn, &work);
        let note = Note::new(&home.id, "home note");
        synced_write(&conn, &note);

        let mut remote_note = note.clone();
        remote_note.notebook_id = work.id.clone();
        remote_note.content = "hijacked".into();
        remote_note.updated_at = note.updated_at + 1_000;
        let doc = SnapshotDocument {
            notes: Some(vec![remote_note]),
            ..doc_with(&work)
        };
        let report = apply_snapshot(&mut conn, &work.id, &doc).unwrap();

        assert_eq!(Note::get(&conn, &note.id).unwrap(), Some(note));
        assert_eq!(report.kind(EntityKind::Note).skipped, 1);
        assert_eq!(report.kind(EntityKind::Note).inserted, 0);
    }

    #[tokio::test]
    async fn test_apply_remote_runs_off_the_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(NotesDatabase::new(dir.path()).unwrap());
        let nb = Notebook::new("Work");
        let note = Note::new(&nb.id, "survives");
        {
            let conn = db.get_conn().unwrap();
            synced_write(&conn, &nb);
            synced_write(&conn, &note);
        }

        let snapshot = parsed(
            &nb,
            &format!(r#"[{{"id":"{}","notebookId":"{}","content":7}}]"#, note.id, nb.id),
        );
        let report = apply_remote(&db, &nb.id, Some(snapshot)).await.unwrap();

        let conn = db.get_conn().unwrap();
        assert_eq!(Note::get(&conn, &note.id).unwrap(), Some(note));
        assert_eq!(report.errors.len(), 1);
        assert!(report.remote_found);
    }
}
