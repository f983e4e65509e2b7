//! 快照发布（push）
//!
//! 读取整个分区生成快照文档并整体写入远端。上传成功后清理该分区的变更日志，
//! 清理范围限定在读取快照时看到的最大序号以内：读取之后才发生的编辑留到下一轮。

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::document::{remote_document_key, remote_partition_dir, SnapshotDocument};
use super::SyncError;
use crate::cloud_storage::CloudStorage;
use crate::models::{now_millis, MenuItem, Note, NoteTag, Notebook, Tag};
use crate::store::{NotesDatabase, StoredEntity};
use crate::tracker::MutationLog;

/// 一次 push 的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub notebook_id: String,
    pub remote_key: String,
    pub bytes: usize,
    pub notebooks: usize,
    pub notes: usize,
    pub tags: usize,
    pub note_tags: usize,
    pub menu_items: usize,
    /// 清理的变更日志条数
    pub cleared_events: usize,
}

/// 分区快照与读取时的日志边界
#[derive(Debug)]
pub struct PartitionSnapshot {
    pub document: SnapshotDocument,
    pub log_boundary: Option<i64>,
}

/// 在一个读事务内收集分区全部记录
///
/// 本地不存在该笔记本且没有待推送的变更时返回 `InvalidNotebook`；
/// 笔记本已在本地删除（日志中仍有事件）时生成空分区文档，以便把删除传播到远端。
pub fn build_snapshot(conn: &mut Connection, notebook_id: &str) -> Result<PartitionSnapshot, SyncError> {
    let tx = conn.transaction()?;

    let notebooks = Notebook::list_in_notebook(&tx, notebook_id)?;
    let log_boundary = MutationLog::max_seq(&tx, notebook_id)?;
    if notebooks.is_empty() && log_boundary.is_none() {
        return Err(SyncError::InvalidNotebook(format!(
            "笔记本 {} 在本地不存在",
            notebook_id
        )));
    }

    let document = SnapshotDocument {
        exported_at: now_millis(),
        notebooks: Some(notebooks),
        notes: Some(Note::list_in_notebook(&tx, notebook_id)?),
        tags: Some(Tag::list_in_notebook(&tx, notebook_id)?),
        note_tags: Some(NoteTag::list_in_notebook(&tx, notebook_id)?),
        menu_items: Some(MenuItem::list_in_notebook(&tx, notebook_id)?),
        ..SnapshotDocument::default()
    };
    tx.commit()?;

    Ok(PartitionSnapshot {
        document,
        log_boundary,
    })
}

/// 上传分区快照（push）
///
/// 上传失败时返回错误且不触碰变更日志，重试可以重建同样的意图。
pub async fn publish(
    db: &Arc<NotesDatabase>,
    storage: &dyn CloudStorage,
    notebook_id: &str,
) -> Result<PublishReport, SyncError> {
    let key = remote_document_key(notebook_id)?;
    let dir = remote_partition_dir(notebook_id)?;

    let snapshot = tokio::task::spawn_blocking({
        let db = Arc::clone(db);
        let notebook_id = notebook_id.to_string();
        move || -> Result<PartitionSnapshot, SyncError> {
            let mut conn = db.get_conn()?;
            build_snapshot(&mut conn, &notebook_id)
        }
    })
    .await
    .map_err(|e| SyncError::Database(format!("读取快照任务失败: {e}")))??;
    let bytes = snapshot.document.to_bytes()?;

    storage.mkdir(&dir).await?;
    storage.put(&key, &bytes).await?;

    let cleared_events = match snapshot.log_boundary {
        Some(seq) => tokio::task::spawn_blocking({
            let db = Arc::clone(db);
            let notebook_id = notebook_id.to_string();
            move || -> Result<usize, SyncError> {
                let conn = db.get_conn()?;
                Ok(MutationLog::clear_through(&conn, &notebook_id, seq)?)
            }
        })
        .await
        .map_err(|e| SyncError::Database(format!("清理变更日志任务失败: {e}")))??,
        None => 0,
    };

    let doc = &snapshot.document;
    let report = PublishReport {
        notebook_id: notebook_id.to_string(),
        remote_key: key,
        bytes: bytes.len(),
        notebooks: doc.notebooks.as_ref().map_or(0, Vec::len),
        notes: doc.notes.as_ref().map_or(0, Vec::len),
        tags: doc.tags.as_ref().map_or(0, Vec::len),
        note_tags: doc.note_tags.as_ref().map_or(0, Vec::len),
        menu_items: doc.menu_items.as_ref().map_or(0, Vec::len),
        cleared_events,
    };

    tracing::info!(
        "[sync] 已上传 {} ({} 条记录, {} bytes)，清理日志 {} 条",
        report.remote_key,
        doc.record_count(),
        report.bytes,
        report.cleared_events
    );
    Ok(report)
}
