//! 双副本同步集成测试
//!
//! 两个独立的本地数据库共享同一个远端目录（LocalFsStorage），
//! 通过公开 API 验证收敛、不复活、不丢失等性质。

use assert_matches::assert_matches;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use notebook_sync::cloud_storage::{CloudStorage, FileInfo, LocalFsStorage};
use notebook_sync::store::StoredEntity;
use notebook_sync::sync::{remote_document_key, SnapshotDocument, SyncPhase, SyncProgress};
use notebook_sync::{
    AppError, EntityKind, MenuItem, MenuItemType, Note, NoteTag, Notebook, NotesDatabase,
    NotesRepo, SyncEntity, SyncError, SyncOrchestrator, SyncOutcome, SyncReport, Tag,
};

// ============================================================================
// 测试夹具
// ============================================================================

struct Replica {
    _dir: TempDir,
    repo: NotesRepo,
    sync: SyncOrchestrator,
}

fn replica(storage: Arc<dyn CloudStorage>) -> Replica {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = Arc::new(NotesDatabase::new(dir.path()).expect("Failed to open database"));
    Replica {
        repo: NotesRepo::new(db.clone()),
        sync: SyncOrchestrator::new(db, storage),
        _dir: dir,
    }
}

fn shared_remote() -> (TempDir, Arc<LocalFsStorage>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = Arc::new(LocalFsStorage::at(dir.path()));
    (dir, storage)
}

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::AlreadyRunning { .. } => panic!("sync unexpectedly reported AlreadyRunning"),
    }
}

fn sorted<E: StoredEntity>(repo: &NotesRepo, notebook_id: &str) -> Vec<E> {
    let mut records: Vec<E> = repo.list(notebook_id).unwrap();
    records.sort_by_key(|r| r.canonical_id());
    records
}

fn assert_same_partition(a: &NotesRepo, b: &NotesRepo, notebook_id: &str) {
    assert_eq!(sorted::<Notebook>(a, notebook_id), sorted::<Notebook>(b, notebook_id));
    assert_eq!(sorted::<Note>(a, notebook_id), sorted::<Note>(b, notebook_id));
    assert_eq!(sorted::<Tag>(a, notebook_id), sorted::<Tag>(b, notebook_id));
    assert_eq!(sorted::<NoteTag>(a, notebook_id), sorted::<NoteTag>(b, notebook_id));
    assert_eq!(sorted::<MenuItem>(a, notebook_id), sorted::<MenuItem>(b, notebook_id));
}

async fn put_document(storage: &dyn CloudStorage, notebook_id: &str, doc: &SnapshotDocument) {
    let key = remote_document_key(notebook_id).unwrap();
    storage.put(&key, &doc.to_bytes().unwrap()).await.unwrap();
}

/// 可切换为离线的存储
struct FlakyStorage {
    inner: LocalFsStorage,
    offline: AtomicBool,
}

#[async_trait]
impl CloudStorage for FlakyStorage {
    fn provider_name(&self) -> &'static str {
        "Flaky"
    }

    async fn check_connection(&self) -> notebook_sync::cloud_storage::Result<()> {
        self.inner.check_connection().await
    }

    async fn put(&self, key: &str, data: &[u8]) -> notebook_sync::cloud_storage::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::network("connection refused"));
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> notebook_sync::cloud_storage::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> notebook_sync::cloud_storage::Result<Vec<FileInfo>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> notebook_sync::cloud_storage::Result<()> {
        self.inner.delete(key).await
    }

    async fn stat(&self, key: &str) -> notebook_sync::cloud_storage::Result<Option<FileInfo>> {
        self.inner.stat(key).await
    }
}

/// 下载前先等待一段时间，用来制造并发窗口
struct SlowStorage {
    inner: LocalFsStorage,
    delay: Duration,
}

#[async_trait]
impl CloudStorage for SlowStorage {
    fn provider_name(&self) -> &'static str {
        "Slow"
    }

    async fn check_connection(&self) -> notebook_sync::cloud_storage::Result<()> {
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> notebook_sync::cloud_storage::Result<()> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> notebook_sync::cloud_storage::Result<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> notebook_sync::cloud_storage::Result<Vec<FileInfo>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> notebook_sync::cloud_storage::Result<()> {
        self.inner.delete(key).await
    }

    async fn stat(&self, key: &str) -> notebook_sync::cloud_storage::Result<Option<FileInfo>> {
        self.inner.stat(key).await
    }
}

// ============================================================================
// 收敛
// ============================================================================

#[tokio::test]
async fn test_two_replicas_converge() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("工作").unwrap();
    let note = a.repo.create_note(&nb.id, "周会纪要").unwrap();
    let tag = a.repo.create_tag(&nb.id, "meeting").unwrap();
    a.repo.tag_note(&note.id, &tag.id).unwrap();
    let folder = a
        .repo
        .create_menu_item(&nb.id, None, "收藏", MenuItemType::Search, Some("tag:meeting".into()), 1.0)
        .unwrap();
    a.repo
        .create_menu_item(&nb.id, Some(&folder.id), "周会", MenuItemType::Note, Some(note.id.clone()), 0.5)
        .unwrap();

    completed(a.sync.sync(&nb.id).await.unwrap());
    let pulled = completed(b.sync.sync(&nb.id).await.unwrap());
    let pull = pulled.pull.unwrap();
    assert!(pull.remote_found);
    assert_eq!(pull.kind(EntityKind::Note).inserted, 1);
    assert_eq!(pull.kind(EntityKind::NoteTag).inserted, 1);
    assert_eq!(pull.kind(EntityKind::MenuItem).inserted, 2);
    assert_same_partition(&a.repo, &b.repo, &nb.id);

    // B 编辑后双方再次同步
    b.repo.update_note(&note.id, "周会纪要（已补充）").unwrap();
    completed(b.sync.sync(&nb.id).await.unwrap());
    completed(a.sync.sync(&nb.id).await.unwrap());

    let on_a: Note = a.repo.get(&note.id).unwrap().unwrap();
    assert_eq!(on_a.content, "周会纪要（已补充）");
    assert_same_partition(&a.repo, &b.repo, &nb.id);
}

#[tokio::test]
async fn test_second_pull_writes_nothing() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("读书").unwrap();
    a.repo.create_note(&nb.id, "第一章").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());

    let first = completed(b.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert!(first.total_writes() > 0);
    let second = completed(b.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert_eq!(second.total_writes(), 0);
}

// ============================================================================
// 删除与保留
// ============================================================================

#[tokio::test]
async fn test_deleted_note_is_not_resurrected() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("草稿").unwrap();
    let note = a.repo.create_note(&nb.id, "待删除").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());
    completed(b.sync.sync(&nb.id).await.unwrap());

    assert!(b.repo.delete_note(&note.id).unwrap());
    let report = completed(b.sync.sync(&nb.id).await.unwrap());
    assert_eq!(report.pull.unwrap().kind(EntityKind::Note).suppressed, 1);
    assert!(b.repo.get::<Note>(&note.id).unwrap().is_none());

    // A 拉取后删除传播过来
    let report = completed(a.sync.sync(&nb.id).await.unwrap());
    assert_eq!(report.pull.unwrap().kind(EntityKind::Note).deleted, 1);
    assert!(a.repo.get::<Note>(&note.id).unwrap().is_none());
}

#[tokio::test]
async fn test_unpushed_local_note_survives_pull() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("旅行").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());
    completed(b.sync.pull(&nb.id).await.unwrap());

    let draft = b.repo.create_note(&nb.id, "行程草稿").unwrap();
    let report = completed(b.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert_eq!(report.kind(EntityKind::Note).kept_local, 1);
    assert!(b.repo.get::<Note>(&draft.id).unwrap().is_some());

    completed(b.sync.push(&nb.id).await.unwrap());
    completed(a.sync.pull(&nb.id).await.unwrap());
    assert!(a.repo.get::<Note>(&draft.id).unwrap().is_some());
}

#[tokio::test]
async fn test_unpushed_note_tag_survives_remote_omission() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());

    let nb = a.repo.create_notebook("项目").unwrap();
    let note = a.repo.create_note(&nb.id, "需求").unwrap();
    let tag = a.repo.create_tag(&nb.id, "todo").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());

    // 远端快照里没有这条关联
    let link = a.repo.tag_note(&note.id, &tag.id).unwrap();
    completed(a.sync.pull(&nb.id).await.unwrap());

    let links: Vec<NoteTag> = a.repo.list(&nb.id).unwrap();
    assert_eq!(links, vec![link]);
}

#[tokio::test]
async fn test_deleted_notebook_propagates_as_empty_partition() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("旧项目").unwrap();
    a.repo.create_note(&nb.id, "归档").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());
    completed(b.sync.pull(&nb.id).await.unwrap());

    assert!(a.repo.delete_notebook(&nb.id).unwrap());
    let report = completed(a.sync.sync(&nb.id).await.unwrap());
    assert_eq!(report.pull.unwrap().kind(EntityKind::Notebook).suppressed, 1);
    assert_eq!(report.push.as_ref().map(|p| p.notebooks), Some(0));

    completed(b.sync.pull(&nb.id).await.unwrap());
    assert!(b.repo.list_notebooks().unwrap().is_empty());
    assert!(b.repo.list::<Note>(&nb.id).unwrap().is_empty());
}

// ============================================================================
// 时间戳规则
// ============================================================================

#[tokio::test]
async fn test_newer_remote_note_wins() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());

    let nb = a.repo.create_notebook("日记").unwrap();
    let mut note = Note::new(&nb.id, "本地版本");
    note.created_at = 50;
    note.updated_at = 100;
    a.repo.save(&note).unwrap();

    let mut remote_note = note.clone();
    remote_note.content = "A".into();
    remote_note.updated_at = 200;
    let doc = SnapshotDocument {
        notes: Some(vec![remote_note]),
        ..SnapshotDocument::default()
    };
    put_document(remote.as_ref(), &nb.id, &doc).await;

    completed(a.sync.pull(&nb.id).await.unwrap());
    let local: Note = a.repo.get(&note.id).unwrap().unwrap();
    assert_eq!(local.content, "A");
    assert_eq!(local.updated_at, 200);
}

#[tokio::test]
async fn test_equal_timestamp_keeps_local_note() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());

    let nb = a.repo.create_notebook("日记").unwrap();
    let note = a.repo.create_note(&nb.id, "本地版本").unwrap();

    let mut remote_note = note.clone();
    remote_note.content = "远端版本".into();
    let doc = SnapshotDocument {
        notes: Some(vec![remote_note]),
        ..SnapshotDocument::default()
    };
    put_document(remote.as_ref(), &nb.id, &doc).await;

    let report = completed(a.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert_eq!(report.kind(EntityKind::Note).unchanged, 1);
    let local: Note = a.repo.get(&note.id).unwrap().unwrap();
    assert_eq!(local.content, "本地版本");
}

// ============================================================================
// 变更日志
// ============================================================================

#[tokio::test]
async fn test_push_drains_the_log() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());

    let nb = a.repo.create_notebook("收件箱").unwrap();
    a.repo.create_note(&nb.id, "一").unwrap();
    a.repo.create_note(&nb.id, "二").unwrap();
    assert_eq!(a.sync.status(&nb.id).unwrap().pending_changes, 3);

    let report = completed(a.sync.push(&nb.id).await.unwrap());
    assert_eq!(report.push.unwrap().cleared_events, 3);

    let status = a.sync.status(&nb.id).unwrap();
    assert_eq!(status.pending_changes, 0);
    assert!(status.last_synced_at.is_some());
    assert!(!status.is_syncing);
}

#[tokio::test]
async fn test_failed_push_keeps_the_log() {
    let remote_dir = TempDir::new().unwrap();
    let storage = Arc::new(FlakyStorage {
        inner: LocalFsStorage::at(remote_dir.path()),
        offline: AtomicBool::new(true),
    });
    let a = replica(storage.clone());

    let nb = a.repo.create_notebook("离线").unwrap();
    a.repo.create_note(&nb.id, "飞机上写的").unwrap();

    let err = a.sync.sync(&nb.id).await.unwrap_err();
    assert_matches!(err, SyncError::Network(_));
    assert!(err.is_retryable());
    assert_eq!(a.sync.status(&nb.id).unwrap().pending_changes, 2);
    assert!(!a.sync.is_syncing());

    storage.offline.store(false, Ordering::SeqCst);
    completed(a.sync.sync(&nb.id).await.unwrap());
    assert_eq!(a.sync.status(&nb.id).unwrap().pending_changes, 0);
}

#[tokio::test]
async fn test_absent_remote_document_is_noop() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());

    let nb = a.repo.create_notebook("新建").unwrap();
    a.repo.create_note(&nb.id, "还没同步过").unwrap();

    let report = completed(a.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert!(!report.remote_found);
    assert_eq!(report.total_writes(), 0);
    assert_eq!(a.repo.list::<Note>(&nb.id).unwrap().len(), 1);
    assert_eq!(a.sync.status(&nb.id).unwrap().pending_changes, 2);
}

#[tokio::test]
async fn test_malformed_remote_note_does_not_delete_local_copy() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote.clone());
    let b = replica(remote.clone());

    let nb = a.repo.create_notebook("日记").unwrap();
    let note = a.repo.create_note(&nb.id, "今天").unwrap();
    completed(a.sync.sync(&nb.id).await.unwrap());
    completed(b.sync.pull(&nb.id).await.unwrap());

    // 远端文档中的笔记内容被写坏
    let key = remote_document_key(&nb.id).unwrap();
    let raw = remote.get(&key).await.unwrap().unwrap();
    let mut value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    value["notes"][0]["content"] = serde_json::Value::Null;
    remote.put(&key, &serde_json::to_vec(&value).unwrap()).await.unwrap();

    let report = completed(b.sync.pull(&nb.id).await.unwrap()).pull.unwrap();
    assert_eq!(report.kind(EntityKind::Note).deleted, 0);
    assert_eq!(report.errors.len(), 1);
    let kept: Note = b.repo.get(&note.id).unwrap().unwrap();
    assert_eq!(kept.content, "今天");
}

#[tokio::test]
async fn test_unknown_notebook_push_is_rejected() {
    let (_remote_dir, remote) = shared_remote();
    let a = replica(remote);

    assert_matches!(
        a.sync.push("does-not-exist").await,
        Err(SyncError::InvalidNotebook(_))
    );
    assert_matches!(a.sync.pull("../escape").await, Err(SyncError::InvalidNotebook(_)));
}

// ============================================================================
// 单飞与进度
// ============================================================================

#[tokio::test]
async fn test_concurrent_sync_is_rejected() {
    let remote_dir = TempDir::new().unwrap();
    let storage = Arc::new(SlowStorage {
        inner: LocalFsStorage::at(remote_dir.path()),
        delay: Duration::from_millis(200),
    });
    let a = replica(storage);
    let nb = a.repo.create_notebook("并发").unwrap();

    let (first, second) = tokio::join!(a.sync.sync(&nb.id), a.sync.sync(&nb.id));

    assert_matches!(first.unwrap(), SyncOutcome::Completed(_));
    assert_matches!(
        second.unwrap(),
        SyncOutcome::AlreadyRunning { active_notebook_id: Some(id) } if id == nb.id
    );
    assert!(!a.sync.is_syncing());

    // 上一次结束后可以再次同步
    assert_matches!(a.sync.sync(&nb.id).await.unwrap(), SyncOutcome::Completed(_));
}

#[tokio::test]
async fn test_progress_phases_in_order() {
    let (_remote_dir, remote) = shared_remote();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(NotesDatabase::new(dir.path()).unwrap());
    let repo = NotesRepo::new(db.clone());

    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    let sync = SyncOrchestrator::new(db, remote).with_progress(Arc::new(move |p: &SyncProgress| {
        sink.lock().unwrap().push(p.phase);
    }));

    let nb = repo.create_notebook("进度").unwrap();
    completed(sync.sync(&nb.id).await.unwrap());

    assert_eq!(
        *phases.lock().unwrap(),
        vec![
            SyncPhase::Preparing,
            SyncPhase::Downloading,
            SyncPhase::Applying,
            SyncPhase::Uploading,
            SyncPhase::Completed,
        ]
    );
}
