//! 同步编排器
//!
//! `sync` = pull（协调）+ push（发布）。全应用同一时刻最多只有一个同步操作在执行，
//! 后来的调用立即返回 [`SyncOutcome::AlreadyRunning`]，不排队。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::progress::{ProgressCallback, SyncPhase, SyncProgress, SyncProgressEmitter};
use super::publish::{publish, PublishReport};
use super::reconcile::{apply_remote, fetch_snapshot, ReconcileReport};
use super::SyncError;
use crate::cloud_storage::CloudStorage;
use crate::models::now_millis;
use crate::store::NotesDatabase;
use crate::tracker::MutationLog;

/// 同步操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Sync,
    Pull,
    Push,
}

/// 完成一次同步操作的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub notebook_id: String,
    pub mode: SyncMode,
    pub pull: Option<ReconcileReport>,
    pub push: Option<PublishReport>,
    pub duration_ms: u64,
}

/// 同步入口的返回值
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// 已有同步在执行，本次调用未做任何事
    AlreadyRunning { active_notebook_id: Option<String> },
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyRunning { .. } => None,
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub active_notebook_id: Option<String>,
    /// 该笔记本待推送的变更数
    pub pending_changes: usize,
    /// 本进程内最近一次成功推送的时间（epoch 毫秒）
    pub last_synced_at: Option<i64>,
}

#[derive(Default)]
struct InFlight {
    running: AtomicBool,
    active_notebook_id: Mutex<Option<String>>,
}

impl InFlight {
    fn try_acquire(self: &Arc<Self>, notebook_id: &str) -> Option<InFlightGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        if let Ok(mut active) = self.active_notebook_id.lock() {
            *active = Some(notebook_id.to_string());
        }
        Some(InFlightGuard {
            state: Arc::clone(self),
        })
    }

    fn active(&self) -> Option<String> {
        self.active_notebook_id
            .lock()
            .ok()
            .and_then(|active| active.clone())
    }
}

/// 释放时复位在途标志（包括出错、panic 与 future 被丢弃）
struct InFlightGuard {
    state: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.state.active_notebook_id.lock() {
            *active = None;
        }
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// 同步编排器
pub struct SyncOrchestrator {
    db: Arc<NotesDatabase>,
    storage: Arc<dyn CloudStorage>,
    in_flight: Arc<InFlight>,
    emitter: SyncProgressEmitter,
    last_synced: Mutex<HashMap<String, i64>>,
}

impl SyncOrchestrator {
    pub fn new(db: Arc<NotesDatabase>, storage: Arc<dyn CloudStorage>) -> Self {
        Self {
            db,
            storage,
            in_flight: Arc::new(InFlight::default()),
            emitter: SyncProgressEmitter::default(),
            last_synced: Mutex::new(HashMap::new()),
        }
    }

    /// 设置进度回调
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.emitter = SyncProgressEmitter::new(Some(callback));
        self
    }

    pub fn storage(&self) -> &Arc<dyn CloudStorage> {
        &self.storage
    }

    /// 先 pull 再 push
    pub async fn sync(&self, notebook_id: &str) -> Result<SyncOutcome, SyncError> {
        self.run(notebook_id, SyncMode::Sync).await
    }

    /// 仅 pull
    pub async fn pull(&self, notebook_id: &str) -> Result<SyncOutcome, SyncError> {
        self.run(notebook_id, SyncMode::Pull).await
    }

    /// 仅 push
    pub async fn push(&self, notebook_id: &str) -> Result<SyncOutcome, SyncError> {
        self.run(notebook_id, SyncMode::Push).await
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.running.load(Ordering::SeqCst)
    }

    pub fn status(&self, notebook_id: &str) -> Result<SyncStatus, SyncError> {
        let pending_changes = {
            let conn = self.db.get_conn()?;
            MutationLog::pending_count(&conn, notebook_id)?
        };
        let last_synced_at = self
            .last_synced
            .lock()
            .ok()
            .and_then(|map| map.get(notebook_id).copied());

        Ok(SyncStatus {
            is_syncing: self.is_syncing(),
            active_notebook_id: self.in_flight.active(),
            pending_changes,
            last_synced_at,
        })
    }

    /// 检查远端存储是否可用
    pub async fn check_connection(&self) -> Result<(), SyncError> {
        self.storage.check_connection().await?;
        Ok(())
    }

    async fn run(&self, notebook_id: &str, mode: SyncMode) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = self.in_flight.try_acquire(notebook_id) else {
            let active_notebook_id = self.in_flight.active();
            tracing::info!(
                "[sync] 已有同步在执行（{}），忽略 {} 的 {:?} 请求",
                active_notebook_id.as_deref().unwrap_or("unknown"),
                notebook_id,
                mode
            );
            return Ok(SyncOutcome::AlreadyRunning { active_notebook_id });
        };

        self.emitter.reset();
        self.emitter.emit(SyncProgress::new(SyncPhase::Preparing, notebook_id));
        tracing::info!(
            "[sync] 开始 {:?} {}（存储: {}）",
            mode,
            notebook_id,
            self.storage.provider_name()
        );

        let started = Instant::now();
        match self.run_inner(notebook_id, mode).await {
            Ok((pull, push)) => {
                if push.is_some() {
                    if let Ok(mut map) = self.last_synced.lock() {
                        map.insert(notebook_id.to_string(), now_millis());
                    }
                }
                let report = SyncReport {
                    notebook_id: notebook_id.to_string(),
                    mode,
                    pull,
                    push,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                self.emitter.emit(SyncProgress::new(SyncPhase::Completed, notebook_id));
                tracing::info!(
                    "[sync] 完成 {:?} {}，耗时 {}ms",
                    mode,
                    notebook_id,
                    report.duration_ms
                );
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                tracing::warn!("[sync] {:?} {} 失败: {}", mode, notebook_id, e);
                self.emitter.emit(SyncProgress::failed(notebook_id, e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        notebook_id: &str,
        mode: SyncMode,
    ) -> Result<(Option<ReconcileReport>, Option<PublishReport>), SyncError> {
        let pull = if matches!(mode, SyncMode::Sync | SyncMode::Pull) {
            self.emitter.emit(SyncProgress::new(SyncPhase::Downloading, notebook_id));
            let snapshot = fetch_snapshot(self.storage.as_ref(), notebook_id).await?;

            // 本地事务在阻塞线程池中执行，不会被中途取消
            let message = match snapshot.as_ref() {
                Some(parsed) => format!("远端 {} 条记录", parsed.document.record_count()),
                None => "远端尚无快照".to_string(),
            };
            self.emitter.emit(
                SyncProgress::new(SyncPhase::Applying, notebook_id).with_message(message),
            );
            Some(apply_remote(&self.db, notebook_id, snapshot).await?)
        } else {
            None
        };

        let push = if matches!(mode, SyncMode::Sync | SyncMode::Push) {
            self.emitter.emit(SyncProgress::new(SyncPhase::Uploading, notebook_id));
            Some(publish(&self.db, self.storage.as_ref(), notebook_id).await?)
        } else {
            None
        };

        Ok((pull, push))
    }
}
