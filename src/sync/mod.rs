//! 笔记本分区同步
//!
//! 离线优先：本地写入随时可用，联网后按笔记本分区与远端快照文档收敛。
//!
//! ## 模块结构
//!
//! - `document`: 远端快照文档格式与 key 布局
//! - `reconcile`: 拉取并合并远端快照（pull）
//! - `publish`: 生成并上传本地快照（push）
//! - `orchestrator`: 单飞（single-flight）同步入口
//! - `progress`: 进度上报
//!
//! ## 冲突策略
//!
//! 带 `updatedAt` 的记录按时间戳做 Last-Write-Wins，相等时保留本地；
//! 变更日志（`sync_events`）只用于区分“本地新建尚未推送”与“本地已删除”，
//! 推送成功后清空，不保留墓碑。

pub mod document;
pub mod orchestrator;
pub mod progress;
pub mod publish;
pub mod reconcile;

pub use document::{
    remote_document_key, remote_partition_dir, ParsedSnapshot, RejectedRecords, SnapshotDocument,
    SNAPSHOT_FILENAME, SNAPSHOT_FORMAT_VERSION,
};
pub use orchestrator::{SyncMode, SyncOrchestrator, SyncOutcome, SyncReport, SyncStatus};
pub use progress::{ProgressCallback, SyncPhase, SyncProgress, SyncProgressEmitter};
pub use publish::{build_snapshot, publish, PartitionSnapshot, PublishReport};
pub use reconcile::{
    apply_parsed, apply_remote, apply_snapshot, fetch_snapshot, reconcile, KindReport, MutationLogIndex,
    ReconcileReport, SkippedRecord,
};

use crate::models::{AppError, AppErrorType};
use crate::store::NotesDbError;

/// 同步错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// 是否值得原样重试（传输层错误）
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<NotesDbError> for SyncError {
    fn from(e: NotesDbError) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<AppError> for SyncError {
    fn from(e: AppError) -> Self {
        match e.error_type {
            AppErrorType::Configuration | AppErrorType::Validation => {
                SyncError::Configuration(e.message)
            }
            _ => SyncError::Network(e.message),
        }
    }
}
