//! 同步进度
//!
//! 同步过程按阶段上报进度，调用方通过回调接收（例如转发给界面）。

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// 准备中
    Preparing,
    /// 下载远端快照
    Downloading,
    /// 应用变更（本地协调事务）
    Applying,
    /// 上传快照
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl SyncPhase {
    /// 获取阶段的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            SyncPhase::Preparing => "准备中",
            SyncPhase::Downloading => "下载中",
            SyncPhase::Applying => "应用变更",
            SyncPhase::Uploading => "上传中",
            SyncPhase::Completed => "已完成",
            SyncPhase::Failed => "失败",
        }
    }

    /// 判断是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Failed)
    }

    /// 阶段对应的大致进度百分比
    pub fn percent(&self) -> f32 {
        match self {
            SyncPhase::Preparing => 0.0,
            SyncPhase::Downloading => 10.0,
            SyncPhase::Applying => 40.0,
            SyncPhase::Uploading => 70.0,
            SyncPhase::Completed => 100.0,
            SyncPhase::Failed => 100.0,
        }
    }
}

/// 同步进度
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub notebook_id: String,
    pub percent: f32,
    pub message: Option<String>,
}

impl SyncProgress {
    pub fn new(phase: SyncPhase, notebook_id: impl Into<String>) -> Self {
        Self {
            phase,
            notebook_id: notebook_id.into(),
            percent: phase.percent(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failed(notebook_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(SyncPhase::Failed, notebook_id).with_message(error)
    }
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// 进度发射器
///
/// 同一阶段的非终止进度只发送一次，阶段变化或终止状态总是发送。
#[derive(Default)]
pub struct SyncProgressEmitter {
    callback: Option<ProgressCallback>,
    last_phase: Mutex<Option<SyncPhase>>,
}

impl SyncProgressEmitter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last_phase: Mutex::new(None),
        }
    }

    pub fn emit(&self, progress: SyncProgress) {
        tracing::debug!(
            "[sync] {} {} {}",
            progress.notebook_id,
            progress.phase.display_name(),
            progress.message.as_deref().unwrap_or("")
        );

        let Some(callback) = self.callback.as_ref() else {
            return;
        };

        let should_emit = match self.last_phase.lock() {
            Ok(mut last) => {
                let changed = *last != Some(progress.phase);
                *last = Some(progress.phase);
                changed || progress.phase.is_terminal()
            }
            Err(_) => true,
        };
        if should_emit {
            callback(&progress);
        }
    }

    /// 新一轮同步开始前重置阶段记录
    pub fn reset(&self) {
        if let Ok(mut last) = self.last_phase.lock() {
            *last = None;
        }
    }
}
