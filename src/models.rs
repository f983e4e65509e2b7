//! 数据模型
//!
//! 包含可同步的记录类型（笔记本、笔记、标签、笔记-标签关联、菜单项）、
//! 本地变更日志条目 `SyncEvent`，以及应用级错误类型 `AppError`。
//!
//! 所有时间戳均为 epoch 毫秒，JSON 字段使用 camelCase，与远端快照文档格式一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 当前时间（epoch 毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 新建记录 ID
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// 可同步记录
// ============================================================================

/// 笔记本：分区根节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Notebook {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 笔记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    /// 远端文档中缺失时为空串，由协调引擎的引用检查拦截
    #[serde(default)]
    pub notebook_id: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    pub fn new(notebook_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            notebook_id: notebook_id.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 标签（无 updatedAt，只关心存在与否）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub notebook_id: String,
    pub name: String,
    pub created_at: i64,
}

impl Tag {
    pub fn new(notebook_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            notebook_id: notebook_id.into(),
            name: name.into(),
            created_at: now_millis(),
        }
    }
}

/// 笔记-标签关联（复合主键 noteId + tagId）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTag {
    pub note_id: String,
    pub tag_id: String,
    #[serde(default)]
    pub notebook_id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl NoteTag {
    pub fn new(
        notebook_id: impl Into<String>,
        note_id: impl Into<String>,
        tag_id: impl Into<String>,
    ) -> Self {
        Self {
            note_id: note_id.into(),
            tag_id: tag_id.into(),
            notebook_id: notebook_id.into(),
            created_at: now_millis(),
        }
    }
}

/// 菜单项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuItemType {
    Note,
    Search,
}

impl MenuItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuItemType::Note => "note",
            MenuItemType::Search => "search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "note" => Some(MenuItemType::Note),
            "search" => Some(MenuItemType::Search),
            _ => None,
        }
    }
}

/// 菜单项（自引用树）
///
/// `order` 由外部拖拽排序逻辑计算，这里只负责存取。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    #[serde(default)]
    pub notebook_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: MenuItemType,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub order: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MenuItem {
    pub fn new(
        notebook_id: impl Into<String>,
        name: impl Into<String>,
        item_type: MenuItemType,
        target: Option<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            notebook_id: notebook_id.into(),
            parent_id: None,
            name: name.into(),
            item_type,
            target,
            order: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// 变更日志
// ============================================================================

/// 变更动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }
}

/// 本地变更日志条目（sync_events 表）
///
/// 生命周期很短：每次成功推送后，该分区的条目会被整体清空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: String,
    pub notebook_id: String,
    pub entity_name: String,
    pub entity_id: String,
    pub action: SyncAction,
    pub created_at: i64,
    /// 本地插入序号（rowid），用于推送后有界清理
    #[serde(skip)]
    pub seq: i64,
}

// ============================================================================
// 应用级错误
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppErrorType {
    Validation,
    FileSystem,
    Configuration,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error_type: AppErrorType,
    pub message: String,
}

impl AppError {
    pub fn new(error_type: AppErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Validation, message)
    }

    pub fn file_system(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::FileSystem, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Configuration, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Network, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Unknown, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::validation(format!("JSON序列化错误: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::file_system(format!("文件系统错误: {}", err))
    }
}
