//! 实体标识解析
//!
//! 为每种可同步记录计算规范化字符串标识（canonical id），并解析其所属分区（笔记本）。
//! 单主键与复合主键（NoteTag）对外表现一致，协调引擎的主循环因此可以对所有类型统一处理。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{MenuItem, Note, NoteTag, Notebook, Tag};

/// 复合主键分隔符（UUID 中不会出现）
pub const NOTE_TAG_SEPARATOR: char = ':';

/// 可同步的记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Notebook,
    Note,
    Tag,
    NoteTag,
    MenuItem,
}

impl EntityKind {
    /// 协调顺序：NoteTag 依赖 Note 与 Tag，必须最后处理
    pub const RECONCILE_ORDER: [EntityKind; 5] = [
        EntityKind::Notebook,
        EntityKind::Tag,
        EntityKind::Note,
        EntityKind::MenuItem,
        EntityKind::NoteTag,
    ];

    /// 写入 SyncEvent.entityName 的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Notebook => "notebook",
            EntityKind::Note => "note",
            EntityKind::Tag => "tag",
            EntityKind::NoteTag => "noteTag",
            EntityKind::MenuItem => "menuItem",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "notebook" => Some(EntityKind::Notebook),
            "note" => Some(EntityKind::Note),
            "tag" => Some(EntityKind::Tag),
            "noteTag" => Some(EntityKind::NoteTag),
            "menuItem" => Some(EntityKind::MenuItem),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可同步记录的公共契约
pub trait SyncEntity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    /// 规范化标识
    fn canonical_id(&self) -> String;

    /// 所属笔记本；无法解析（notebookId 缺失）时返回 None
    fn owner_notebook_id(&self) -> Option<&str>;

    fn updated_at(&self) -> Option<i64> {
        None
    }

    /// 写入前必须在本地存在的其他记录（笔记本之外）
    fn dependencies(&self) -> Vec<(EntityKind, String)> {
        Vec::new()
    }
}

/// 规范化标识（自由函数形式）
pub fn canonical_id<E: SyncEntity>(record: &E) -> String {
    record.canonical_id()
}

/// 所属分区（自由函数形式）
pub fn owner_notebook_id<E: SyncEntity>(record: &E) -> Option<&str> {
    record.owner_notebook_id()
}

/// 拼接 NoteTag 复合标识
pub fn note_tag_id(note_id: &str, tag_id: &str) -> String {
    format!("{}{}{}", note_id, NOTE_TAG_SEPARATOR, tag_id)
}

/// 拆分 NoteTag 复合标识为 (noteId, tagId)
pub fn split_note_tag_id(id: &str) -> Option<(&str, &str)> {
    let (note_id, tag_id) = id.split_once(NOTE_TAG_SEPARATOR)?;
    if note_id.is_empty() || tag_id.is_empty() {
        return None;
    }
    Some((note_id, tag_id))
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl SyncEntity for Notebook {
    const KIND: EntityKind = EntityKind::Notebook;

    fn canonical_id(&self) -> String {
        self.id.clone()
    }

    fn owner_notebook_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    fn updated_at(&self) -> Option<i64> {
        Some(self.updated_at)
    }
}

impl SyncEntity for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn canonical_id(&self) -> String {
        self.id.clone()
    }

    fn owner_notebook_id(&self) -> Option<&str> {
        non_empty(&self.notebook_id)
    }

    fn updated_at(&self) -> Option<i64> {
        Some(self.updated_at)
    }
}

impl SyncEntity for Tag {
    const KIND: EntityKind = EntityKind::Tag;

    fn canonical_id(&self) -> String {
        self.id.clone()
    }

    fn owner_notebook_id(&self) -> Option<&str> {
        non_empty(&self.notebook_id)
    }
}

impl SyncEntity for NoteTag {
    const KIND: EntityKind = EntityKind::NoteTag;

    fn canonical_id(&self) -> String {
        note_tag_id(&self.note_id, &self.tag_id)
    }

    fn owner_notebook_id(&self) -> Option<&str> {
        non_empty(&self.notebook_id)
    }

    fn dependencies(&self) -> Vec<(EntityKind, String)> {
        vec![
            (EntityKind::Note, self.note_id.clone()),
            (EntityKind::Tag, self.tag_id.clone()),
        ]
    }
}

impl SyncEntity for MenuItem {
    const KIND: EntityKind = EntityKind::MenuItem;

    fn canonical_id(&self) -> String {
        self.id.clone()
    }

    fn owner_notebook_id(&self) -> Option<&str> {
        non_empty(&self.notebook_id)
    }

    fn updated_at(&self) -> Option<i64> {
        Some(self.updated_at)
    }
}
