//! 远端快照文档
//!
//! 每个笔记本分区对应一个 JSON 文档 `nb_<notebookId>/data.json`：
//!
//! ```json
//! { "version": 1, "exportedAt": 1700000000000,
//!   "notebooks": [...], "notes": [...], "tags": [...], "noteTags": [...], "menuItems": [...] }
//! ```
//!
//! 数组缺失表示“未提供该类型”，与空数组（该类型为空）不同。
//! 解析时逐条反序列化，单条记录格式错误只会被拒绝并记录，不影响其余记录。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::SyncError;
use crate::identity::{note_tag_id, EntityKind};
use crate::models::{now_millis, MenuItem, Note, NoteTag, Notebook, Tag};

/// 当前文档格式版本
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// 分区目录内的文档文件名
pub const SNAPSHOT_FILENAME: &str = "data.json";

/// 分区目录：`nb_<notebookId>`
pub fn remote_partition_dir(notebook_id: &str) -> Result<String, SyncError> {
    let id = notebook_id.trim();
    if id.is_empty() {
        return Err(SyncError::InvalidNotebook("笔记本 ID 不能为空".into()));
    }
    if id.contains(['/', '\\']) || id.contains("..") {
        return Err(SyncError::InvalidNotebook(format!(
            "笔记本 ID 含有非法字符: {}",
            notebook_id
        )));
    }
    Ok(format!("nb_{}", id))
}

/// 分区文档的远端 key：`nb_<notebookId>/data.json`
pub fn remote_document_key(notebook_id: &str) -> Result<String, SyncError> {
    Ok(format!(
        "{}/{}",
        remote_partition_dir(notebook_id)?,
        SNAPSHOT_FILENAME
    ))
}

/// 分区快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub exported_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebooks: Option<Vec<Notebook>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<Note>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_tags: Option<Vec<NoteTag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_items: Option<Vec<MenuItem>>,
}

impl Default for SnapshotDocument {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            exported_at: now_millis(),
            notebooks: None,
            notes: None,
            tags: None,
            note_tags: None,
            menu_items: None,
        }
    }
}

/// 逐条解析用的原始结构
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshotDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    exported_at: i64,
    notebooks: Option<Vec<serde_json::Value>>,
    notes: Option<Vec<serde_json::Value>>,
    tags: Option<Vec<serde_json::Value>>,
    note_tags: Option<Vec<serde_json::Value>>,
    menu_items: Option<Vec<serde_json::Value>>,
}

/// 解析时被拒绝的远端记录
///
/// 能从原始 JSON 中取出标识的记录按类型登记标识；取不出标识的只记录类型。
/// 协调时这些标识视为“远端仍存在”，本地副本不会因此被删除。
#[derive(Debug, Clone, Default)]
pub struct RejectedRecords {
    /// 人类可读的拒绝原因
    pub messages: Vec<String>,
    ids: HashMap<EntityKind, HashSet<String>>,
    unidentified: HashSet<EntityKind>,
}

impl RejectedRecords {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// 该标识的远端记录是否因格式错误被拒绝
    pub fn contains(&self, kind: EntityKind, entity_id: &str) -> bool {
        self.ids
            .get(&kind)
            .map_or(false, |ids| ids.contains(entity_id))
    }

    /// 该类型是否有取不出标识的被拒记录
    pub fn has_unidentified(&self, kind: EntityKind) -> bool {
        self.unidentified.contains(&kind)
    }

    fn reject(&mut self, kind: EntityKind, index: usize, value: &serde_json::Value, error: serde_json::Error) {
        self.messages
            .push(format!("{}[{}] 格式错误: {}", kind, index, error));
        match raw_identity(kind, value) {
            Some(id) => {
                self.ids.entry(kind).or_default().insert(id);
            }
            None => {
                self.unidentified.insert(kind);
            }
        }
    }
}

fn str_field<'a>(value: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    value
        .get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// 从未能反序列化的原始记录中尽量取出规范化标识
fn raw_identity(kind: EntityKind, value: &serde_json::Value) -> Option<String> {
    match kind {
        EntityKind::NoteTag => Some(note_tag_id(
            str_field(value, "noteId")?,
            str_field(value, "tagId")?,
        )),
        _ => str_field(value, "id").map(str::to_string),
    }
}

/// 解析结果：文档本身与被拒绝的记录
#[derive(Debug, Clone)]
pub struct ParsedSnapshot {
    pub document: SnapshotDocument,
    pub rejected: RejectedRecords,
}

fn parse_records<T: DeserializeOwned>(
    kind: EntityKind,
    raw: Option<Vec<serde_json::Value>>,
    rejected: &mut RejectedRecords,
) -> Option<Vec<T>> {
    let raw = raw?;
    let mut records = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(record) => records.push(record),
            Err(e) => rejected.reject(kind, index, &value, e),
        }
    }
    Some(records)
}

impl SnapshotDocument {
    /// 完整的空分区文档（所有数组都存在且为空）
    pub fn empty() -> Self {
        Self {
            notebooks: Some(Vec::new()),
            notes: Some(Vec::new()),
            tags: Some(Vec::new()),
            note_tags: Some(Vec::new()),
            menu_items: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// 解析远端文档
    ///
    /// 文档整体不是 JSON 对象、或版本高于当前支持的版本时返回 `InvalidSnapshot`。
    pub fn parse(bytes: &[u8]) -> Result<ParsedSnapshot, SyncError> {
        let raw: RawSnapshotDocument = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::InvalidSnapshot(format!("快照文档解析失败: {}", e)))?;

        if raw.version > SNAPSHOT_FORMAT_VERSION {
            return Err(SyncError::InvalidSnapshot(format!(
                "不支持的快照版本 {}（当前支持 {}）",
                raw.version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let mut rejected = RejectedRecords::default();
        let document = SnapshotDocument {
            version: raw.version,
            exported_at: raw.exported_at,
            notebooks: parse_records(EntityKind::Notebook, raw.notebooks, &mut rejected),
            notes: parse_records(EntityKind::Note, raw.notes, &mut rejected),
            tags: parse_records(EntityKind::Tag, raw.tags, &mut rejected),
            note_tags: parse_records(EntityKind::NoteTag, raw.note_tags, &mut rejected),
            menu_items: parse_records(EntityKind::MenuItem, raw.menu_items, &mut rejected),
        };
        Ok(ParsedSnapshot { document, rejected })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| SyncError::Serialization(format!("快照序列化失败: {}", e)))
    }

    /// 各类型记录数（缺失的数组计为 0）
    pub fn record_count(&self) -> usize {
        self.notebooks.as_ref().map_or(0, Vec::len)
            + self.notes.as_ref().map_or(0, Vec::len)
            + self.tags.as_ref().map_or(0, Vec::len)
            + self.note_tags.as_ref().map_or(0, Vec::len)
            + self.menu_items.as_ref().map_or(0, Vec::len)
    }
}
