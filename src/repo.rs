//! 笔记数据仓库
//!
//! 面向编辑器的写入 API。所有写入都以 [`WriteOrigin::Local`] 经过
//! `store::write_entity` / `store::remove_entity`，从而被变更跟踪器记录。
//!
//! 多记录操作（删除笔记本、删除笔记连带其标签关联等）在一个事务内完成，
//! 并对每一条被删除的子记录单独记录 delete 事件，而不是依赖外键级联
//! （级联删除不会经过跟踪器）。

use rusqlite::Connection;
use std::sync::Arc;

use crate::identity::{note_tag_id, SyncEntity};
use crate::models::{now_millis, MenuItem, MenuItemType, Note, NoteTag, Notebook, Tag};
use crate::store::{
    remove_entity, write_entity, NotesDatabase, NotesDbError, NotesDbResult, StoredEntity,
};
use crate::tracker::{MutationTracker, WriteOrigin};

/// 新的 updatedAt：保证严格大于旧值，避免同一毫秒内的两次编辑在 LWW 比较中被视为相同
fn bump_timestamp(previous: i64) -> i64 {
    now_millis().max(previous + 1)
}

fn require_name(name: &str, what: &str) -> NotesDbResult<()> {
    if name.trim().is_empty() {
        return Err(NotesDbError::Validation(format!("{} 名称不能为空", what)));
    }
    Ok(())
}

fn require<E: StoredEntity>(conn: &Connection, id: &str) -> NotesDbResult<E> {
    E::get(conn, id)?.ok_or_else(|| NotesDbError::NotFound(format!("{} {}", E::KIND, id)))
}

pub struct NotesRepo {
    db: Arc<NotesDatabase>,
    tracker: MutationTracker,
}

impl NotesRepo {
    pub fn new(db: Arc<NotesDatabase>) -> Self {
        Self {
            db,
            tracker: MutationTracker::new(),
        }
    }

    pub fn with_tracker(db: Arc<NotesDatabase>, tracker: MutationTracker) -> Self {
        Self { db, tracker }
    }

    pub fn database(&self) -> &Arc<NotesDatabase> {
        &self.db
    }

    // ------------------------------------------------------------------
    // 通用写入
    // ------------------------------------------------------------------

    /// 原样保存一条记录（时间戳由调用方负责）
    pub fn save<E: StoredEntity>(&self, record: &E) -> NotesDbResult<()> {
        let conn = self.db.get_conn()?;
        write_entity(&conn, &self.tracker, record, WriteOrigin::Local)?;
        Ok(())
    }

    /// 按规范化标识删除一条记录，返回是否存在
    pub fn remove<E: StoredEntity>(&self, id: &str) -> NotesDbResult<bool> {
        let conn = self.db.get_conn()?;
        let removed = remove_entity::<E>(&conn, &self.tracker, id, WriteOrigin::Local)?;
        Ok(removed.is_some())
    }

    pub fn get<E: StoredEntity>(&self, id: &str) -> NotesDbResult<Option<E>> {
        let conn = self.db.get_conn()?;
        Ok(E::get(&conn, id)?)
    }

    pub fn list<E: StoredEntity>(&self, notebook_id: &str) -> NotesDbResult<Vec<E>> {
        let conn = self.db.get_conn()?;
        Ok(E::list_in_notebook(&conn, notebook_id)?)
    }

    // ------------------------------------------------------------------
    // 笔记本
    // ------------------------------------------------------------------

    pub fn create_notebook(&self, name: &str) -> NotesDbResult<Notebook> {
        require_name(name, "笔记本")?;
        let notebook = Notebook::new(name.trim());
        self.save(&notebook)?;
        tracing::info!("[NotesRepo] 创建笔记本: {} ({})", notebook.name, notebook.id);
        Ok(notebook)
    }

    pub fn rename_notebook(&self, id: &str, name: &str) -> NotesDbResult<Notebook> {
        require_name(name, "笔记本")?;
        let conn = self.db.get_conn()?;
        let mut notebook: Notebook = require(&conn, id)?;
        notebook.name = name.trim().to_string();
        notebook.updated_at = bump_timestamp(notebook.updated_at);
        write_entity(&conn, &self.tracker, &notebook, WriteOrigin::Local)?;
        Ok(notebook)
    }

    pub fn list_notebooks(&self) -> NotesDbResult<Vec<Notebook>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM notebooks ORDER BY created_at ASC, id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut notebooks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(nb) = Notebook::get(&conn, &id)? {
                notebooks.push(nb);
            }
        }
        Ok(notebooks)
    }

    /// 删除笔记本及其全部内容，每条子记录都记录 delete 事件
    pub fn delete_notebook(&self, id: &str) -> NotesDbResult<bool> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        if Notebook::get(&tx, id)?.is_none() {
            return Ok(false);
        }

        let mut removed = 0usize;
        for link in NoteTag::list_in_notebook(&tx, id)? {
            remove_entity::<NoteTag>(&tx, &self.tracker, &link.canonical_id(), WriteOrigin::Local)?;
            removed += 1;
        }
        for item in MenuItem::list_in_notebook(&tx, id)? {
            remove_entity::<MenuItem>(&tx, &self.tracker, &item.id, WriteOrigin::Local)?;
            removed += 1;
        }
        for note in Note::list_in_notebook(&tx, id)? {
            remove_entity::<Note>(&tx, &self.tracker, &note.id, WriteOrigin::Local)?;
            removed += 1;
        }
        for tag in Tag::list_in_notebook(&tx, id)? {
            remove_entity::<Tag>(&tx, &self.tracker, &tag.id, WriteOrigin::Local)?;
            removed += 1;
        }
        remove_entity::<Notebook>(&tx, &self.tracker, id, WriteOrigin::Local)?;
        tx.commit()?;

        tracing::info!("[NotesRepo] 删除笔记本 {}（连带 {} 条记录）", id, removed);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // 笔记
    // ------------------------------------------------------------------

    pub fn create_note(&self, notebook_id: &str, content: &str) -> NotesDbResult<Note> {
        let conn = self.db.get_conn()?;
        require::<Notebook>(&conn, notebook_id)?;
        let note = Note::new(notebook_id, content);
        write_entity(&conn, &self.tracker, &note, WriteOrigin::Local)?;
        Ok(note)
    }

    pub fn update_note(&self, id: &str, content: &str) -> NotesDbResult<Note> {
        let conn = self.db.get_conn()?;
        let mut note: Note = require(&conn, id)?;
        if note.content == content {
            return Ok(note);
        }
        note.content = content.to_string();
        note.updated_at = bump_timestamp(note.updated_at);
        write_entity(&conn, &self.tracker, &note, WriteOrigin::Local)?;
        Ok(note)
    }

    /// 删除笔记及其标签关联
    pub fn delete_note(&self, id: &str) -> NotesDbResult<bool> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        let Some(note) = Note::get(&tx, id)? else {
            return Ok(false);
        };
        for link in NoteTag::list_in_notebook(&tx, &note.notebook_id)? {
            if link.note_id == note.id {
                remove_entity::<NoteTag>(&tx, &self.tracker, &link.canonical_id(), WriteOrigin::Local)?;
            }
        }
        remove_entity::<Note>(&tx, &self.tracker, id, WriteOrigin::Local)?;
        tx.commit()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // 标签
    // ------------------------------------------------------------------

    pub fn create_tag(&self, notebook_id: &str, name: &str) -> NotesDbResult<Tag> {
        require_name(name, "标签")?;
        let conn = self.db.get_conn()?;
        require::<Notebook>(&conn, notebook_id)?;
        let tag = Tag::new(notebook_id, name.trim());
        write_entity(&conn, &self.tracker, &tag, WriteOrigin::Local)?;
        Ok(tag)
    }

    pub fn delete_tag(&self, id: &str) -> NotesDbResult<bool> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        let Some(tag) = Tag::get(&tx, id)? else {
            return Ok(false);
        };
        for link in NoteTag::list_in_notebook(&tx, &tag.notebook_id)? {
            if link.tag_id == tag.id {
                remove_entity::<NoteTag>(&tx, &self.tracker, &link.canonical_id(), WriteOrigin::Local)?;
            }
        }
        remove_entity::<Tag>(&tx, &self.tracker, id, WriteOrigin::Local)?;
        tx.commit()?;
        Ok(true)
    }

    /// 给笔记打标签；已存在的关联原样返回，不重复记录
    pub fn tag_note(&self, note_id: &str, tag_id: &str) -> NotesDbResult<NoteTag> {
        let conn = self.db.get_conn()?;
        let note: Note = require(&conn, note_id)?;
        let tag: Tag = require(&conn, tag_id)?;
        if note.notebook_id != tag.notebook_id {
            return Err(NotesDbError::Validation(format!(
                "笔记 {} 与标签 {} 不属于同一笔记本",
                note_id, tag_id
            )));
        }
        if let Some(existing) = NoteTag::get(&conn, &note_tag_id(note_id, tag_id))? {
            return Ok(existing);
        }
        let link = NoteTag::new(&note.notebook_id, note_id, tag_id);
        write_entity(&conn, &self.tracker, &link, WriteOrigin::Local)?;
        Ok(link)
    }

    pub fn untag_note(&self, note_id: &str, tag_id: &str) -> NotesDbResult<bool> {
        self.remove::<NoteTag>(&note_tag_id(note_id, tag_id))
    }

    // ------------------------------------------------------------------
    // 菜单项
    // ------------------------------------------------------------------

    pub fn create_menu_item(
        &self,
        notebook_id: &str,
        parent_id: Option<&str>,
        name: &str,
        item_type: MenuItemType,
        target: Option<String>,
        order: f64,
    ) -> NotesDbResult<MenuItem> {
        require_name(name, "菜单项")?;
        let conn = self.db.get_conn()?;
        require::<Notebook>(&conn, notebook_id)?;
        if let Some(parent) = parent_id {
            require::<MenuItem>(&conn, parent)?;
        }
        let mut item = MenuItem::new(notebook_id, name.trim(), item_type, target);
        item.parent_id = parent_id.map(str::to_string);
        item.order = order;
        write_entity(&conn, &self.tracker, &item, WriteOrigin::Local)?;
        Ok(item)
    }

    pub fn rename_menu_item(&self, id: &str, name: &str) -> NotesDbResult<MenuItem> {
        require_name(name, "菜单项")?;
        let conn = self.db.get_conn()?;
        let mut item: MenuItem = require(&conn, id)?;
        item.name = name.trim().to_string();
        item.updated_at = bump_timestamp(item.updated_at);
        write_entity(&conn, &self.tracker, &item, WriteOrigin::Local)?;
        Ok(item)
    }

    /// 移动菜单项（`order` 由拖拽排序界面计算，这里原样保存）
    pub fn move_menu_item(
        &self,
        id: &str,
        parent_id: Option<&str>,
        order: f64,
    ) -> NotesDbResult<MenuItem> {
        let conn = self.db.get_conn()?;
        let mut item: MenuItem = require(&conn, id)?;
        if parent_id == Some(id) {
            return Err(NotesDbError::Validation("菜单项不能成为自身的子节点".into()));
        }
        item.parent_id = parent_id.map(str::to_string);
        item.order = order;
        item.updated_at = bump_timestamp(item.updated_at);
        write_entity(&conn, &self.tracker, &item, WriteOrigin::Local)?;
        Ok(item)
    }

    /// 删除菜单项及其全部子孙节点
    pub fn delete_menu_item(&self, id: &str) -> NotesDbResult<usize> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        let Some(root) = MenuItem::get(&tx, id)? else {
            return Ok(0);
        };
        let all = MenuItem::list_in_notebook(&tx, &root.notebook_id)?;

        let mut doomed = vec![root.id.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            for child in all.iter().filter(|i| i.parent_id.as_deref() == Some(parent.as_str())) {
                if !doomed.contains(&child.id) {
                    doomed.push(child.id.clone());
                }
            }
            cursor += 1;
        }

        for item_id in doomed.iter().rev() {
            remove_entity::<MenuItem>(&tx, &self.tracker, item_id, WriteOrigin::Local)?;
        }
        tx.commit()?;
        Ok(doomed.len())
    }
}
