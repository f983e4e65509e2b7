use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::identity::{split_note_tag_id, EntityKind, SyncEntity};
use crate::models::{MenuItem, MenuItemType, Note, NoteTag, Notebook, Tag};

/// 按类型的本地存取操作
///
/// 所有方法接收 `&Connection`，因此既可以在普通连接上调用，
/// 也可以在 `rusqlite::Transaction` 上调用（Transaction 解引用为 Connection）。
pub trait StoredEntity: SyncEntity {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>>;

    /// 按规范化标识读取
    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>>;

    /// 插入或覆盖（不能用 INSERT OR REPLACE，否则会触发外键级联删除）
    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()>;

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize>;
}

/// 判断某类型的记录是否存在于本地
pub fn exists(conn: &Connection, kind: EntityKind, id: &str) -> rusqlite::Result<bool> {
    let found = match kind {
        EntityKind::Notebook => Notebook::get(conn, id)?.is_some(),
        EntityKind::Note => Note::get(conn, id)?.is_some(),
        EntityKind::Tag => Tag::get(conn, id)?.is_some(),
        EntityKind::NoteTag => NoteTag::get(conn, id)?.is_some(),
        EntityKind::MenuItem => MenuItem::get(conn, id)?.is_some(),
    };
    Ok(found)
}

fn collect<T>(
    conn: &Connection,
    sql: &str,
    notebook_id: &str,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![notebook_id], map)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

fn notebook_from_row(row: &Row) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl StoredEntity for Notebook {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>> {
        collect(
            conn,
            "SELECT id, name, created_at, updated_at FROM notebooks WHERE id = ?1",
            notebook_id,
            notebook_from_row,
        )
    }

    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT id, name, created_at, updated_at FROM notebooks WHERE id = ?1",
            params![id],
            notebook_from_row,
        )
        .optional()
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO notebooks (id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![self.id, self.name, self.created_at, self.updated_at],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM notebooks WHERE id = ?1", params![id])
    }
}

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

fn note_from_row(row: &Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        notebook_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl StoredEntity for Note {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>> {
        collect(
            conn,
            "SELECT id, notebook_id, content, created_at, updated_at FROM notes
             WHERE notebook_id = ?1 ORDER BY created_at ASC, id ASC",
            notebook_id,
            note_from_row,
        )
    }

    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT id, notebook_id, content, created_at, updated_at FROM notes WHERE id = ?1",
            params![id],
            note_from_row,
        )
        .optional()
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO notes (id, notebook_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                notebook_id = excluded.notebook_id,
                content = excluded.content,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                self.id,
                self.notebook_id,
                self.content,
                self.created_at,
                self.updated_at
            ],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM notes WHERE id = ?1", params![id])
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

fn tag_from_row(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        notebook_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl StoredEntity for Tag {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>> {
        collect(
            conn,
            "SELECT id, notebook_id, name, created_at FROM tags
             WHERE notebook_id = ?1 ORDER BY created_at ASC, id ASC",
            notebook_id,
            tag_from_row,
        )
    }

    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            "SELECT id, notebook_id, name, created_at FROM tags WHERE id = ?1",
            params![id],
            tag_from_row,
        )
        .optional()
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO tags (id, notebook_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                notebook_id = excluded.notebook_id,
                name = excluded.name,
                created_at = excluded.created_at",
            params![self.id, self.notebook_id, self.name, self.created_at],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM tags WHERE id = ?1", params![id])
    }
}

// ---------------------------------------------------------------------------
// NoteTag（复合主键）
// ---------------------------------------------------------------------------

fn note_tag_from_row(row: &Row) -> rusqlite::Result<NoteTag> {
    Ok(NoteTag {
        note_id: row.get(0)?,
        tag_id: row.get(1)?,
        notebook_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl StoredEntity for NoteTag {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>> {
        collect(
            conn,
            "SELECT note_id, tag_id, notebook_id, created_at FROM note_tags
             WHERE notebook_id = ?1 ORDER BY note_id ASC, tag_id ASC",
            notebook_id,
            note_tag_from_row,
        )
    }

    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        let Some((note_id, tag_id)) = split_note_tag_id(id) else {
            return Ok(None);
        };
        conn.query_row(
            "SELECT note_id, tag_id, notebook_id, created_at FROM note_tags
             WHERE note_id = ?1 AND tag_id = ?2",
            params![note_id, tag_id],
            note_tag_from_row,
        )
        .optional()
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO note_tags (note_id, tag_id, notebook_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(note_id, tag_id) DO UPDATE SET
                notebook_id = excluded.notebook_id,
                created_at = excluded.created_at",
            params![self.note_id, self.tag_id, self.notebook_id, self.created_at],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        let Some((note_id, tag_id)) = split_note_tag_id(id) else {
            return Ok(0);
        };
        conn.execute(
            "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id = ?2",
            params![note_id, tag_id],
        )
    }
}

// ---------------------------------------------------------------------------
// MenuItem
// ---------------------------------------------------------------------------

fn menu_item_from_row(row: &Row) -> rusqlite::Result<MenuItem> {
    let raw_type: String = row.get(4)?;
    let item_type = MenuItemType::from_str(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown menu item type: {}", raw_type).into(),
        )
    })?;
    Ok(MenuItem {
        id: row.get(0)?,
        notebook_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        item_type,
        target: row.get(5)?,
        order: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const MENU_ITEM_COLUMNS: &str =
    "id, notebook_id, parent_id, name, item_type, target, sort_order, created_at, updated_at";

impl StoredEntity for MenuItem {
    fn list_in_notebook(conn: &Connection, notebook_id: &str) -> rusqlite::Result<Vec<Self>> {
        collect(
            conn,
            &format!(
                "SELECT {} FROM menu_items WHERE notebook_id = ?1 ORDER BY created_at ASC, id ASC",
                MENU_ITEM_COLUMNS
            ),
            notebook_id,
            menu_item_from_row,
        )
    }

    fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM menu_items WHERE id = ?1", MENU_ITEM_COLUMNS),
            params![id],
            menu_item_from_row,
        )
        .optional()
    }

    fn upsert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO menu_items (id, notebook_id, parent_id, name, item_type, target,
                                     sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                notebook_id = excluded.notebook_id,
                parent_id = excluded.parent_id,
                name = excluded.name,
                item_type = excluded.item_type,
                target = excluded.target,
                sort_order = excluded.sort_order,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                self.id,
                self.notebook_id,
                self.parent_id,
                self.name,
                self.item_type.as_str(),
                self.target,
                self.order,
                self.created_at,
                self.updated_at
            ],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute("DELETE FROM menu_items WHERE id = ?1", params![id])
    }
}
