//! 本地存储层
//!
//! - `database`: SQLite 连接池与表结构
//! - `entities`: 按记录类型的 list/get/upsert/delete
//!
//! `write_entity` / `remove_entity` 是所有写入的唯一入口：写入完成后交给
//! [`MutationTracker`] 记录变更，是否记录由 [`WriteOrigin`] 决定。

pub mod database;
pub mod entities;

pub use database::{
    NotesDatabase, NotesDbError, NotesDbResult, NotesPool, NotesPooledConnection,
    DATABASE_FILENAME,
};
pub use entities::{exists, StoredEntity};

use rusqlite::Connection;

use crate::models::SyncAction;
use crate::tracker::{MutationTracker, WriteOrigin};

/// 插入或更新一条记录，并按写入来源决定是否记录变更
///
/// 返回实际发生的动作（create / update）。
pub fn write_entity<E: StoredEntity>(
    conn: &Connection,
    tracker: &MutationTracker,
    record: &E,
    origin: WriteOrigin,
) -> rusqlite::Result<SyncAction> {
    let id = record.canonical_id();
    let existed = E::get(conn, &id)?.is_some();
    record.upsert(conn)?;

    let action = if existed {
        SyncAction::Update
    } else {
        SyncAction::Create
    };
    tracker.record(conn, action, record, origin);
    Ok(action)
}

/// 删除一条记录；记录不存在时返回 `Ok(None)` 且不产生变更
///
/// 删除事件使用删除前的快照解析所属分区。
pub fn remove_entity<E: StoredEntity>(
    conn: &Connection,
    tracker: &MutationTracker,
    id: &str,
    origin: WriteOrigin,
) -> rusqlite::Result<Option<E>> {
    let Some(existing) = E::get(conn, id)? else {
        return Ok(None);
    };
    E::delete(conn, id)?;
    tracker.record(conn, SyncAction::Delete, &existing, origin);
    Ok(Some(existing))
}

#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.pragma_update(None, "foreign_keys", "ON")
        .expect("enable foreign keys");
    conn.execute_batch(database::SCHEMA_SQL)
        .expect("create schema");
    conn
}
