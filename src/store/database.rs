//! 本地笔记数据库
//!
//! 管理 `notes.db`（SQLite），使用 r2d2 连接池。
//! 建表语句幂等执行，不做 schema 迁移。

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// 数据库文件名
pub const DATABASE_FILENAME: &str = "notes.db";

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notebooks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    notebook_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (notebook_id) REFERENCES notebooks (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_notes_notebook ON notes(notebook_id);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    notebook_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (notebook_id) REFERENCES notebooks (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_tags_notebook ON tags(notebook_id);

CREATE TABLE IF NOT EXISTS note_tags (
    note_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    notebook_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (note_id, tag_id),
    FOREIGN KEY (note_id) REFERENCES notes (id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE,
    FOREIGN KEY (notebook_id) REFERENCES notebooks (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_note_tags_notebook ON note_tags(notebook_id);

-- parent_id 不设外键：同一批次内子节点可能先于父节点写入
CREATE TABLE IF NOT EXISTS menu_items (
    id TEXT PRIMARY KEY,
    notebook_id TEXT NOT NULL,
    parent_id TEXT,
    name TEXT NOT NULL,
    item_type TEXT NOT NULL,
    target TEXT,
    sort_order REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (notebook_id) REFERENCES notebooks (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_menu_items_notebook ON menu_items(notebook_id);

-- 变更日志不引用 notebooks：笔记本被删除后其 delete 事件仍需保留到下次推送
CREATE TABLE IF NOT EXISTS sync_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    notebook_id TEXT NOT NULL,
    entity_name TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_events_notebook ON sync_events(notebook_id, created_at);
"#;

/// 数据库错误类型
#[derive(Debug, Error)]
pub enum NotesDbError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type NotesDbResult<T> = Result<T, NotesDbError>;

pub type NotesPool = Pool<SqliteConnectionManager>;

pub type NotesPooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// 本地笔记数据库
pub struct NotesDatabase {
    pool: RwLock<NotesPool>,
    db_path: PathBuf,
}

impl NotesDatabase {
    /// 在 `data_dir` 下打开（或创建）数据库并初始化表结构
    pub fn new(data_dir: &Path) -> NotesDbResult<Self> {
        info!("[NotesDb] Initializing database in: {}", data_dir.display());

        if let Err(e) = fs::create_dir_all(data_dir) {
            error!("[NotesDb] Failed to create data directory: {}", e);
            return Err(NotesDbError::Database(format!(
                "Failed to create data directory: {}",
                e
            )));
        }

        let db_path = data_dir.join(DATABASE_FILENAME);
        let pool = Self::build_pool(&db_path)?;

        let db = Self {
            pool: RwLock::new(pool),
            db_path,
        };
        db.init_schema()?;

        info!(
            "[NotesDb] Database initialized successfully: {}",
            db.db_path.display()
        );
        Ok(db)
    }

    fn build_pool(db_path: &Path) -> NotesDbResult<NotesPool> {
        debug!("[NotesDb] Building connection pool for: {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            // 外键级联依赖此开关
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "busy_timeout", 3000i64)?;
            Ok(())
        });

        Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .map_err(|e| NotesDbError::Pool(format!("Failed to create connection pool: {}", e)))
    }

    fn init_schema(&self) -> NotesDbResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// 获取池化连接
    pub fn get_conn(&self) -> NotesDbResult<NotesPooledConnection> {
        let pool = self
            .pool
            .read()
            .map_err(|e| NotesDbError::Pool(format!("Pool lock poisoned: {}", e)))?;

        pool.get()
            .map_err(|e| NotesDbError::Pool(format!("Failed to get connection: {}", e)))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_foreign_keys_enabled(&self) -> NotesDbResult<bool> {
        let conn = self.get_conn()?;
        let enabled: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        Ok(enabled == 1)
    }
}
