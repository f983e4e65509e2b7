// Notebook Sync library entry
// 笔记本分区的离线优先同步：本地 SQLite 存储 + 变更日志 + 远端快照文档。

pub mod cloud_storage;
pub mod config;
pub mod identity;
pub mod logging;
pub mod models;
pub mod repo;
pub mod store;
pub mod sync;
pub mod tracker;

pub use cloud_storage::{create_storage, CloudStorage, CloudStorageConfig, StorageProvider};
pub use config::SyncConfig;
pub use identity::{EntityKind, SyncEntity};
pub use models::{
    AppError, AppErrorType, MenuItem, MenuItemType, Note, NoteTag, Notebook, SyncAction,
    SyncEvent, Tag,
};
pub use repo::NotesRepo;
pub use store::{NotesDatabase, NotesDbError, NotesDbResult};
pub use sync::{
    ReconcileReport, SyncError, SyncMode, SyncOrchestrator, SyncOutcome, SyncReport, SyncStatus,
};
pub use tracker::{MutationLog, MutationTracker, TrackerFailure, WriteOrigin};
