//! CloudStorage trait 定义
//!
//! 同步引擎使用的远端传输接口。所有 key 都是相对于配置中 `root` 的路径，
//! 使用 `/` 分隔（例如 `nb_<id>/data.json`）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AppError;

pub type Result<T> = std::result::Result<T, AppError>;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// 文件键（路径）
    pub key: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 最后修改时间
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// 统一的远端存储访问 trait
///
/// 实现：WebDAV、S3 兼容存储（feature `cloud_storage_s3`）、本地目录。
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// 获取存储后端名称（用于日志和调试）
    fn provider_name(&self) -> &'static str;

    /// 检查连接是否可用
    async fn check_connection(&self) -> Result<()>;

    /// 上传文件（覆盖写）
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// 下载文件
    ///
    /// # 返回
    /// * `Ok(Some(data))` - 文件存在
    /// * `Ok(None)` - 文件不存在
    /// * `Err(e)` - 其他错误
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 列出指定前缀的文件，按 last_modified 降序排列
    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 获取文件元信息；不存在时返回 `Ok(None)`
    async fn stat(&self, key: &str) -> Result<Option<FileInfo>>;

    /// 检查文件是否存在
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// 确保目录存在（已存在不是错误）
    ///
    /// 对象存储没有目录概念，默认实现直接返回成功。
    async fn mkdir(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// 拼接 root 与相对 key，去掉多余的斜杠
pub(crate) fn join_key(root: &str, key: &str) -> String {
    let root = root.trim_matches('/');
    let key = key.trim_start_matches('/');
    if root.is_empty() {
        key.to_string()
    } else if key.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, key)
    }
}
