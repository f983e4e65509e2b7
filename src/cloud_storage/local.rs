//! 本地目录存储实现
//!
//! 把远端文档写入本机目录（可以是网盘客户端的同步文件夹）。
//! 写入先落到同目录下的临时文件再 rename，读取方不会看到写了一半的文档。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::config::LocalStorageConfig;
use super::traits::{CloudStorage, FileInfo, Result};
use crate::models::AppError;

pub struct LocalFsStorage {
    base: PathBuf,
}

impl LocalFsStorage {
    pub fn new(config: LocalStorageConfig, root: String) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(AppError::validation("本地目录路径不能为空"));
        }
        Ok(Self::at(Path::new(config.path.trim()).join(root.trim_matches('/'))))
    }

    /// 直接以 `base` 为根目录
    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// 将相对 key 映射为本地路径，拒绝 `..` 与绝对路径
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        for component in relative.components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(AppError::validation(format!("非法的存储路径: {}", key)));
            }
        }
        Ok(self.base.join(relative))
    }

    async fn file_info(&self, key: &str, path: &Path) -> Result<Option<FileInfo>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
                Ok(Some(FileInfo {
                    key: key.trim_start_matches('/').to_string(),
                    size: meta.len(),
                    last_modified,
                    etag: None,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::file_system(format!(
                "读取文件信息失败 {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl CloudStorage for LocalFsStorage {
    fn provider_name(&self) -> &'static str {
        "Local"
    }

    async fn check_connection(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await.map_err(|e| {
            AppError::file_system(format!("无法访问同步目录 {}: {}", self.base.display(), e))
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::file_system(format!("创建目录失败: {e}")))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| AppError::file_system(format!("写入临时文件失败: {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::file_system(format!("替换文件失败: {e}")));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::file_system(format!(
                "读取文件失败 {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let prefix = prefix.trim_start_matches('/');
        let mut files = Vec::new();
        let mut pending = vec![(self.base.clone(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::file_system(format!("读取目录失败: {e}"))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AppError::file_system(format!("读取目录失败: {e}")))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = if relative.is_empty() {
                    name
                } else {
                    format!("{}/{}", relative, name)
                };
                let path = entry.path();
                if path.is_dir() {
                    pending.push((path, key));
                } else if key.starts_with(prefix) && !key.contains(".tmp-") {
                    if let Some(info) = self.file_info(&key, &path).await? {
                        files.push(info);
                    }
                }
            }
        }

        files.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(files)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::file_system(format!("删除文件失败: {e}"))),
        }
    }

    async fn stat(&self, key: &str) -> Result<Option<FileInfo>> {
        let path = self.resolve(key)?;
        self.file_info(key, &path).await
    }

    async fn mkdir(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AppError::file_system(format!("创建目录失败: {e}")))
    }
}
