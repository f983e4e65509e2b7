//! 远端存储模块
//!
//! 同步引擎的传输层，支持以下后端：
//! - **WebDAV**: 坚果云、Nextcloud、自建 WebDAV 等
//! - **S3**: AWS S3、Cloudflare R2、MinIO 等（feature `cloud_storage_s3`）
//! - **Local**: 本机目录（例如网盘同步文件夹）
//!
//! ## 使用示例
//! ```rust,ignore
//! use notebook_sync::cloud_storage::{create_storage, CloudStorageConfig, StorageProvider};
//!
//! let storage = create_storage(&config).await?;
//! storage.put("nb_<id>/data.json", &bytes).await?;
//! ```

mod config;
mod local;
#[cfg(feature = "cloud_storage_s3")]
mod s3;
mod traits;
mod webdav;

pub use config::{
    CloudStorageConfig, LocalStorageConfig, S3Config, StorageProvider, WebDavConfig,
    DEFAULT_ROOT,
};
pub use local::LocalFsStorage;
#[cfg(feature = "cloud_storage_s3")]
pub use s3::S3Storage;
pub use traits::{CloudStorage, FileInfo, Result};
pub use webdav::WebDavStorage;

use crate::models::AppError;

/// 根据配置创建存储实例
pub async fn create_storage(config: &CloudStorageConfig) -> Result<Box<dyn CloudStorage>> {
    config.validate().map_err(AppError::configuration)?;

    let root = config.root();
    tracing::info!(
        "[CloudStorage] 使用 {} 存储，根目录: {}",
        config.provider,
        root
    );

    match config.provider {
        StorageProvider::WebDav => {
            let webdav_config = config
                .webdav
                .clone()
                .ok_or_else(|| AppError::configuration("缺少 WebDAV 配置"))?;
            Ok(Box::new(WebDavStorage::new(webdav_config, root)?))
        }
        #[cfg(feature = "cloud_storage_s3")]
        StorageProvider::S3 => {
            let s3_config = config
                .s3
                .clone()
                .ok_or_else(|| AppError::configuration("缺少 S3 配置"))?;
            Ok(Box::new(S3Storage::new(s3_config, root).await?))
        }
        #[cfg(not(feature = "cloud_storage_s3"))]
        StorageProvider::S3 => Err(AppError::configuration(
            "S3 存储支持未启用，请在编译时启用 cloud_storage_s3 feature",
        )),
        StorageProvider::Local => {
            let local_config = config
                .local
                .clone()
                .ok_or_else(|| AppError::configuration("缺少本地目录配置"))?;
            Ok(Box::new(LocalFsStorage::new(local_config, root)?))
        }
    }
}

/// 是否编译了 S3 支持
pub fn is_s3_enabled() -> bool {
    cfg!(feature = "cloud_storage_s3")
}
