//! 远端存储配置结构
//!
//! WebDAV、S3 兼容存储与本地目录的统一配置。
//! 字段使用 camelCase；蛇形别名用于从环境变量加载（`config` crate 会把键名转成小写蛇形）。

use serde::{Deserialize, Serialize};

/// 默认根目录
pub const DEFAULT_ROOT: &str = "notebook-sync";

/// 存储提供商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// WebDAV 存储（如坚果云、Nextcloud、自建 WebDAV）
    WebDav,
    /// S3 兼容存储（AWS S3、Cloudflare R2、MinIO 等）
    S3,
    /// 本地目录（可指向网盘同步文件夹）
    Local,
}

impl Default for StorageProvider {
    fn default() -> Self {
        StorageProvider::WebDav
    }
}

impl std::fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageProvider::WebDav => write!(f, "WebDAV"),
            StorageProvider::S3 => write!(f, "S3"),
            StorageProvider::Local => write!(f, "Local"),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

/// WebDAV 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavConfig {
    /// WebDAV 服务器地址（如 https://dav.jianguoyun.com/dav/）
    pub endpoint: String,
    pub username: String,
    /// 密码或应用专用密码
    #[serde(default)]
    pub password: String,
    /// 单次请求超时
    #[serde(default = "default_timeout_secs", alias = "timeout_secs")]
    pub timeout_secs: u64,
    /// 瞬时错误（连接失败、5xx）的最大重试次数
    #[serde(default = "default_max_retries", alias = "max_retries")]
    pub max_retries: usize,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// S3 兼容存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    /// S3 endpoint URL
    /// - AWS S3: https://s3.{region}.amazonaws.com
    /// - Cloudflare R2: https://{account_id}.r2.cloudflarestorage.com
    /// - MinIO: http://localhost:9000
    pub endpoint: String,
    pub bucket: String,
    #[serde(alias = "access_key_id")]
    pub access_key_id: String,
    #[serde(alias = "secret_access_key")]
    pub secret_access_key: String,
    /// 区域（某些 S3 兼容服务不需要）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// MinIO 等服务需要 path-style 地址
    #[serde(default, alias = "path_style")]
    pub path_style: bool,
}

/// 本地目录配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageConfig {
    pub path: String,
}

/// 统一的远端存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webdav: Option<WebDavConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalStorageConfig>,
    /// 根目录路径（所有操作都在此目录下）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl CloudStorageConfig {
    /// 获取根目录路径，默认为 "notebook-sync"
    pub fn root(&self) -> String {
        self.root
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_ROOT)
            .trim()
            .trim_matches('/')
            .to_string()
    }

    /// 验证配置是否完整
    pub fn validate(&self) -> Result<(), String> {
        match self.provider {
            StorageProvider::WebDav => {
                let config = self.webdav.as_ref().ok_or("缺少 WebDAV 配置")?;
                if config.endpoint.trim().is_empty() {
                    return Err("WebDAV endpoint 不能为空".into());
                }
                if config.username.trim().is_empty() {
                    return Err("WebDAV 用户名不能为空".into());
                }
                if config.timeout_secs == 0 {
                    return Err("WebDAV 超时时间必须大于 0".into());
                }
                Ok(())
            }
            StorageProvider::S3 => {
                let config = self.s3.as_ref().ok_or("缺少 S3 配置")?;
                if config.endpoint.trim().is_empty() {
                    return Err("S3 endpoint 不能为空".into());
                }
                if config.bucket.trim().is_empty() {
                    return Err("S3 bucket 不能为空".into());
                }
                if config.access_key_id.trim().is_empty() {
                    return Err("S3 Access Key ID 不能为空".into());
                }
                if config.secret_access_key.trim().is_empty() {
                    return Err("S3 Secret Access Key 不能为空".into());
                }
                Ok(())
            }
            StorageProvider::Local => {
                let config = self.local.as_ref().ok_or("缺少本地目录配置")?;
                if config.path.trim().is_empty() {
                    return Err("本地目录路径不能为空".into());
                }
                Ok(())
            }
        }
    }
}
