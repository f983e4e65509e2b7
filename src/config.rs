//! 运行配置
//!
//! 加载顺序：`.env`（dotenvy）→ 可选的 `config/notebook_sync.toml` → 环境变量
//! `NOTEBOOK_SYNC__*`（`__` 表示嵌套，例如 `NOTEBOOK_SYNC__STORAGE__PROVIDER=webdav`）。
//! 后加载的来源覆盖先加载的。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cloud_storage::CloudStorageConfig;
use crate::models::AppError;

pub const ENV_PREFIX: &str = "NOTEBOOK_SYNC";
pub const CONFIG_FILE: &str = "config/notebook_sync";
pub const DEFAULT_LOG_FILTER: &str = "info";

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// 同步服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 本地数据库目录（其中的 `notes.db`）
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub storage: CloudStorageConfig,
    /// tracing EnvFilter 表达式
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage: CloudStorageConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl SyncConfig {
    /// 从 `.env`、配置文件与环境变量加载
    pub fn from_env_and_file() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let file = Path::new(CONFIG_FILE).with_extension("toml");
        let file = file.exists().then_some(file);
        Self::load(file.as_deref())
    }

    /// 从指定文件（可选）与环境变量加载
    ///
    /// # 参数
    /// - `file`: TOML 配置文件路径；`None` 时只读取环境变量
    pub fn load(file: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let loaded = builder
            .build()
            .map_err(|e| AppError::configuration(format!("加载配置失败: {}", e)))?;
        let cfg: SyncConfig = loaded
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("配置格式错误: {}", e)))?;

        cfg.storage.validate().map_err(AppError::configuration)?;
        tracing::debug!(
            "[Config] 数据目录 {}，存储 {}",
            cfg.data_dir.display(),
            cfg.storage.provider
        );
        Ok(cfg)
    }
}
