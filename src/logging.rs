//! 日志初始化

use tracing_subscriber::EnvFilter;

use crate::config::DEFAULT_LOG_FILTER;

/// 安装全局 fmt subscriber
///
/// `RUST_LOG` 优先；未设置时使用 `filter`，表达式无效时退回 `info`。
/// 重复调用（例如多个测试）不会报错，返回 `false` 表示已有全局 subscriber。
pub fn init_tracing(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
