//! WebDAV 存储实现
//!
//! 基于 reqwest 的 WebDAV 客户端，支持坚果云、Nextcloud 等服务。
//! 连接失败与 5xx 响应按指数退避重试（backon），其余状态码直接返回给调用方。

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use std::fmt;
use std::time::Duration;

use super::config::WebDavConfig;
use super::traits::{CloudStorage, FileInfo, Result};
use crate::models::AppError;

const PROPFIND_BODY: &str = r#"<?xml version="1.0"?><d:propfind xmlns:d="DAV:"><d:prop><d:getlastmodified/><d:getcontentlength/><d:getetag/></d:prop></d:propfind>"#;

/// 单次请求失败的原因（用于判断是否重试）
#[derive(Debug)]
enum AttemptError {
    Send(reqwest::Error),
    Server(StatusCode),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Send(e) => write!(f, "{}", e),
            AttemptError::Server(status) => write!(
                f,
                "{} {}",
                status,
                status.canonical_reason().unwrap_or("")
            ),
        }
    }
}

/// WebDAV 存储实现
pub struct WebDavStorage {
    base_url: Url,
    username: String,
    password: String,
    root: String,
    max_retries: usize,
    http: Client,
}

impl WebDavStorage {
    /// 创建 WebDAV 存储实例
    pub fn new(config: WebDavConfig, root: String) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::validation("WebDAV endpoint 不能为空"));
        }

        let url = Url::parse(config.endpoint.trim())
            .map_err(|e| AppError::configuration(format!("无效的 WebDAV endpoint: {e}")))?;

        let is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "::1" | "[::1]"));
        if !is_local && url.scheme() != "https" {
            return Err(AppError::configuration(
                "WebDAV endpoint 必须使用 HTTPS 以保护 Basic Auth 凭据（仅 localhost 允许 HTTP）"
                    .to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(30)))
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| AppError::internal(format!("构建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            base_url: url,
            username: config.username,
            password: config.password,
            root: root.trim_matches('/').to_string(),
            max_retries: config.max_retries,
            http,
        })
    }

    /// 构建 Basic 认证头
    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    /// 构建完整 URL：endpoint 路径 + root + key
    fn build_url(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        let mut path = url.path().trim_end_matches('/').to_string();
        path.push('/');
        if !self.root.is_empty() {
            path.push_str(&self.root);
            path.push('/');
        }
        path.push_str(key.trim_start_matches('/'));
        url.set_path(&path);
        url
    }

    fn mkcol_method() -> Result<Method> {
        Method::from_bytes(b"MKCOL")
            .map_err(|e| AppError::internal(format!("无效 WebDAV 方法 MKCOL: {e}")))
    }

    fn propfind_method() -> Result<Method> {
        Method::from_bytes(b"PROPFIND")
            .map_err(|e| AppError::internal(format!("无效 WebDAV 方法 PROPFIND: {e}")))
    }

    /// 发送 HTTP 请求（连接失败与 5xx 自动重试）
    async fn request(
        &self,
        method: Method,
        key: &str,
        body: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let url = self.build_url(key);
        let url = &url;
        let method_ref = &method;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_times(self.max_retries);

        let send = move || async move {
            let mut builder = self
                .http
                .request(method_ref.clone(), url.clone())
                .header("Authorization", self.auth_header());
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            if let Some(bytes) = body {
                builder = builder.body(bytes.to_vec());
            }

            let resp = builder.send().await.map_err(AttemptError::Send)?;
            if resp.status().is_server_error() {
                tracing::debug!(
                    "[CloudStorage::WebDAV] {} {} 返回 {}，准备重试",
                    method_ref,
                    url.path(),
                    resp.status()
                );
                return Err(AttemptError::Server(resp.status()));
            }
            Ok(resp)
        };

        send.retry(&backoff).await.map_err(|e| {
            AppError::network(format!(
                "WebDAV {} 请求失败（最多重试 {} 次）: {}",
                method, self.max_retries, e
            ))
        })
    }

    async fn propfind(&self, key: &str, depth: &str) -> Result<Option<String>> {
        let res = self
            .request(
                Self::propfind_method()?,
                key,
                Some(PROPFIND_BODY.as_bytes()),
                &[("Depth", depth), ("Content-Type", "application/xml")],
            )
            .await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(status_error("WebDAV PROPFIND 失败", res.status()));
        }

        let xml = res
            .text()
            .await
            .map_err(|e| AppError::network(format!("读取 PROPFIND 响应失败: {e}")))?;
        Ok(Some(xml))
    }

    /// 确保目录存在（从 root 开始逐级 MKCOL）
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let mut targets = vec![String::new()];
        let mut current = String::new();
        for part in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            targets.push(format!("{}/", current));
        }

        for target in targets {
            let res = self
                .request(Self::mkcol_method()?, &target, None, &[])
                .await?;
            match res.status() {
                // 405 / 409 表示目录已存在
                StatusCode::OK
                | StatusCode::CREATED
                | StatusCode::METHOD_NOT_ALLOWED
                | StatusCode::CONFLICT => {}
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(status_error("WebDAV 认证失败", res.status()));
                }
                other => {
                    tracing::debug!("[CloudStorage::WebDAV] MKCOL {} 返回 {}", target, other);
                }
            }
        }
        Ok(())
    }

    /// 解析 PROPFIND 响应（roxmltree 不处理外部实体，防止 XXE）
    fn parse_propfind_response(&self, xml: &str, prefix: &str) -> Vec<FileInfo> {
        let doc = match roxmltree::Document::parse(xml) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("[CloudStorage::WebDAV] PROPFIND XML 解析失败: {e}");
                return Vec::new();
            }
        };

        let dav_ns = "DAV:";
        let text_of = |node: roxmltree::Node, name: &str| {
            node.descendants()
                .find(|n| n.has_tag_name((dav_ns, name)))
                .and_then(|n| n.text())
                .map(str::to_string)
        };

        let mut files = Vec::new();
        for response in doc
            .descendants()
            .filter(|n| n.has_tag_name((dav_ns, "response")))
        {
            let href = text_of(response, "href").unwrap_or_default();
            if href.ends_with('/') {
                continue;
            }

            let key = self.extract_relative_key(&href, prefix);
            if key.is_empty() {
                continue;
            }

            let size = text_of(response, "getcontentlength")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0);
            let last_modified = text_of(response, "getlastmodified")
                .and_then(|s| {
                    DateTime::parse_from_rfc2822(s.trim())
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                })
                .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
            let etag = text_of(response, "getetag").map(|s| s.trim_matches('"').to_string());

            files.push(FileInfo {
                key,
                size,
                last_modified,
                etag,
            });
        }

        files.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        files
    }

    fn extract_relative_key(&self, href: &str, prefix: &str) -> String {
        let decoded = urlencoding::decode(href).unwrap_or_else(|_| href.into());

        let root_path = format!("/{}/", self.root);
        let Some(idx) = decoded.find(&root_path) else {
            return String::new();
        };
        let relative = &decoded[idx + root_path.len()..];
        if prefix.is_empty() || relative.starts_with(prefix.trim_start_matches('/')) {
            relative.to_string()
        } else {
            String::new()
        }
    }
}

fn status_error(context: &str, status: StatusCode) -> AppError {
    AppError::network(format!(
        "{}: {} {}",
        context,
        status,
        status.canonical_reason().unwrap_or("")
    ))
}

#[async_trait]
impl CloudStorage for WebDavStorage {
    fn provider_name(&self) -> &'static str {
        "WebDAV"
    }

    async fn check_connection(&self) -> Result<()> {
        let res = self.request(Self::mkcol_method()?, "", None, &[]).await?;
        if matches!(
            res.status(),
            StatusCode::OK
                | StatusCode::CREATED
                | StatusCode::METHOD_NOT_ALLOWED
                | StatusCode::CONFLICT
        ) {
            return Ok(());
        }

        // 部分服务不支持对根目录 MKCOL，回退为 PROPFIND
        match self.propfind("", "0").await {
            Ok(_) => Ok(()),
            Err(e) => Err(AppError::network(format!("WebDAV 连接检测失败: {}", e))),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if let Some((parent, _)) = key.trim_start_matches('/').rsplit_once('/') {
            if !parent.is_empty() {
                self.ensure_directory(parent).await?;
            }
        }

        let res = self.request(Method::PUT, key, Some(data), &[]).await?;
        if res.status().is_success() {
            tracing::debug!("[CloudStorage::WebDAV] PUT {} ({} bytes)", key, data.len());
            Ok(())
        } else {
            Err(status_error("WebDAV 上传失败", res.status()))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let res = self.request(Method::GET, key, None, &[]).await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(status_error("WebDAV 下载失败", res.status()));
        }

        let bytes = res
            .bytes()
            .await
            .map_err(|e| AppError::network(format!("读取响应体失败: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let path = prefix.trim_matches('/');
        let dir = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        match self.propfind(&dir, "1").await? {
            Some(xml) => Ok(self.parse_propfind_response(&xml, path)),
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let res = self.request(Method::DELETE, key, None, &[]).await?;

        if res.status().is_success() || res.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error("WebDAV 删除失败", res.status()))
        }
    }

    async fn stat(&self, key: &str) -> Result<Option<FileInfo>> {
        match self.propfind(key, "0").await? {
            Some(xml) => Ok(self.parse_propfind_response(&xml, "").into_iter().next()),
            None => Ok(None),
        }
    }

    async fn mkdir(&self, key: &str) -> Result<()> {
        self.ensure_directory(key).await
    }
}
