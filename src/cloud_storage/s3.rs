//! S3 兼容存储实现
//!
//! 支持 AWS S3、Cloudflare R2、MinIO 等 S3 兼容服务。
//! 对象存储没有目录，`mkdir` 使用 trait 默认实现（直接成功）。
//!
//! 需要启用 `cloud_storage_s3` feature

#![cfg(feature = "cloud_storage_s3")]

use async_trait::async_trait;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use chrono::{DateTime, Utc};

use super::config::S3Config;
use super::traits::{join_key, CloudStorage, FileInfo, Result};
use crate::models::AppError;

/// S3 兼容存储实现
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    root: String,
}

fn to_utc(value: Option<SmithyDateTime>, key: &str) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_else(|| {
            tracing::warn!(
                "[CloudStorage::S3] '{}' 缺少有效的 last_modified，使用 epoch",
                key
            );
            DateTime::<Utc>::from(std::time::UNIX_EPOCH)
        })
}

impl S3Storage {
    /// 创建 S3 存储实例（不发起网络请求）
    pub async fn new(config: S3Config, root: String) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::validation("S3 endpoint 不能为空"));
        }
        if config.bucket.trim().is_empty() {
            return Err(AppError::validation("S3 bucket 不能为空"));
        }

        let credentials = aws_sdk_s3::config::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "notebook_sync",
        );

        // 某些 S3 兼容服务要求必须给出区域，默认 us-east-1
        let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(&config.endpoint)
            .region(aws_sdk_s3::config::Region::new(region))
            .force_path_style(config.path_style)
            .behavior_version_latest()
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
            root: root.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.root, key)
    }

    fn relative_key(&self, full_key: &str) -> String {
        if self.root.is_empty() {
            return full_key.to_string();
        }
        let prefix = format!("{}/", self.root);
        full_key
            .strip_prefix(&prefix)
            .unwrap_or(full_key)
            .to_string()
    }
}

#[async_trait]
impl CloudStorage for S3Storage {
    fn provider_name(&self) -> &'static str {
        "S3"
    }

    async fn check_connection(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| AppError::network(format!("S3 连接检测失败: {e}")))?;
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type("application/json")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| AppError::network(format!("S3 上传失败: {e}")))?;
        tracing::debug!("[CloudStorage::S3] PUT {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::network(format!("S3 读取响应体失败: {e}")))?
                    .into_bytes()
                    .to_vec();
                Ok(Some(bytes))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(AppError::network(format!("S3 下载失败: {service_error}")))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let full_prefix = self.full_key(prefix);
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| AppError::network(format!("S3 列出文件失败: {e}")))?;

            for object in output.contents.unwrap_or_default() {
                let key = object.key.unwrap_or_default();
                if key.ends_with('/') {
                    continue;
                }
                files.push(FileInfo {
                    last_modified: to_utc(object.last_modified, &key),
                    key: self.relative_key(&key),
                    size: object.size.unwrap_or(0).max(0) as u64,
                    etag: object.e_tag,
                });
            }

            if output.is_truncated.unwrap_or(false) {
                continuation_token = output.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        files.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(files)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| AppError::network(format!("S3 删除失败: {e}")))?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<Option<FileInfo>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(FileInfo {
                key: key.to_string(),
                size: output.content_length.unwrap_or(0).max(0) as u64,
                last_modified: to_utc(output.last_modified, key),
                etag: output.e_tag,
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(AppError::network(format!(
                        "S3 获取文件信息失败: {service_error}"
                    )))
                }
            }
        }
    }
}
