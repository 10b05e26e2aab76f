//! Raw banner blobs in MinIO (S3 API).
//!
//! Objects are plain-text hex dumps keyed `{task_id}_{unix_nanos}.hex`.
//! The bucket is created lazily on first connect.

use anyhow::{Context, Result};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::info;

use crate::config::MinioConfig;

pub struct BlobStore {
    client: Client,
    bucket: String,
}

impl BlobStore {
    pub async fn connect(cfg: &MinioConfig) -> Result<Self> {
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "minio",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let store = Self {
            client: Client::from_conf(config),
            bucket: cfg.bucket.clone(),
        };
        store.ensure_bucket().await?;
        info!("connected to blob store, bucket={}", store.bucket);
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();
        if !exists {
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .with_context(|| format!("failed to create bucket {}", self.bucket))?;
            info!("created bucket {}", self.bucket);
        }
        Ok(())
    }

    /// Store one hex dump under `key`.
    pub async fn put_hex(&self, key: &str, hex_dump: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/plain")
            .body(ByteStream::from(hex_dump.into_bytes()))
            .send()
            .await
            .with_context(|| format!("failed to store object {key}"))?;
        Ok(())
    }
}

/// Blob keys carry the task id and a nanosecond stamp so repeated scans
/// of one task never collide.
pub fn object_key(task_id: &str) -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("{task_id}_{nanos}.hex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_shape() {
        let key = object_key("tcp-123");
        assert!(key.starts_with("tcp-123_"));
        assert!(key.ends_with(".hex"));
        let stamp = &key["tcp-123_".len()..key.len() - ".hex".len()];
        assert!(stamp.parse::<i64>().is_ok());
    }

    #[test]
    fn test_object_keys_differ_across_calls() {
        let a = object_key("t");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = object_key("t");
        assert_ne!(a, b);
    }
}
