use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};

use crate::core::config::S3Settings;

pub(crate) const RAW_PREFIX: &str = "answer-sheets";
pub(crate) const CORRECTED_PREFIX: &str = "corrected-answer-sheets";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredObject {
    pub(crate) key: String,
    pub(crate) location: String,
    pub(crate) size: i64,
    pub(crate) sha256: String,
}

impl StoredObject {
    pub(crate) fn describe(key: &str, location: String, bytes: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            location,
            size: bytes.len() as i64,
            sha256: hex::encode(Sha256::digest(bytes)),
        }
    }
}

/// Durable blob storage addressed by opaque, namespaced keys.
#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> anyhow::Result<StoredObject>;
}

#[derive(Debug, Clone)]
pub(crate) struct S3ObjectStore {
    client: Client,
    bucket: String,
    endpoint: String,
}

impl S3ObjectStore {
    pub(crate) async fn from_settings(settings: &S3Settings) -> anyhow::Result<Option<Self>> {
        if !settings.is_configured() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "autograder-static",
        );

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(settings.timeout_seconds))
            .build();

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.endpoint.clone())
            .region(aws_config::Region::new(settings.region.clone()))
            .credentials_provider(creds)
            .timeout_config(timeouts)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self {
            client,
            bucket: settings.bucket.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        }))
    }

    fn location(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => match err.as_service_error() {
                Some(service_error) if service_error.is_not_found() => Ok(false),
                _ => Err(anyhow::anyhow!(err).context(format!("Failed to check object {key}"))),
            },
        }
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to fetch object {key}"))?;

        let data = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read object body {key}"))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<StoredObject> {
        let stored = StoredObject::describe(key, self.location(key), &bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Failed to upload object {key}"))?;

        Ok(stored)
    }
}

/// Stand-in used when no S3 credentials are configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DisabledObjectStore;

#[async_trait]
impl ObjectStore for DisabledObjectStore {
    async fn exists(&self, _key: &str) -> anyhow::Result<bool> {
        anyhow::bail!("S3 storage not configured")
    }

    async fn get(&self, _key: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("S3 storage not configured")
    }

    async fn put(
        &self,
        _key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> anyhow::Result<StoredObject> {
        anyhow::bail!("S3 storage not configured")
    }
}

/// Key for a freshly uploaded raw document; the file name is reduced to a safe suffix.
pub(crate) fn raw_key(upload_id: &str, file_name: &str) -> String {
    format!("{RAW_PREFIX}/{upload_id}-{}", sanitize_file_name(file_name))
}

/// Each correction attempt gets its own key so a failed attempt never overwrites a good artifact.
pub(crate) fn corrected_key(sheet_id: &str, attempt_id: &str) -> String {
    format!("{CORRECTED_PREFIX}/{sheet_id}/{attempt_id}.pdf")
}

pub(crate) fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');

    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}
