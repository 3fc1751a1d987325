//! S3-compatible object storage provider.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::provider::CloudProvider;
use crate::cloud::types::{content_type_for, CloudAsset, CloudProviderKind};
use crate::config::S3Config;
use crate::session::UploadMetadata;
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const KEY_PREFIX: &str = "videos";

pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base_url: Option<String>,
    url_expiry: Duration,
}

impl S3Storage {
    pub fn new(config: &S3Config, timeout: Duration) -> CloudResult<Self> {
        if config.bucket.is_empty() {
            return Err(CloudError::Config("S3 bucket is required".into()));
        }
        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(CloudError::Config("S3 access key and secret are required".into()));
        }

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "coursestream-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            url_expiry: config.url_expiry,
        })
    }

    async fn object_url(&self, key: &str) -> CloudResult<String> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{base}/{key}"));
        }

        let presigning = PresigningConfig::expires_in(self.url_expiry)
            .map_err(|e| CloudError::Config(format!("invalid presign expiry: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| CloudError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }
}

/// `videos/<uuid>.<ext>`; the client's file name never reaches the bucket
pub fn object_key(file_path: &Path) -> String {
    let id = uuid::Uuid::new_v4();
    match file_path.extension() {
        Some(ext) => format!(
            "{KEY_PREFIX}/{id}.{}",
            ext.to_string_lossy().to_ascii_lowercase()
        ),
        None => format!("{KEY_PREFIX}/{id}"),
    }
}

#[async_trait]
impl CloudProvider for S3Storage {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::S3
    }

    async fn upload(&self, file_path: &Path, metadata: &UploadMetadata) -> CloudResult<CloudAsset> {
        let key = object_key(file_path);
        let body = ByteStream::from_path(file_path)
            .await
            .map_err(|e| CloudError::S3(format!("failed to read {}: {e}", file_path.display())))?;

        tracing::info!(bucket = %self.bucket, key = %key, "Uploading to S3");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type_for(file_path))
            .body(body);
        if let Some(course_id) = metadata.course_id.as_deref().filter(|c| c.is_ascii()) {
            request = request.metadata("course-id", course_id);
        }

        request
            .send()
            .await
            .map_err(|e| CloudError::S3(DisplayErrorContext(&e).to_string()))?;

        let streaming_url = self.object_url(&key).await?;

        Ok(CloudAsset {
            streaming_url,
            thumbnail_url: None,
            duration: None,
            extra: json!({
                "bucket": self.bucket,
                "key": key,
                "signedUrl": self.public_base_url.is_none(),
            }),
            asset_id: key,
        })
    }

    async fn delete(&self, asset_id: &str) -> CloudResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(asset_id)
            .send()
            .await
            .map_err(|e| CloudError::S3(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
