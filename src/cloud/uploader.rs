use crate::cloud::cloudflare::CloudflareStream;
use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::provider::CloudProvider;
use crate::cloud::s3::S3Storage;
use crate::cloud::types::{CloudAsset, CloudProviderKind, ProviderStatus};
use crate::config::{CloudConfig, RetryConfig};
use crate::metrics;
use crate::session::UploadMetadata;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::path::Path;
use std::sync::Arc;

/// The configured provider plus the retry policy applied to uploads
#[derive(Clone)]
pub struct CloudUploader {
    provider: Arc<dyn CloudProvider>,
    retry: RetryConfig,
}

impl CloudUploader {
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    /// Build the provider named by the configuration. `local` yields no uploader.
    pub fn from_config(config: &CloudConfig) -> CloudResult<Option<Self>> {
        let provider: Arc<dyn CloudProvider> = match config.provider {
            CloudProviderKind::Local => return Ok(None),
            CloudProviderKind::Cloudflare => {
                let cf = config.cloudflare.as_ref().ok_or_else(|| {
                    CloudError::Config("Cloudflare selected but not configured".into())
                })?;
                Arc::new(CloudflareStream::new(cf, config.request_timeout)?)
            }
            CloudProviderKind::S3 => {
                let s3 = config
                    .s3
                    .as_ref()
                    .ok_or_else(|| CloudError::Config("S3 selected but not configured".into()))?;
                Arc::new(S3Storage::new(s3, config.request_timeout)?)
            }
        };

        Ok(Some(Self::new(provider, config.retry.clone())))
    }

    pub fn kind(&self) -> CloudProviderKind {
        self.provider.kind()
    }

    /// Upload with exponential backoff.
    ///
    /// Gives up after `max_attempts`, once `max_elapsed` has passed, or on the first
    /// error that cannot succeed on retry.
    pub async fn upload(&self, file_path: &Path, metadata: &UploadMetadata) -> CloudResult<CloudAsset> {
        let mut backoff = ExponentialBackoff {
            current_interval: self.retry.initial_interval,
            initial_interval: self.retry.initial_interval,
            max_interval: self.retry.max_interval,
            max_elapsed_time: Some(self.retry.max_elapsed),
            ..Default::default()
        };
        let max_attempts = self.retry.max_attempts.max(1);
        let kind = self.kind();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.provider.upload(file_path, metadata).await {
                Ok(asset) => {
                    if attempt > 1 {
                        tracing::info!(provider = %kind, attempt, "Cloud upload succeeded after retry");
                    }
                    return Ok(asset);
                }
                Err(e) => {
                    let give_up = |e: CloudError| {
                        if attempt == 1 {
                            e
                        } else {
                            CloudError::Exhausted {
                                attempts: attempt,
                                source: Box::new(e),
                            }
                        }
                    };

                    if attempt >= max_attempts || !e.is_retryable() {
                        return Err(give_up(e));
                    }

                    match backoff.next_backoff() {
                        Some(delay) => {
                            tracing::warn!(
                                provider = %kind,
                                attempt,
                                max_attempts,
                                "Cloud upload failed, retrying in {:?}: {}",
                                delay,
                                e
                            );
                            metrics::record_cloud_retry(kind.as_str());
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(give_up(e)),
                    }
                }
            }
        }
    }

    /// Delete without retrying; failures are only logged
    pub async fn delete_best_effort(&self, asset_id: &str) -> bool {
        match self.provider.delete(asset_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(provider = %self.kind(), asset_id, "Failed to delete cloud asset: {}", e);
                false
            }
        }
    }

    pub async fn status(&self, asset_id: &str) -> CloudResult<ProviderStatus> {
        self.provider.status(asset_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` uploads with the given status
    struct FlakyProvider {
        failures: Mutex<u32>,
        status: u16,
        calls: Mutex<u32>,
    }

    impl FlakyProvider {
        fn new(failures: u32, status: u16) -> Self {
            Self {
                failures: Mutex::new(failures),
                status,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CloudProvider for FlakyProvider {
        fn kind(&self) -> CloudProviderKind {
            CloudProviderKind::S3
        }

        async fn upload(&self, _: &Path, _: &UploadMetadata) -> CloudResult<CloudAsset> {
            *self.calls.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CloudError::Api {
                    status: self.status,
                    message: "boom".into(),
                });
            }
            Ok(CloudAsset {
                asset_id: "videos/x.mp4".into(),
                streaming_url: "https://cdn/videos/x.mp4".into(),
                thumbnail_url: None,
                duration: None,
                extra: serde_json::Value::Null,
            })
        }

        async fn delete(&self, _: &str) -> CloudResult<()> {
            Err(CloudError::S3("gone".into()))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let provider = Arc::new(FlakyProvider::new(2, 503));
        let uploader = CloudUploader::new(provider.clone(), fast_retry(3));

        let asset = uploader
            .upload(Path::new("x.mp4"), &UploadMetadata::default())
            .await
            .unwrap();

        assert_eq!(asset.asset_id, "videos/x.mp4");
        assert_eq!(*provider.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let provider = Arc::new(FlakyProvider::new(10, 500));
        let uploader = CloudUploader::new(provider.clone(), fast_retry(3));

        let err = uploader
            .upload(Path::new("x.mp4"), &UploadMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Exhausted { attempts: 3, .. }));
        assert_eq!(*provider.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let provider = Arc::new(FlakyProvider::new(10, 401));
        let uploader = CloudUploader::new(provider.clone(), fast_retry(5));

        let err = uploader
            .upload(Path::new("x.mp4"), &UploadMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Api { status: 401, .. }));
        assert_eq!(*provider.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_delete_best_effort_swallows_errors() {
        let uploader = CloudUploader::new(Arc::new(FlakyProvider::new(0, 500)), fast_retry(1));
        assert!(!uploader.delete_best_effort("videos/x.mp4").await);
    }

    #[tokio::test]
    async fn test_status_unsupported_by_default() {
        let uploader = CloudUploader::new(Arc::new(FlakyProvider::new(0, 500)), fast_retry(1));
        assert!(matches!(
            uploader.status("videos/x.mp4").await,
            Err(CloudError::Unsupported(_))
        ));
    }

    #[test]
    fn test_from_config_local_is_none() {
        let config = crate::config::AppConfig::local("/tmp/cs").cloud;
        assert!(CloudUploader::from_config(&config).unwrap().is_none());
    }
}
