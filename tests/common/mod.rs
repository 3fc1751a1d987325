#![allow(dead_code)]

use async_trait::async_trait;
use coursestream::cloud::{
    CloudAsset, CloudError, CloudProvider, CloudProviderKind, CloudResult, CloudUploader,
};
use coursestream::config::{AppConfig, FinalizeMode, RetryConfig};
use coursestream::content::ContentStore;
use coursestream::session::{SessionStore, UploadMetadata};
use coursestream::upload::{InitializeUpload, UploadService};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const OWNER: &str = "teacher-1";
pub const OTHER_USER: &str = "teacher-2";

/// Cloud provider whose uploads fail a set number of times before succeeding
pub struct ScriptedProvider {
    failures_left: Mutex<u32>,
    fail_status: u16,
    pub upload_calls: Mutex<u32>,
    pub uploaded: Mutex<Vec<Vec<u8>>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn healthy() -> Arc<Self> {
        Self::failing(0, 503)
    }

    pub fn down() -> Arc<Self> {
        Self::failing(u32::MAX, 503)
    }

    pub fn failing(times: u32, status: u16) -> Arc<Self> {
        Arc::new(Self {
            failures_left: Mutex::new(times),
            fail_status: status,
            upload_calls: Mutex::new(0),
            uploaded: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        })
    }

    pub fn recover(&self) {
        *self.failures_left.lock() = 0;
    }

    pub fn calls(&self) -> u32 {
        *self.upload_calls.lock()
    }
}

#[async_trait]
impl CloudProvider for ScriptedProvider {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::S3
    }

    async fn upload(&self, file_path: &Path, _metadata: &UploadMetadata) -> CloudResult<CloudAsset> {
        *self.upload_calls.lock() += 1;
        {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(CloudError::Api {
                    status: self.fail_status,
                    message: "service unavailable".into(),
                });
            }
        }

        let bytes = tokio::fs::read(file_path).await?;
        let key = format!("videos/{}.mp4", uuid::Uuid::new_v4());
        self.uploaded.lock().push(bytes);

        Ok(CloudAsset {
            streaming_url: format!("https://cdn.example.com/{key}"),
            thumbnail_url: None,
            duration: None,
            extra: serde_json::json!({ "bucket": "lectures", "key": key }),
            asset_id: key,
        })
    }

    async fn delete(&self, asset_id: &str) -> CloudResult<()> {
        self.deleted.lock().push(asset_id.to_string());
        Ok(())
    }
}

pub struct TestEnv {
    pub service: UploadService,
    pub config: AppConfig,
    pub temp: TempDir,
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_elapsed: Duration::from_secs(5),
    }
}

pub async fn env_with(
    provider: Option<Arc<ScriptedProvider>>,
    mode: FinalizeMode,
    tweak: impl FnOnce(&mut AppConfig),
) -> TestEnv {
    let temp = TempDir::new().unwrap();
    let mut config = AppConfig::local(temp.path());
    config.finalize_mode = mode;
    tweak(&mut config);

    let cloud = provider.map(|p| CloudUploader::new(p, fast_retry(3)));
    let service = UploadService::new(
        &config,
        SessionStore::new_in_memory().await.unwrap(),
        ContentStore::new_in_memory().await.unwrap(),
        cloud,
    );

    TestEnv {
        service,
        config,
        temp,
    }
}

pub async fn local_env() -> TestEnv {
    env_with(None, FinalizeMode::Sync, |_| {}).await
}

pub async fn cloud_env(provider: Arc<ScriptedProvider>) -> TestEnv {
    env_with(Some(provider), FinalizeMode::Sync, |_| {}).await
}

pub async fn start_upload(
    service: &UploadService,
    file_name: &str,
    file_size: u64,
    total_chunks: u32,
) -> String {
    service
        .initialize(
            InitializeUpload {
                file_name: file_name.to_string(),
                file_size,
                total_chunks,
                metadata: UploadMetadata {
                    title: Some("Week 1 lecture".to_string()),
                    course_id: Some("course-1".to_string()),
                    batch_id: Some("batch-a".to_string()),
                    ..Default::default()
                },
            },
            OWNER,
        )
        .await
        .unwrap()
        .upload_id
}

/// Send every chunk of `data`, split into `chunk_size` pieces
pub async fn send_all(service: &UploadService, upload_id: &str, data: &[u8], chunk_size: usize) {
    for (index, chunk) in data.chunks(chunk_size).enumerate() {
        service
            .upload_chunk(upload_id, index as u32, chunk, None)
            .await
            .unwrap();
    }
}

pub async fn wait_for_background(service: &UploadService) {
    for _ in 0..500 {
        if service.background_uploads() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background uploads did not finish");
}
