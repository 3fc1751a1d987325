use crate::cloud::{CloudAsset, CloudProviderKind};
use crate::content::error::ContentError;
use crate::session::UploadMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URL prefix under which locally stored videos are served
pub const LOCAL_VIDEO_PREFIX: &str = "/uploads/videos";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    /// Cloud upload is running in the background
    Processing,
    Ready,
    /// Only the local copy exists
    Local,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Processing => "processing",
            ContentStatus::Ready => "ready",
            ContentStatus::Local => "local",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ContentStatus::Processing),
            "ready" => Ok(ContentStatus::Ready),
            "local" => Ok(ContentStatus::Local),
            other => Err(ContentError::SerializationError(format!(
                "unknown content status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<CloudProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_asset_id: Option<String>,
    #[serde(default)]
    pub cloud_upload_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub original_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Client fields without a column of their own
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Provider details of the cloud asset (playback variants, bucket, ...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub asset: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedContent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub course_id: Option<String>,
    pub batch_id: Option<String>,
    pub teacher_id: String,
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
    pub file_size: u64,
    pub format: String,
    pub status: ContentStatus,
    pub metadata: ContentMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecordedContent {
    /// A record for a file kept on local disk as `<videos dir>/<stored_name>`
    pub fn local(
        id: String,
        teacher_id: String,
        original_file_name: String,
        stored_name: &str,
        local_path: String,
        file_size: u64,
        metadata: &UploadMetadata,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            title: metadata
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| original_file_name.clone()),
            description: metadata.description.clone(),
            course_id: metadata.course_id.clone(),
            batch_id: metadata.batch_id.clone(),
            teacher_id,
            video_url: local_video_url(stored_name),
            thumbnail_url: None,
            duration: None,
            file_size,
            format: crate::session::types::file_format(&original_file_name),
            status: ContentStatus::Local,
            metadata: ContentMetadata {
                local_path: Some(local_path),
                original_file_name,
                extra: metadata.extra.clone(),
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Point the record at its cloud copy
    pub fn mark_uploaded(&mut self, provider: CloudProviderKind, asset: CloudAsset) {
        self.status = ContentStatus::Ready;
        self.video_url = asset.streaming_url;
        self.thumbnail_url = asset.thumbnail_url;
        self.duration = asset.duration;
        self.metadata.provider = Some(provider);
        self.metadata.provider_asset_id = Some(asset.asset_id);
        self.metadata.cloud_upload_failed = false;
        self.metadata.cloud_error = None;
        self.metadata.local_path = None;
        self.metadata.asset = asset.extra;
        self.touch();
    }

    /// Keep the local copy and flag the failed cloud upload
    pub fn mark_cloud_failed(&mut self, provider: CloudProviderKind, error: &str) {
        self.status = ContentStatus::Local;
        self.metadata.provider = Some(provider);
        self.metadata.cloud_upload_failed = true;
        self.metadata.cloud_error = Some(error.to_string());
        self.touch();
    }

    pub fn mark_processing(&mut self, provider: CloudProviderKind) {
        self.status = ContentStatus::Processing;
        self.metadata.provider = Some(provider);
        self.metadata.cloud_upload_failed = false;
        self.metadata.cloud_error = None;
        self.touch();
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.teacher_id == user_id
    }

    /// Client metadata as handed to a cloud provider
    pub fn upload_metadata(&self) -> UploadMetadata {
        UploadMetadata {
            title: Some(self.title.clone()),
            description: self.description.clone(),
            course_id: self.course_id.clone(),
            batch_id: self.batch_id.clone(),
            extra: self.metadata.extra.clone(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

pub fn local_video_url(stored_name: &str) -> String {
    format!("{LOCAL_VIDEO_PREFIX}/{stored_name}")
}

/// Query filter for listing content; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilter {
    pub course_id: Option<String>,
    pub batch_id: Option<String>,
    pub teacher_id: Option<String>,
}
