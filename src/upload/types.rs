use crate::content::RecordedContent;
use crate::session::UploadMetadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUpload {
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedUpload {
    pub upload_id: String,
    pub total_chunks: u32,
    pub expires_at: i64,
}

/// A whole file received in one request
#[derive(Debug, Clone)]
pub struct SimpleUpload {
    pub file_name: String,
    pub data: Bytes,
    pub metadata: UploadMetadata,
}

/// The recorded content, plus a warning when the cloud copy could not be made
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub data: RecordedContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl FinalizeOutcome {
    pub fn ok(data: RecordedContent) -> Self {
        Self {
            data,
            warning: None,
        }
    }
}
