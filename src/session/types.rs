use crate::session::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initialized,
    Receiving,
    Merging,
    Uploading,
    Cancelled,
}

impl SessionStatus {
    /// Statuses in which chunks may still arrive and finalize or cancel may claim the session
    pub const OPEN: [SessionStatus; 2] = [SessionStatus::Initialized, SessionStatus::Receiving];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::Receiving => "receiving",
            SessionStatus::Merging => "merging",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (*self, next),
            (Initialized, Receiving)
                | (Receiving, Receiving)
                | (Initialized | Receiving, Merging)
                | (Initialized | Receiving, Cancelled)
                // A failed merge hands the session back to the client
                | (Merging, Receiving)
                | (Merging, Uploading)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(SessionStatus::Initialized),
            "receiving" => Ok(SessionStatus::Receiving),
            "merging" => Ok(SessionStatus::Merging),
            "uploading" => Ok(SessionStatus::Uploading),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(SessionError::SerializationError(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Client-supplied fields carried through to the content record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: BTreeSet<u32>,
    pub metadata: UploadMetadata,
    pub status: SessionStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

impl UploadSession {
    pub fn new(
        upload_id: String,
        user_id: String,
        file_name: String,
        file_size: u64,
        total_chunks: u32,
        metadata: UploadMetadata,
        ttl: Duration,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            upload_id,
            user_id,
            file_name,
            file_size,
            total_chunks,
            uploaded_chunks: BTreeSet::new(),
            metadata,
            status: SessionStatus::Initialized,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl.as_secs() as i64,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.uploaded_chunks.len() as u32, self.total_chunks)
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks.len() == self.total_chunks as usize
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|n| !self.uploaded_chunks.contains(n))
            .collect()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Lower-cased extension of the declared file name, e.g. `mp4`
    pub fn format(&self) -> String {
        file_format(&self.file_name)
    }
}

pub fn progress_percent(uploaded: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    uploaded as f64 / total as f64 * 100.0
}

pub fn file_format(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub upload_id: String,
    pub file_name: String,
    pub progress: f64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub received_indices: Vec<u32>,
    pub status: SessionStatus,
    pub expires_at: i64,
}

impl SessionProgress {
    pub fn from_session(session: &UploadSession) -> Self {
        Self {
            upload_id: session.upload_id.clone(),
            file_name: session.file_name.clone(),
            progress: session.progress_percent(),
            uploaded_chunks: session.uploaded_chunks.len() as u32,
            total_chunks: session.total_chunks,
            received_indices: session.uploaded_chunks.iter().copied().collect(),
            status: session.status,
            expires_at: session.expires_at,
        }
    }
}
