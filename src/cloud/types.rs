use crate::cloud::error::CloudError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderKind {
    Cloudflare,
    S3,
    /// No cloud storage; merged files stay on local disk
    Local,
}

impl CloudProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProviderKind::Cloudflare => "cloudflare",
            CloudProviderKind::S3 => "s3",
            CloudProviderKind::Local => "local",
        }
    }
}

impl fmt::Display for CloudProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProviderKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(CloudProviderKind::Cloudflare),
            "s3" => Ok(CloudProviderKind::S3),
            "local" | "" => Ok(CloudProviderKind::Local),
            other => Err(CloudError::Config(format!(
                "unknown cloud provider '{other}' (expected cloudflare | s3 | local)"
            ))),
        }
    }
}

/// Where an uploaded file ended up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudAsset {
    /// Cloudflare video uid or S3 object key
    pub asset_id: String,
    pub streaming_url: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
    /// Provider-specific fields kept in the content record's metadata
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub asset_id: String,
    pub state: String,
    pub ready_to_stream: bool,
    pub pct_complete: Option<String>,
    pub duration: Option<f64>,
    pub error_reason: Option<String>,
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mpeg" | "mpg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Cloudflare".parse::<CloudProviderKind>().unwrap(), CloudProviderKind::Cloudflare);
        assert_eq!("s3".parse::<CloudProviderKind>().unwrap(), CloudProviderKind::S3);
        assert_eq!("local".parse::<CloudProviderKind>().unwrap(), CloudProviderKind::Local);
        assert!("gcs".parse::<CloudProviderKind>().is_err());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for(Path::new("a/lecture.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("clip.mov")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }
}
