//! Cloudflare Stream provider
//!
//! Videos are posted as a multipart `file` to `/accounts/{id}/stream`; the
//! returned uid addresses the asset for status polling and deletion.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::provider::CloudProvider;
use crate::cloud::types::{content_type_for, CloudAsset, CloudProviderKind, ProviderStatus};
use crate::config::CloudflareConfig;
use crate::session::UploadMetadata;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const DELIVERY_BASE: &str = "https://videodelivery.net";

pub struct CloudflareStream {
    client: reqwest::Client,
    account_id: String,
    api_token: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamVideo {
    uid: String,
    thumbnail: Option<String>,
    #[serde(default)]
    ready_to_stream: bool,
    duration: Option<f64>,
    playback: Option<Playback>,
    status: Option<StreamState>,
    preview: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Playback {
    hls: Option<String>,
    dash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamState {
    state: Option<String>,
    pct_complete: Option<String>,
    error_reason_text: Option<String>,
}

impl CloudflareStream {
    pub fn new(config: &CloudflareConfig, timeout: Duration) -> CloudResult<Self> {
        if config.account_id.is_empty() || config.api_token.is_empty() {
            return Err(CloudError::Config(
                "Cloudflare account id and API token are required".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn stream_url(&self) -> String {
        format!("{}/accounts/{}/stream", self.api_base, self.account_id)
    }

    fn video_url(&self, uid: &str) -> String {
        format!("{}/{}", self.stream_url(), uid)
    }

    async fn set_video_name(&self, uid: &str, name: &str) -> CloudResult<()> {
        let response = self
            .client
            .post(self.video_url(uid))
            .bearer_auth(&self.api_token)
            .json(&json!({ "meta": { "name": name } }))
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn expect_success(response: reqwest::Response) -> CloudResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> CloudResult<T> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_envelope(status, &body)
    }
}

#[async_trait]
impl CloudProvider for CloudflareStream {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::Cloudflare
    }

    async fn upload(&self, file_path: &Path, metadata: &UploadMetadata) -> CloudResult<CloudAsset> {
        let file = File::open(file_path).await?;
        let length = file.metadata().await?.len();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(file_name.clone())
            .mime_str(content_type_for(file_path))?;
        let form = Form::new().part("file", part);

        tracing::info!(file = %file_name, bytes = length, "Uploading to Cloudflare Stream");

        let response = self
            .client
            .post(self.stream_url())
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await?;
        let video: StreamVideo = Self::read_envelope(response).await?;

        // Naming is cosmetic; the asset exists either way
        let name = metadata.title.clone().unwrap_or(file_name);
        if let Err(e) = self.set_video_name(&video.uid, &name).await {
            tracing::warn!(uid = %video.uid, "Failed to set Cloudflare video name: {}", e);
        }

        Ok(asset_from_video(video))
    }

    async fn delete(&self, asset_id: &str) -> CloudResult<()> {
        let response = self
            .client
            .delete(self.video_url(asset_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn status(&self, asset_id: &str) -> CloudResult<ProviderStatus> {
        let response = self
            .client
            .get(self.video_url(asset_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let video: StreamVideo = Self::read_envelope(response).await?;
        Ok(status_from_video(video))
    }
}

fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> CloudResult<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|e| CloudError::Api {
        status,
        message: format!("unexpected response body: {e}"),
    })?;

    if !(200..300).contains(&status) || !envelope.success {
        return Err(CloudError::Api {
            status,
            message: join_errors(&envelope.errors),
        });
    }

    envelope.result.ok_or_else(|| CloudError::Api {
        status,
        message: "response carried no result".into(),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
        .map(|e| join_errors(&e.errors))
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

fn join_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "request was not successful".into();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{code}: {}", e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn known_duration(duration: Option<f64>) -> Option<f64> {
    // -1 while the video is still being processed
    duration.filter(|d| *d >= 0.0)
}

fn asset_from_video(video: StreamVideo) -> CloudAsset {
    let hls = video.playback.as_ref().and_then(|p| p.hls.clone());
    let dash = video.playback.as_ref().and_then(|p| p.dash.clone());
    let streaming_url =
        hls.unwrap_or_else(|| format!("{DELIVERY_BASE}/{}/manifest/video.m3u8", video.uid));
    let thumbnail_url = video.thumbnail.clone().unwrap_or_else(|| {
        format!("{DELIVERY_BASE}/{}/thumbnails/thumbnail.jpg", video.uid)
    });

    CloudAsset {
        streaming_url,
        thumbnail_url: Some(thumbnail_url),
        duration: known_duration(video.duration),
        extra: json!({
            "dashUrl": dash,
            "previewUrl": video.preview,
            "readyToStream": video.ready_to_stream,
            "state": video.status.as_ref().and_then(|s| s.state.clone()),
            "size": video.size,
        }),
        asset_id: video.uid,
    }
}

fn status_from_video(video: StreamVideo) -> ProviderStatus {
    let state = video.status.unwrap_or(StreamState {
        state: None,
        pct_complete: None,
        error_reason_text: None,
    });

    ProviderStatus {
        asset_id: video.uid,
        state: state.state.unwrap_or_else(|| "unknown".to_string()),
        ready_to_stream: video.ready_to_stream,
        pct_complete: state.pct_complete,
        duration: known_duration(video.duration),
        error_reason: state.error_reason_text.filter(|r| !r.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPLOAD_RESPONSE: &str = r#"{
        "success": true,
        "errors": [],
        "messages": [],
        "result": {
            "uid": "ea95132c15732412d22c1476fa83f27a",
            "thumbnail": "https://customer-abc.cloudflarestream.com/ea95/thumbnails/thumbnail.jpg",
            "readyToStream": false,
            "status": { "state": "queued", "pctComplete": "0.000000", "errorReasonText": "" },
            "duration": -1,
            "size": 4190963,
            "preview": "https://customer-abc.cloudflarestream.com/ea95/watch",
            "playback": {
                "hls": "https://customer-abc.cloudflarestream.com/ea95/manifest/video.m3u8",
                "dash": "https://customer-abc.cloudflarestream.com/ea95/manifest/video.mpd"
            }
        }
    }"#;

    #[test]
    fn test_parse_upload_response() {
        let video: StreamVideo = parse_envelope(200, UPLOAD_RESPONSE).unwrap();
        let asset = asset_from_video(video);

        assert_eq!(asset.asset_id, "ea95132c15732412d22c1476fa83f27a");
        assert!(asset.streaming_url.ends_with("/manifest/video.m3u8"));
        assert!(asset.thumbnail_url.unwrap().contains("customer-abc"));
        assert_eq!(asset.duration, None);
        assert_eq!(asset.extra["state"], "queued");
    }

    #[test]
    fn test_fallback_urls_without_playback() {
        let body = r#"{"success":true,"errors":[],"result":{"uid":"abc123","duration":42.5}}"#;
        let video: StreamVideo = parse_envelope(200, body).unwrap();
        let asset = asset_from_video(video);

        assert_eq!(
            asset.streaming_url,
            "https://videodelivery.net/abc123/manifest/video.m3u8"
        );
        assert_eq!(
            asset.thumbnail_url.as_deref(),
            Some("https://videodelivery.net/abc123/thumbnails/thumbnail.jpg")
        );
        assert_eq!(asset.duration, Some(42.5));
    }

    #[test]
    fn test_api_error_is_reported() {
        let body = r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}],"result":null}"#;
        let err = parse_envelope::<StreamVideo>(403, body).unwrap_err();

        match err {
            CloudError::Api { status, message } => {
                assert_eq!(status, 403);
                assert!(message.contains("Authentication error"));
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
        assert!(!CloudError::Api { status: 403, message: String::new() }.is_retryable());
    }

    #[test]
    fn test_garbage_body() {
        let err = parse_envelope::<StreamVideo>(502, "<html>bad gateway</html>").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_from_video() {
        let body = r#"{"success":true,"errors":[],"result":{"uid":"u1","readyToStream":true,"duration":600.0,"status":{"state":"ready","pctComplete":"100.000000","errorReasonText":""}}}"#;
        let video: StreamVideo = parse_envelope(200, body).unwrap();
        let status = status_from_video(video);

        assert_eq!(status.state, "ready");
        assert!(status.ready_to_stream);
        assert_eq!(status.duration, Some(600.0));
        assert_eq!(status.error_reason, None);
    }

    /// Stream API stand-in: uploads succeed, renames are rejected
    async fn spawn_stream_api() -> String {
        use axum::http::StatusCode;
        use axum::routing::post;

        let app = axum::Router::new()
            .route(
                "/accounts/acc-1/stream",
                post(|_body: axum::body::Bytes| async { UPLOAD_RESPONSE }),
            )
            .route(
                "/accounts/acc-1/stream/:uid",
                post(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        r#"{"success":false,"errors":[{"code":10005,"message":"Video not found"}],"result":null}"#,
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_provider(api_base: String) -> CloudflareStream {
        let config = CloudflareConfig {
            account_id: "acc-1".into(),
            api_token: "token".into(),
            api_base,
        };
        CloudflareStream::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_rejected_rename_is_an_error() {
        let provider = test_provider(spawn_stream_api().await);

        let err = provider.set_video_name("missing", "Week 1").await.unwrap_err();
        match err {
            CloudError::Api { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("Video not found"));
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_survives_rejected_rename() {
        let provider = test_provider(spawn_stream_api().await);
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("lecture.mp4");
        tokio::fs::write(&path, b"not really a video").await.unwrap();

        let metadata = UploadMetadata {
            title: Some("Week 1".into()),
            ..Default::default()
        };
        let asset = provider.upload(&path, &metadata).await.unwrap();

        assert_eq!(asset.asset_id, "ea95132c15732412d22c1476fa83f27a");
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = CloudflareConfig {
            account_id: String::new(),
            api_token: "t".into(),
            api_base: "https://api.cloudflare.com/client/v4".into(),
        };
        assert!(matches!(
            CloudflareStream::new(&config, Duration::from_secs(5)),
            Err(CloudError::Config(_))
        ));
    }
}
