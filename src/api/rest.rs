use crate::api::caller::CallerId;
use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::chunk::ChunkProgress;
use crate::cloud::ProviderStatus;
use crate::config::StorageConfig;
use crate::content::{ContentFilter, RecordedContent};
use crate::session::{SessionProgress, UploadMetadata};
use crate::upload::{FinalizeOutcome, InitializeUpload, InitializedUpload, SimpleUpload, UploadService};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Room for multipart boundaries and the text fields around a file part
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub struct RestApi {
    service: Arc<UploadService>,
    videos_dir: PathBuf,
    max_chunk_bytes: usize,
    max_simple_upload_bytes: usize,
}

impl RestApi {
    pub fn new(service: UploadService, storage: &StorageConfig) -> Self {
        Self {
            service: Arc::new(service),
            videos_dir: storage.videos_dir(),
            max_chunk_bytes: storage.max_chunk_bytes,
            max_simple_upload_bytes: storage.max_simple_upload_bytes,
        }
    }

    pub fn router(&self) -> Router {
        let chunk_limit = self.max_chunk_bytes + MULTIPART_OVERHEAD;
        let simple_limit = self.max_simple_upload_bytes + MULTIPART_OVERHEAD;

        Router::new()
            .route("/health", get(health_check))
            // Chunked upload
            .route("/upload/chunked/initialize", post(initialize_upload))
            .route(
                "/upload/chunked/chunk",
                post(upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
            )
            .route("/upload/chunked/complete", post(complete_upload))
            .route("/upload/chunked/progress/:upload_id", get(get_progress))
            .route("/upload/chunked/cancel/:upload_id", delete(cancel_upload))
            // Single-request upload
            .route(
                "/upload/simple",
                post(simple_upload).layer(DefaultBodyLimit::max(simple_limit)),
            )
            // Recorded content
            .route("/upload/content", get(list_content))
            .route("/upload/content/:id", get(get_content).delete(delete_content))
            .route("/upload/content/:id/retry", post(retry_upload))
            .route("/upload/content/:id/provider-status", get(provider_status))
            // Local fallback copies
            .nest_service("/uploads/videos", ServeDir::new(&self.videos_dir))
            .with_state(self.service.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn initialize_upload(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    Json(req): Json<InitializeUpload>,
) -> ApiResult<(StatusCode, Json<InitializedUpload>)> {
    let initialized = service.initialize(req, &user_id).await?;
    Ok((StatusCode::CREATED, Json(initialized)))
}

async fn upload_chunk(
    State(service): State<Arc<UploadService>>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkProgress>> {
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<u32> = None;
    let mut chunk: Option<Bytes> = None;
    let mut checksum: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "uploadId" => upload_id = Some(field.text().await?),
            "chunkIndex" => {
                let raw = field.text().await?;
                chunk_index = Some(raw.trim().parse().map_err(|e| {
                    ApiError::InvalidRequest(format!("Invalid chunkIndex '{raw}': {e}"))
                })?);
            }
            "chunk" => chunk = Some(field.bytes().await?),
            "checksum" => {
                let value = field.text().await?;
                checksum = Some(value).filter(|v| !v.trim().is_empty());
            }
            _ => {}
        }
    }

    let upload_id =
        upload_id.ok_or_else(|| ApiError::InvalidRequest("uploadId is required".to_string()))?;
    let chunk_index =
        chunk_index.ok_or_else(|| ApiError::InvalidRequest("chunkIndex is required".to_string()))?;
    let chunk = chunk.ok_or_else(|| ApiError::InvalidRequest("chunk is required".to_string()))?;

    let progress = service
        .upload_chunk(&upload_id, chunk_index, &chunk, checksum.as_deref())
        .await?;
    Ok(Json(progress))
}

async fn complete_upload(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    Json(req): Json<CompleteUploadRequest>,
) -> ApiResult<Json<FinalizeOutcome>> {
    let outcome = service.complete(&req.upload_id, &user_id).await?;
    Ok(Json(outcome))
}

async fn get_progress(
    State(service): State<Arc<UploadService>>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<SessionProgress>> {
    Ok(Json(service.progress(&upload_id).await?))
}

async fn cancel_upload(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    service.cancel(&upload_id, &user_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn simple_upload(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    mut multipart: Multipart,
) -> ApiResult<Json<FinalizeOutcome>> {
    let mut file: Option<(String, Bytes)> = None;
    let mut metadata = UploadMetadata::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .ok_or_else(|| ApiError::InvalidRequest("No filename provided".to_string()))?
                    .to_string();
                file = Some((file_name, field.bytes().await?));
            }
            "title" => metadata.title = Some(field.text().await?),
            "description" => metadata.description = Some(field.text().await?),
            "courseId" => metadata.course_id = Some(field.text().await?),
            "batchId" => metadata.batch_id = Some(field.text().await?),
            "" => {}
            _ => {
                let value = field.text().await?;
                metadata.extra.insert(name.clone(), serde_json::Value::String(value));
            }
        }
    }

    let (file_name, data) =
        file.ok_or_else(|| ApiError::InvalidRequest("No file uploaded".to_string()))?;

    let outcome = service
        .simple_upload(
            SimpleUpload {
                file_name,
                data,
                metadata,
            },
            &user_id,
        )
        .await?;
    Ok(Json(outcome))
}

async fn list_content(
    State(service): State<Arc<UploadService>>,
    Query(filter): Query<ContentFilter>,
) -> ApiResult<Json<ListResponse<RecordedContent>>> {
    let data = service.list_content(&filter).await?;
    let count = data.len();
    Ok(Json(ListResponse { data, count }))
}

async fn get_content(
    State(service): State<Arc<UploadService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RecordedContent>> {
    Ok(Json(service.get_content(&id).await?))
}

async fn delete_content(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    service.delete_content(&id, &user_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn retry_upload(
    State(service): State<Arc<UploadService>>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<DataResponse<RecordedContent>>)> {
    let data = service.retry_cloud(&id, &user_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data })))
}

async fn provider_status(
    State(service): State<Arc<UploadService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProviderStatus>> {
    Ok(Json(service.provider_status(&id).await?))
}
