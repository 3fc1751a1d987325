use crate::chunk::{self, checksum_hex, ChunkError, ChunkMerger, ChunkProgress, ChunkReceiver, MergedFile};
use crate::cloud::{CloudError, CloudProviderKind, CloudUploader, ProviderStatus};
use crate::config::{AppConfig, FinalizeMode};
use crate::content::{ContentFilter, ContentStatus, ContentStore, RecordedContent};
use crate::metrics::{self, FinalizeMetrics};
use crate::session::types::progress_percent;
use crate::session::{
    ChunkRecord, SessionError, SessionProgress, SessionStatus, SessionStore, UploadMetadata,
    UploadSession,
};
use crate::upload::error::{UploadError, UploadResult};
use crate::upload::types::{
    FinalizeOutcome, InitializeUpload, InitializedUpload, SimpleUpload,
};
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Entry point for every upload operation exposed over HTTP
#[derive(Clone)]
pub struct UploadService {
    sessions: SessionStore,
    contents: ContentStore,
    receiver: ChunkReceiver,
    cloud: Option<CloudUploader>,
    videos_dir: PathBuf,
    session_ttl: Duration,
    claim_stale_after: Duration,
    max_chunk_bytes: usize,
    max_simple_upload_bytes: usize,
    finalize_mode: FinalizeMode,
    /// Content ids with a background cloud upload running
    in_flight: Arc<DashSet<String>>,
    /// Upload ids this process is merging or uploading
    finalizing: Arc<DashSet<String>>,
}

/// Holds an upload id in the finalizing set until dropped
struct FinalizingGuard {
    uploads: Arc<DashSet<String>>,
    upload_id: String,
}

impl FinalizingGuard {
    fn hold(uploads: &Arc<DashSet<String>>, upload_id: &str) -> Self {
        uploads.insert(upload_id.to_string());
        Self {
            uploads: uploads.clone(),
            upload_id: upload_id.to_string(),
        }
    }
}

impl Drop for FinalizingGuard {
    fn drop(&mut self) {
        self.uploads.remove(&self.upload_id);
    }
}

/// A file on local disk about to become a content record
struct PendingFile {
    content_id: String,
    owner: String,
    original_name: String,
    stored_name: String,
    path: PathBuf,
    declared_size: u64,
    checksum: String,
    metadata: UploadMetadata,
    upload_id: Option<String>,
}

impl UploadService {
    pub fn new(
        config: &AppConfig,
        sessions: SessionStore,
        contents: ContentStore,
        cloud: Option<CloudUploader>,
    ) -> Self {
        Self {
            sessions,
            contents,
            receiver: ChunkReceiver::new(config.storage.chunks_dir()),
            cloud,
            videos_dir: config.storage.videos_dir(),
            session_ttl: config.sessions.ttl,
            claim_stale_after: config.sessions.claim_stale_after,
            max_chunk_bytes: config.storage.max_chunk_bytes,
            max_simple_upload_bytes: config.storage.max_simple_upload_bytes,
            finalize_mode: config.finalize_mode,
            in_flight: Arc::new(DashSet::new()),
            finalizing: Arc::new(DashSet::new()),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn contents(&self) -> &ContentStore {
        &self.contents
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.receiver
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    pub fn cloud_kind(&self) -> CloudProviderKind {
        self.cloud
            .as_ref()
            .map(|c| c.kind())
            .unwrap_or(CloudProviderKind::Local)
    }

    /// Number of background cloud uploads still running
    pub fn background_uploads(&self) -> usize {
        self.in_flight.len()
    }

    // ============== Chunked upload ==============

    pub async fn initialize(
        &self,
        request: InitializeUpload,
        user_id: &str,
    ) -> UploadResult<InitializedUpload> {
        validate_file_name(&request.file_name)?;
        if request.total_chunks == 0 {
            return Err(UploadError::InvalidState(
                "totalChunks must be at least 1".to_string(),
            ));
        }
        if request.file_size == 0 {
            return Err(UploadError::InvalidState(
                "fileSize must be greater than 0".to_string(),
            ));
        }

        let session = UploadSession::new(
            uuid::Uuid::new_v4().to_string(),
            user_id.to_string(),
            request.file_name,
            request.file_size,
            request.total_chunks,
            request.metadata,
            self.session_ttl,
        );
        self.sessions.insert(&session).await?;
        metrics::record_session_initialized(session.total_chunks);

        tracing::info!(
            upload_id = %session.upload_id,
            user_id,
            file_name = %session.file_name,
            file_size = session.file_size,
            total_chunks = session.total_chunks,
            "Upload session initialized"
        );

        Ok(InitializedUpload {
            upload_id: session.upload_id,
            total_chunks: session.total_chunks,
            expires_at: session.expires_at,
        })
    }

    /// Store one chunk and add its index to the session's set
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: &[u8],
        checksum: Option<&str>,
    ) -> UploadResult<ChunkProgress> {
        let session = self.sessions.get(upload_id).await?;

        if !session.status.is_open() {
            return Err(UploadError::InvalidState(format!(
                "Upload {upload_id} no longer accepts chunks (status: {})",
                session.status
            )));
        }
        if chunk_index >= session.total_chunks {
            return Err(UploadError::InvalidState(format!(
                "Chunk index {chunk_index} is out of range for {} chunks",
                session.total_chunks
            )));
        }
        if data.len() > self.max_chunk_bytes {
            return Err(UploadError::TooLarge(format!(
                "Chunk exceeds the {} byte limit",
                self.max_chunk_bytes
            )));
        }

        let stored = self
            .receiver
            .write_chunk(upload_id, chunk_index, data, checksum)
            .await?;

        let uploaded = match self
            .sessions
            .record_chunk(
                upload_id,
                chunk_index,
                stored.size,
                &stored.checksum,
                self.session_ttl,
            )
            .await
        {
            Ok(uploaded) => uploaded,
            Err(e) => {
                // Finalized, cancelled or swept while the chunk was being written
                if matches!(e, SessionError::NotFound(_) | SessionError::InvalidState(_)) {
                    self.discard_orphaned_chunks(upload_id).await;
                }
                return Err(e.into());
            }
        };

        metrics::record_chunk_received(stored.size);
        tracing::debug!(upload_id, chunk_index, uploaded, total = session.total_chunks, "Chunk received");

        Ok(ChunkProgress {
            upload_id: upload_id.to_string(),
            chunk_index,
            progress: progress_percent(uploaded, session.total_chunks),
            uploaded_chunks: uploaded,
            total_chunks: session.total_chunks,
        })
    }

    pub async fn progress(&self, upload_id: &str) -> UploadResult<SessionProgress> {
        let session = self.sessions.get(upload_id).await?;
        Ok(SessionProgress::from_session(&session))
    }

    /// Merge the chunks, store the file and write the content record.
    ///
    /// A failed cloud upload still succeeds, with the file kept locally and a warning.
    pub async fn complete(&self, upload_id: &str, user_id: &str) -> UploadResult<FinalizeOutcome> {
        let session = self.sessions.get(upload_id).await?;

        if !session.is_owned_by(user_id) {
            return Err(UploadError::Forbidden(format!(
                "Upload {upload_id} belongs to another user"
            )));
        }
        if !session.is_complete() {
            return Err(UploadError::InvalidState(format!(
                "Missing chunks: {} of {} uploaded",
                session.uploaded_chunks.len(),
                session.total_chunks
            )));
        }
        if !self
            .sessions
            .claim(upload_id, &SessionStatus::OPEN, SessionStatus::Merging)
            .await?
        {
            return Err(self.claim_failure(upload_id).await);
        }
        let _finalizing = FinalizingGuard::hold(&self.finalizing, upload_id);

        tracing::info!(upload_id, total_chunks = session.total_chunks, "Merging chunks");

        let stored_name = stored_file_name(upload_id, &session.file_name);
        let output = self.videos_dir.join(&stored_name);
        let merged = self.merge_claimed(&session, &output).await?;

        if let Err(e) = self.receiver.remove_session_dir(upload_id).await {
            tracing::warn!(upload_id, "Failed to remove chunk directory: {}", e);
        }
        if merged.size != session.file_size {
            tracing::warn!(
                upload_id,
                declared = session.file_size,
                merged = merged.size,
                "Merged size differs from declared file size"
            );
        }

        if let Err(e) = self
            .sessions
            .update_status(upload_id, SessionStatus::Uploading)
            .await
        {
            tracing::warn!(upload_id, "Failed to mark session uploading: {}", e);
        }

        let outcome = self
            .finalize(PendingFile {
                content_id: uuid::Uuid::new_v4().to_string(),
                owner: session.user_id.clone(),
                original_name: session.file_name.clone(),
                stored_name,
                path: merged.path,
                declared_size: session.file_size,
                checksum: merged.checksum,
                metadata: session.metadata.clone(),
                upload_id: Some(upload_id.to_string()),
            })
            .await;

        if let Err(e) = self.sessions.delete(upload_id).await {
            tracing::warn!(upload_id, "Failed to delete finalized session: {}", e);
        }

        outcome
    }

    pub async fn cancel(&self, upload_id: &str, user_id: &str) -> UploadResult<()> {
        let session = self.sessions.get(upload_id).await?;

        if !session.is_owned_by(user_id) {
            return Err(UploadError::Forbidden(format!(
                "Upload {upload_id} belongs to another user"
            )));
        }
        if !self
            .sessions
            .claim(upload_id, &SessionStatus::OPEN, SessionStatus::Cancelled)
            .await?
        {
            return Err(self.claim_failure(upload_id).await);
        }

        if let Err(e) = self.receiver.remove_session_dir(upload_id).await {
            tracing::warn!(upload_id, "Failed to remove chunk directory: {}", e);
        }
        self.sessions.delete(upload_id).await?;
        metrics::record_session_cancelled();

        tracing::info!(upload_id, "Upload cancelled");
        Ok(())
    }

    /// Remove abandoned sessions and their chunk files.
    ///
    /// Claims left behind by a dead process are recovered first, so a reopened
    /// session that is also past its expiry goes in the same pass.
    pub async fn sweep_expired(&self) -> UploadResult<usize> {
        let now = chrono::Utc::now().timestamp();
        let dropped = self.recover_stale_claims(now).await?;
        let removed = self.sessions.cleanup_expired(now).await?;

        for upload_id in &removed {
            if let Err(e) = self.receiver.remove_session_dir(upload_id).await {
                tracing::warn!(upload_id = %upload_id, "Failed to remove chunk directory: {}", e);
            }
        }

        if !removed.is_empty() {
            metrics::record_sessions_expired(removed.len());
            tracing::info!(count = removed.len(), "Removed expired upload sessions");
        }
        Ok(removed.len() + dropped)
    }

    /// Hand back `merging`/`uploading` claims nobody has touched within the stale bound.
    ///
    /// A merging session still has its chunks and reopens as `receiving` for another
    /// `complete`. An uploading session has already lost its chunks and is dropped.
    /// Ids this process is finalizing are never touched.
    async fn recover_stale_claims(&self, now: i64) -> UploadResult<usize> {
        let cutoff = now.saturating_sub(self.claim_stale_after.as_secs() as i64);
        let mut dropped = 0;

        for (upload_id, status) in self.sessions.stale_claims(cutoff).await? {
            if self.finalizing.contains(&upload_id) {
                continue;
            }

            match status {
                SessionStatus::Merging => {
                    let expires_at = now.saturating_add(self.session_ttl.as_secs() as i64);
                    if self
                        .sessions
                        .reset_stale_claim(
                            &upload_id,
                            SessionStatus::Merging,
                            SessionStatus::Receiving,
                            cutoff,
                            expires_at,
                        )
                        .await?
                    {
                        tracing::warn!(upload_id = %upload_id, "Reopened session left merging by an interrupted finalize");
                    }
                }
                SessionStatus::Uploading => {
                    if self
                        .sessions
                        .reset_stale_claim(
                            &upload_id,
                            SessionStatus::Uploading,
                            SessionStatus::Cancelled,
                            cutoff,
                            now,
                        )
                        .await?
                    {
                        if let Err(e) = self.receiver.remove_session_dir(&upload_id).await {
                            tracing::warn!(upload_id = %upload_id, "Failed to remove chunk directory: {}", e);
                        }
                        self.sessions.delete(&upload_id).await?;
                        dropped += 1;
                        tracing::warn!(upload_id = %upload_id, "Dropped session left uploading by an interrupted finalize");
                    }
                }
                _ => {}
            }
        }

        Ok(dropped)
    }

    // ============== Simple upload ==============

    pub async fn simple_upload(
        &self,
        upload: SimpleUpload,
        user_id: &str,
    ) -> UploadResult<FinalizeOutcome> {
        validate_file_name(&upload.file_name)?;
        if upload.data.is_empty() {
            return Err(UploadError::InvalidState("Uploaded file is empty".to_string()));
        }
        if upload.data.len() > self.max_simple_upload_bytes {
            return Err(UploadError::TooLarge(format!(
                "File exceeds the {} byte limit",
                self.max_simple_upload_bytes
            )));
        }

        let content_id = uuid::Uuid::new_v4().to_string();
        let stored_name = stored_file_name(&content_id, &upload.file_name);
        let path = self.videos_dir.join(&stored_name);

        fs::create_dir_all(&self.videos_dir).await?;
        fs::write(&path, &upload.data).await?;

        tracing::info!(content_id = %content_id, user_id, bytes = upload.data.len(), "Simple upload stored");

        self.finalize(PendingFile {
            content_id,
            owner: user_id.to_string(),
            original_name: upload.file_name,
            stored_name,
            path,
            declared_size: upload.data.len() as u64,
            checksum: checksum_hex(&upload.data),
            metadata: upload.metadata,
            upload_id: None,
        })
        .await
    }

    // ============== Recorded content ==============

    pub async fn get_content(&self, content_id: &str) -> UploadResult<RecordedContent> {
        Ok(self.contents.get(content_id).await?)
    }

    pub async fn list_content(&self, filter: &ContentFilter) -> UploadResult<Vec<RecordedContent>> {
        Ok(self.contents.list(filter).await?)
    }

    /// Delete a record together with its cloud asset or local file
    pub async fn delete_content(&self, content_id: &str, user_id: &str) -> UploadResult<()> {
        let record = self.contents.get(content_id).await?;

        if !record.is_owned_by(user_id) {
            return Err(UploadError::Forbidden(format!(
                "Content {content_id} belongs to another user"
            )));
        }
        if record.status == ContentStatus::Processing || self.in_flight.contains(content_id) {
            return Err(UploadError::InvalidState(format!(
                "Content {content_id} is still being uploaded"
            )));
        }

        if let Some(asset_id) = &record.metadata.provider_asset_id {
            match (&self.cloud, record.metadata.provider) {
                (Some(cloud), Some(provider)) if cloud.kind() == provider => {
                    cloud.delete_best_effort(asset_id).await;
                }
                _ => tracing::warn!(
                    content_id,
                    asset_id = %asset_id,
                    "Provider of the cloud asset is not configured; asset left in place"
                ),
            }
        }
        if let Some(path) = &record.metadata.local_path {
            remove_local_file(Path::new(path)).await;
        }

        self.contents.delete(content_id).await?;
        tracing::info!(content_id, "Content deleted");
        Ok(())
    }

    /// Queue another background cloud upload for content kept locally
    pub async fn retry_cloud(&self, content_id: &str, user_id: &str) -> UploadResult<RecordedContent> {
        let mut record = self.contents.get(content_id).await?;

        if !record.is_owned_by(user_id) {
            return Err(UploadError::Forbidden(format!(
                "Content {content_id} belongs to another user"
            )));
        }
        if record.status != ContentStatus::Local {
            return Err(UploadError::InvalidState(format!(
                "Content {content_id} is {} and cannot be re-uploaded",
                record.status
            )));
        }
        let cloud = self.cloud.clone().ok_or_else(|| {
            UploadError::InvalidState("No cloud provider is configured".to_string())
        })?;
        let path = record
            .metadata
            .local_path
            .clone()
            .map(PathBuf::from)
            .ok_or_else(|| {
                UploadError::InvalidState(format!("Content {content_id} has no local copy"))
            })?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(UploadError::InvalidState(format!(
                "Local copy of content {content_id} is missing"
            )));
        }

        if !self.in_flight.insert(content_id.to_string()) {
            return Err(UploadError::InvalidState(format!(
                "Content {content_id} is already being uploaded"
            )));
        }

        record.mark_processing(cloud.kind());
        if let Err(e) = self.contents.update(&record).await {
            self.in_flight.remove(content_id);
            return Err(e.into());
        }

        tracing::info!(content_id, provider = %cloud.kind(), "Retrying cloud upload");
        self.spawn_cloud_upload(record.id.clone(), path, record.upload_metadata(), cloud);
        Ok(record)
    }

    /// Processing state of the content's asset at the provider
    pub async fn provider_status(&self, content_id: &str) -> UploadResult<ProviderStatus> {
        let record = self.contents.get(content_id).await?;
        let cloud = self.cloud.as_ref().ok_or_else(|| {
            UploadError::InvalidState("No cloud provider is configured".to_string())
        })?;

        let asset_id = match (record.metadata.provider, &record.metadata.provider_asset_id) {
            (Some(provider), Some(asset_id)) if provider == cloud.kind() => asset_id,
            _ => {
                return Err(UploadError::InvalidState(format!(
                    "Content {content_id} is not stored with {}",
                    cloud.kind()
                )))
            }
        };

        cloud.status(asset_id).await.map_err(|e| match e {
            CloudError::Unsupported(msg) => UploadError::InvalidState(msg),
            other => UploadError::Upload(other),
        })
    }

    // ============== Internals ==============

    /// Error for a claim that lost to another finalize or cancel
    async fn claim_failure(&self, upload_id: &str) -> UploadError {
        match self.sessions.status(upload_id).await {
            Ok(None) => SessionError::NotFound(upload_id.to_string()).into(),
            Ok(Some(SessionStatus::Cancelled)) => {
                UploadError::InvalidState(format!("Upload {upload_id} has been cancelled"))
            }
            Ok(Some(_)) => {
                UploadError::InvalidState(format!("Upload {upload_id} is already being finalized"))
            }
            Err(e) => e.into(),
        }
    }

    /// Merge a session already claimed as `merging`.
    ///
    /// Chunks that are missing or corrupt on disk leave the set and the session is
    /// handed back as `receiving`, so the client can re-send them.
    async fn merge_claimed(&self, session: &UploadSession, output: &Path) -> UploadResult<MergedFile> {
        let upload_id = session.upload_id.as_str();

        let records = match self.sessions.chunk_records(upload_id).await {
            Ok(records) => records,
            Err(e) => {
                self.release_claim(upload_id).await;
                return Err(e.into());
            }
        };

        match self
            .merge_chunks(upload_id, session.total_chunks, output, &records)
            .await
        {
            Ok(merged) => Ok(merged),
            Err(ChunkError::MissingChunks(missing)) => {
                tracing::warn!(upload_id, ?missing, "Chunk files missing at merge");
                self.forget_chunks(upload_id, &missing).await;
                self.release_claim(upload_id).await;
                Err(UploadError::InvalidState(format!(
                    "Chunk files missing on disk: {missing:?}; re-send them before completing"
                )))
            }
            Err(ChunkError::ChecksumMismatch { index, .. }) => {
                tracing::warn!(upload_id, index, "Chunk failed checksum verification at merge");
                self.forget_chunks(upload_id, &[index]).await;
                self.release_claim(upload_id).await;
                Err(UploadError::InvalidState(format!(
                    "Chunk {index} failed checksum verification; re-send it before completing"
                )))
            }
            Err(e) => {
                tracing::error!(upload_id, "Merge failed: {}", e);
                self.release_claim(upload_id).await;
                Err(e.into())
            }
        }
    }

    async fn merge_chunks(
        &self,
        upload_id: &str,
        total_chunks: u32,
        output: &Path,
        records: &[ChunkRecord],
    ) -> chunk::Result<MergedFile> {
        let chunk_dir = self.receiver.session_dir(upload_id)?;
        ChunkMerger::merge(&chunk_dir, total_chunks, output, records).await
    }

    /// Drop a chunk directory recreated after its session stopped accepting chunks.
    ///
    /// An open or merging session keeps its directory.
    async fn discard_orphaned_chunks(&self, upload_id: &str) {
        match self.sessions.status(upload_id).await {
            Ok(Some(SessionStatus::Merging)) => {}
            Ok(Some(status)) if status.is_open() => {}
            Ok(_) => {
                if let Err(e) = self.receiver.remove_session_dir(upload_id).await {
                    tracing::warn!(upload_id, "Failed to remove orphaned chunk directory: {}", e);
                }
            }
            Err(e) => tracing::warn!(upload_id, "Failed to check session before chunk cleanup: {}", e),
        }
    }

    async fn forget_chunks(&self, upload_id: &str, indices: &[u32]) {
        if let Err(e) = self.sessions.remove_chunks(upload_id, indices).await {
            tracing::error!(upload_id, "Failed to drop chunk indices: {}", e);
        }
    }

    async fn release_claim(&self, upload_id: &str) {
        match self
            .sessions
            .claim(upload_id, &[SessionStatus::Merging], SessionStatus::Receiving)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(upload_id, "Session was no longer merging on release"),
            Err(e) => tracing::error!(upload_id, "Failed to release merge claim: {}", e),
        }
    }

    /// Hand the file to the cloud provider, falling back to the local copy
    async fn finalize(&self, file: PendingFile) -> UploadResult<FinalizeOutcome> {
        let mut record = RecordedContent::local(
            file.content_id,
            file.owner,
            file.original_name,
            &file.stored_name,
            file.path.to_string_lossy().to_string(),
            file.declared_size,
            &file.metadata,
        );
        record.metadata.upload_id = file.upload_id;
        record.metadata.checksum = Some(file.checksum);

        let Some(cloud) = self.cloud.clone() else {
            let timer = FinalizeMetrics::start(CloudProviderKind::Local.as_str());
            self.contents.create(&record).await?;
            timer.finish("local", record.file_size);
            return Ok(FinalizeOutcome::ok(record));
        };

        let kind = cloud.kind();
        let timer = FinalizeMetrics::start(kind.as_str());

        if self.finalize_mode == FinalizeMode::Background {
            record.mark_processing(kind);
            self.contents.create(&record).await?;
            self.in_flight.insert(record.id.clone());
            self.spawn_cloud_upload(record.id.clone(), file.path, file.metadata, cloud);
            timer.finish("processing", record.file_size);
            return Ok(FinalizeOutcome::ok(record));
        }

        match cloud.upload(&file.path, &file.metadata).await {
            Ok(asset) => {
                let asset_id = asset.asset_id.clone();
                record.mark_uploaded(kind, asset);

                if let Err(e) = self.contents.create(&record).await {
                    tracing::error!(
                        content_id = %record.id,
                        asset_id = %asset_id,
                        "Failed to record uploaded content: {}",
                        e
                    );
                    cloud.delete_best_effort(&asset_id).await;
                    return Err(e.into());
                }

                remove_local_file(&file.path).await;
                timer.finish("cloud", record.file_size);
                tracing::info!(content_id = %record.id, provider = %kind, "Upload stored in the cloud");
                Ok(FinalizeOutcome::ok(record))
            }
            Err(e) => {
                metrics::record_cloud_failure(kind.as_str());
                tracing::warn!(
                    content_id = %record.id,
                    provider = %kind,
                    "Cloud upload failed, keeping local copy: {}",
                    e
                );

                record.mark_cloud_failed(kind, &e.to_string());
                self.contents.create(&record).await?;
                timer.finish("local", record.file_size);

                Ok(FinalizeOutcome {
                    data: record,
                    warning: Some(format!("Video saved locally; cloud upload failed: {e}")),
                })
            }
        }
    }

    /// Run the cloud upload of a recorded file on its own task.
    ///
    /// The caller must already hold the content id in `in_flight`.
    fn spawn_cloud_upload(
        &self,
        content_id: String,
        path: PathBuf,
        metadata: UploadMetadata,
        cloud: CloudUploader,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            service
                .upload_in_background(&content_id, &path, &metadata, &cloud)
                .await;
            service.in_flight.remove(&content_id);
        });
    }

    async fn upload_in_background(
        &self,
        content_id: &str,
        path: &Path,
        metadata: &UploadMetadata,
        cloud: &CloudUploader,
    ) {
        let kind = cloud.kind();
        let timer = FinalizeMetrics::start(kind.as_str());
        let result = cloud.upload(path, metadata).await;

        let mut record = match self.contents.load(content_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(content_id, "Content disappeared during cloud upload");
                if let Ok(asset) = &result {
                    cloud.delete_best_effort(&asset.asset_id).await;
                }
                return;
            }
            Err(e) => {
                tracing::error!(content_id, "Failed to load content after cloud upload: {}", e);
                if let Ok(asset) = &result {
                    cloud.delete_best_effort(&asset.asset_id).await;
                }
                return;
            }
        };

        match result {
            Ok(asset) => {
                let asset_id = asset.asset_id.clone();
                record.mark_uploaded(kind, asset);

                if let Err(e) = self.contents.update(&record).await {
                    tracing::error!(content_id, asset_id = %asset_id, "Failed to record uploaded content: {}", e);
                    cloud.delete_best_effort(&asset_id).await;
                    return;
                }

                remove_local_file(path).await;
                timer.finish("cloud", record.file_size);
                tracing::info!(content_id, provider = %kind, "Background cloud upload finished");
            }
            Err(e) => {
                metrics::record_cloud_failure(kind.as_str());
                tracing::warn!(content_id, provider = %kind, "Background cloud upload failed, keeping local copy: {}", e);

                record.mark_cloud_failed(kind, &e.to_string());
                if let Err(e) = self.contents.update(&record).await {
                    tracing::error!(content_id, "Failed to record cloud failure: {}", e);
                    return;
                }
                timer.finish("local", record.file_size);
            }
        }
    }
}

/// Reject names that are empty or would escape the videos directory
fn validate_file_name(file_name: &str) -> UploadResult<()> {
    let name = file_name.trim();
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(UploadError::InvalidState(format!(
            "Invalid file name '{file_name}'"
        )))
    }
}

/// `<prefix>_<name>` with anything outside `[A-Za-z0-9._-]` replaced, so it is URL-safe
pub fn stored_file_name(prefix: &str, file_name: &str) -> String {
    let cleaned: String = file_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}_{cleaned}")
}

async fn remove_local_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove local file: {}", e),
    }
}
