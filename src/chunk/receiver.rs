use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::{ChunkError, Result};
use super::types::{checksum_hex, StoredChunk};

/// Writes incoming chunks to `<root>/<upload_id>/chunk_<index>`.
#[derive(Debug, Clone)]
pub struct ChunkReceiver {
    root: PathBuf,
}

impl ChunkReceiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        ensure_path_safe(upload_id)?;
        Ok(self.root.join(upload_id))
    }

    pub fn chunk_path(&self, upload_id: &str, index: u32) -> Result<PathBuf> {
        Ok(self.session_dir(upload_id)?.join(chunk_file_name(index)))
    }

    /// Store one chunk, replacing any earlier copy of the same index.
    ///
    /// When `expected_checksum` is given it must match the BLAKE3 hex digest of `data`.
    pub async fn write_chunk(
        &self,
        upload_id: &str,
        index: u32,
        data: &[u8],
        expected_checksum: Option<&str>,
    ) -> Result<StoredChunk> {
        if data.is_empty() {
            return Err(ChunkError::InvalidChunk(format!("chunk {index} is empty")));
        }

        let checksum = checksum_hex(data);
        if let Some(expected) = expected_checksum {
            if !expected.trim().eq_ignore_ascii_case(&checksum) {
                return Err(ChunkError::ChecksumMismatch {
                    index,
                    expected: expected.trim().to_ascii_lowercase(),
                    actual: checksum,
                });
            }
        }

        let dir = self.session_dir(upload_id)?;
        fs::create_dir_all(&dir).await?;

        // Write beside the target then rename, so a reader never sees half a chunk
        let final_path = dir.join(chunk_file_name(index));
        let temp_path = dir.join(format!(
            "{}.part-{}",
            chunk_file_name(index),
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&temp_path, data).await?;
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(upload_id, index, size = data.len(), "Stored chunk");

        Ok(StoredChunk {
            index,
            size: data.len() as u64,
            checksum,
        })
    }

    /// Remove the session's chunk directory. Returns whether anything was removed.
    pub async fn remove_session_dir(&self, upload_id: &str) -> Result<bool> {
        let dir = self.session_dir(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn chunk_file_name(index: u32) -> String {
    format!("chunk_{index}")
}

/// Upload ids become directory names; only plain tokens are accepted.
fn ensure_path_safe(upload_id: &str) -> Result<()> {
    let ok = !upload_id.is_empty()
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ChunkError::InvalidChunk(format!(
            "invalid upload id '{upload_id}'"
        )))
    }
}
