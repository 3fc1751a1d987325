use std::path::Path;

use blake3::Hasher;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use super::error::{ChunkError, Result};
use super::receiver::chunk_file_name;
use super::types::MergedFile;
use crate::session::ChunkRecord;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

pub struct ChunkMerger;

impl ChunkMerger {
    /// Concatenate `chunk_0 .. chunk_{total-1}` from `chunk_dir` into `output_path`.
    ///
    /// Every chunk file must exist before anything is written. When `records` carries a
    /// checksum for an index, the bytes read back must match it. A partial output is
    /// removed on failure.
    pub async fn merge(
        chunk_dir: &Path,
        total_chunks: u32,
        output_path: &Path,
        records: &[ChunkRecord],
    ) -> Result<MergedFile> {
        let missing = Self::missing_files(chunk_dir, total_chunks).await;
        if !missing.is_empty() {
            return Err(ChunkError::MissingChunks(missing));
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match Self::concatenate(chunk_dir, total_chunks, output_path, records).await {
            Ok(merged) => Ok(merged),
            Err(e) => {
                let _ = fs::remove_file(output_path).await;
                Err(e)
            }
        }
    }

    /// Indices whose chunk file is absent
    pub async fn missing_files(chunk_dir: &Path, total_chunks: u32) -> Vec<u32> {
        let mut missing = Vec::new();
        for index in 0..total_chunks {
            let exists = fs::try_exists(chunk_dir.join(chunk_file_name(index)))
                .await
                .unwrap_or(false);
            if !exists {
                missing.push(index);
            }
        }
        missing
    }

    async fn concatenate(
        chunk_dir: &Path,
        total_chunks: u32,
        output_path: &Path,
        records: &[ChunkRecord],
    ) -> Result<MergedFile> {
        let mut output = BufWriter::new(File::create(output_path).await?);
        let mut file_hasher = Hasher::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total_size = 0u64;

        for index in 0..total_chunks {
            let mut chunk = File::open(chunk_dir.join(chunk_file_name(index))).await?;
            let mut chunk_hasher = Hasher::new();

            loop {
                let n = chunk.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                chunk_hasher.update(&buffer[..n]);
                file_hasher.update(&buffer[..n]);
                output.write_all(&buffer[..n]).await?;
                total_size += n as u64;
            }

            let expected = records
                .iter()
                .find(|r| r.chunk_index == index)
                .map(|r| r.checksum.as_str())
                .filter(|c| !c.is_empty());
            if let Some(expected) = expected {
                let actual = chunk_hasher.finalize().to_hex().to_string();
                if actual != expected {
                    return Err(ChunkError::ChecksumMismatch {
                        index,
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        output.flush().await?;
        output.into_inner().sync_all().await?;

        Ok(MergedFile {
            path: output_path.to_path_buf(),
            size: total_size,
            checksum: file_hasher.finalize().to_hex().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{checksum_hex, ChunkReceiver};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_merge_in_index_order() {
        let temp = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp.path().join("chunks"));

        // Arrival order does not matter
        receiver.write_chunk("up-1", 2, b"ccc", None).await.unwrap();
        receiver.write_chunk("up-1", 0, b"a", None).await.unwrap();
        receiver.write_chunk("up-1", 1, b"bb", None).await.unwrap();

        let output = temp.path().join("videos").join("out.mp4");
        let merged = ChunkMerger::merge(
            &receiver.session_dir("up-1").unwrap(),
            3,
            &output,
            &[],
        )
        .await
        .unwrap();

        assert_eq!(merged.size, 6);
        assert_eq!(merged.checksum, checksum_hex(b"abbccc"));
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"abbccc");
    }

    #[tokio::test]
    async fn test_merge_reports_missing_files() {
        let temp = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp.path().join("chunks"));
        receiver.write_chunk("up-1", 0, b"a", None).await.unwrap();
        receiver.write_chunk("up-1", 3, b"d", None).await.unwrap();

        let output = temp.path().join("out.bin");
        let err = ChunkMerger::merge(&receiver.session_dir("up-1").unwrap(), 4, &output, &[])
            .await
            .unwrap_err();

        match err {
            ChunkError::MissingChunks(missing) => assert_eq!(missing, vec![1, 2]),
            other => panic!("Expected MissingChunks, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_merge_detects_corrupted_chunk() {
        let temp = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp.path().join("chunks"));
        let stored = receiver.write_chunk("up-1", 0, b"good", None).await.unwrap();

        // Chunk altered on disk after it was recorded
        tokio::fs::write(receiver.chunk_path("up-1", 0).unwrap(), b"evil")
            .await
            .unwrap();

        let records = vec![ChunkRecord {
            chunk_index: 0,
            size: stored.size,
            checksum: stored.checksum,
        }];
        let output = temp.path().join("out.bin");
        let err = ChunkMerger::merge(&receiver.session_dir("up-1").unwrap(), 1, &output, &records)
            .await
            .unwrap_err();

        assert!(matches!(err, ChunkError::ChecksumMismatch { index: 0, .. }));
        assert!(!output.exists());
    }
}
