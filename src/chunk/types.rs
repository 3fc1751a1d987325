use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A chunk written to the session's chunk directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub index: u32,
    pub size: u64,
    pub checksum: String, // BLAKE3, hex
}

/// Output of concatenating every chunk of a session
#[derive(Debug, Clone)]
pub struct MergedFile {
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String, // BLAKE3 of the whole file, hex
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub upload_id: String,
    pub chunk_index: u32,
    pub progress: f64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
}

pub fn checksum_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
