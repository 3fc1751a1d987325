use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Checksum mismatch for chunk {index}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("Chunk files missing on disk: {0:?}")]
    MissingChunks(Vec<u32>),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
