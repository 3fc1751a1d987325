pub mod error;
pub mod merger;
pub mod receiver;
pub mod types;

pub use error::{ChunkError, Result};
pub use merger::ChunkMerger;
pub use receiver::ChunkReceiver;
pub use types::{checksum_hex, ChunkProgress, MergedFile, StoredChunk};
