use crate::chunk::ChunkError;
use crate::cloud::CloudError;
use crate::content::ContentError;
use crate::session::error::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    /// Body over the configured chunk or file limit
    #[error("{0}")]
    TooLarge(String),

    #[error("Cloud upload failed: {0}")]
    Upload(#[from] CloudError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<SessionError> for UploadError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => UploadError::NotFound(err.to_string()),
            SessionError::InvalidState(msg) => UploadError::InvalidState(msg),
            other => UploadError::Unexpected(other.to_string()),
        }
    }
}

impl From<ChunkError> for UploadError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Io(e) => UploadError::Unexpected(e.to_string()),
            other => UploadError::InvalidState(other.to_string()),
        }
    }
}

impl From<ContentError> for UploadError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(_) => UploadError::NotFound(err.to_string()),
            other => UploadError::Unexpected(other.to_string()),
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Unexpected(err.to_string())
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_mapping() {
        let err: UploadError = SessionError::NotFound("up-1".into()).into();
        assert!(matches!(err, UploadError::NotFound(ref m) if m.contains("up-1")));

        let err: UploadError = SessionError::DatabaseError("locked".into()).into();
        assert!(matches!(err, UploadError::Unexpected(_)));
    }

    #[test]
    fn test_chunk_error_mapping() {
        let err: UploadError = ChunkError::ChecksumMismatch {
            index: 2,
            expected: "aa".into(),
            actual: "bb".into(),
        }
        .into();
        assert!(matches!(err, UploadError::InvalidState(_)));

        let err: UploadError = ChunkError::Io(std::io::Error::other("disk full")).into();
        assert!(matches!(err, UploadError::Unexpected(_)));
    }
}
