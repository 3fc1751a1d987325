use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Upload session not found: {0}")]
    NotFound(String),

    #[error("Session storage error: {0}")]
    DatabaseError(String),

    #[error("Malformed session metadata: {0}")]
    SerializationError(String),

    #[error("{0}")]
    InvalidState(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
