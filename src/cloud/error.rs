use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Provider misconfigured: {0}")]
    Config(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<CloudError>,
    },
}

impl CloudError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Http(_) | CloudError::S3(_) | CloudError::Io(_) => true,
            CloudError::Api { status, .. } => *status == 429 || *status >= 500,
            CloudError::Config(_) | CloudError::Unsupported(_) | CloudError::Exhausted { .. } => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CloudError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => CloudError::Http(err.to_string()),
        }
    }
}

pub type CloudResult<T> = Result<T, CloudError>;
