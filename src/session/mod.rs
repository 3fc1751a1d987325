pub mod error;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use store::{ChunkRecord, SessionStore};
pub use types::{SessionProgress, SessionStatus, UploadMetadata, UploadSession};
