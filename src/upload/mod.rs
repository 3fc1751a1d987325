//! Upload orchestration
//!
//! Ties the session store, chunk files, cloud uploader and content records
//! together into the chunked and simple upload flows.

pub mod error;
pub mod service;
pub mod types;

pub use error::{UploadError, UploadResult};
pub use service::UploadService;
pub use types::{FinalizeOutcome, InitializeUpload, InitializedUpload, SimpleUpload};
