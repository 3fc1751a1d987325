//! Durable records of finished uploads

pub mod error;
pub mod store;
pub mod types;

pub use error::{ContentError, ContentResult};
pub use store::ContentStore;
pub use types::{ContentFilter, ContentMetadata, ContentStatus, RecordedContent};
