//! Cloud storage providers for merged uploads
//!
//! Two interchangeable backends sit behind [`CloudProvider`]:
//! - Cloudflare Stream (managed video streaming)
//! - S3-compatible object storage
//!
//! [`CloudUploader`] wraps the configured provider with a bounded
//! exponential-backoff retry. It never falls over to the other provider;
//! degrading to local disk is the caller's decision.

pub mod cloudflare;
pub mod error;
pub mod provider;
pub mod s3;
pub mod types;
pub mod uploader;

pub use cloudflare::CloudflareStream;
pub use error::{CloudError, CloudResult};
pub use provider::CloudProvider;
pub use s3::S3Storage;
pub use types::{content_type_for, CloudAsset, CloudProviderKind, ProviderStatus};
pub use uploader::CloudUploader;
