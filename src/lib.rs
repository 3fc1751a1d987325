//! Chunked lecture-video uploads with cloud storage and local fallback
//!
//! Teachers upload large videos in chunks (or in one request for small files).
//! Finished uploads are merged, handed to the configured cloud provider and
//! recorded as course content. When the cloud is unreachable the merged file
//! is kept on local disk and served from there instead.

pub mod api;
pub mod chunk;
pub mod cloud;
pub mod config;
pub mod content;
pub mod db;
pub mod metrics;
pub mod session;
pub mod upload;
