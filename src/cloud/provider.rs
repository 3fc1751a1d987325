use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::types::{CloudAsset, CloudProviderKind, ProviderStatus};
use crate::session::UploadMetadata;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> CloudProviderKind;

    /// Upload the file at `file_path` and describe where it can be streamed from.
    async fn upload(&self, file_path: &Path, metadata: &UploadMetadata) -> CloudResult<CloudAsset>;

    /// Remove a previously uploaded asset.
    async fn delete(&self, asset_id: &str) -> CloudResult<()>;

    /// Processing status of an asset. Only streaming providers track one.
    async fn status(&self, asset_id: &str) -> CloudResult<ProviderStatus> {
        Err(CloudError::Unsupported(format!(
            "{} does not report processing status for {asset_id}",
            self.kind()
        )))
    }
}
