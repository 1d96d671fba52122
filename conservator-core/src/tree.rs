use std::path::Path;

use crate::client::{ConservatorClient, ConservatorError};
use crate::model::{Collection, DatasetRef, MediaFile, MediaKind, SignedUrl};

/// The remote operations the collection synchronizer needs.
///
/// Every method maps to a single GraphQL request or a single signed-URL
/// transfer. The provided upload helpers chain those primitives the way the
/// service expects them.
#[async_trait::async_trait]
pub trait RemoteTree: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`.
    async fn collection_by_path(&self, path: &str) -> Result<Option<Collection>, ConservatorError>;

    async fn collection_by_id(&self, id: &str) -> Result<Collection, ConservatorError>;

    async fn create_collection(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Collection, ConservatorError>;

    async fn datasets(&self, collection_id: &str) -> Result<Vec<DatasetRef>, ConservatorError>;

    async fn media(
        &self,
        collection_id: &str,
        kind: MediaKind,
    ) -> Result<Vec<MediaFile>, ConservatorError>;

    async fn video_metadata(&self, video_id: &str) -> Result<Option<String>, ConservatorError>;

    async fn create_video(
        &self,
        filename: &str,
        collection_id: &str,
    ) -> Result<String, ConservatorError>;

    async fn signed_video_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
    ) -> Result<SignedUrl, ConservatorError>;

    async fn signed_metadata_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError>;

    async fn signed_collection_locker_url(
        &self,
        collection_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError>;

    async fn process_video(
        &self,
        video_id: &str,
        metadata_url: Option<&str>,
    ) -> Result<(), ConservatorError>;

    async fn download_file(
        &self,
        url: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), ConservatorError>;

    async fn upload_file(
        &self,
        source: &Path,
        url: &str,
        content_type: &str,
    ) -> Result<(), ConservatorError>;

    async fn upload_associated_file(
        &self,
        collection_id: &str,
        source: &Path,
        filename: &str,
        content_type: &str,
    ) -> Result<(), ConservatorError> {
        let signed = self
            .signed_collection_locker_url(collection_id, content_type, filename)
            .await?;
        self.upload_file(source, &signed.signed_url, content_type)
            .await
    }

    /// Uploads a metadata file and asks the service to reprocess the video with it.
    async fn upload_video_metadata(
        &self,
        video_id: &str,
        source: &Path,
        filename: &str,
    ) -> Result<(), ConservatorError> {
        let content_type = "application/json";
        let signed = self
            .signed_metadata_upload_url(video_id, content_type, filename)
            .await?;
        self.upload_file(source, &signed.signed_url, content_type)
            .await?;
        let metadata_url = signed.url.as_deref().unwrap_or(signed.signed_url.as_str());
        self.process_video(video_id, Some(metadata_url)).await
    }

    /// Creates a media object in `collection_id`, uploads its bytes and
    /// triggers processing. Returns the new media id.
    async fn upload_media(
        &self,
        collection_id: &str,
        source: &Path,
        filename: &str,
        content_type: &str,
    ) -> Result<String, ConservatorError> {
        let media_id = self.create_video(filename, collection_id).await?;
        let signed = self
            .signed_video_upload_url(&media_id, content_type)
            .await?;
        self.upload_file(source, &signed.signed_url, content_type)
            .await?;
        self.process_video(&media_id, None).await?;
        Ok(media_id)
    }
}

#[async_trait::async_trait]
impl RemoteTree for ConservatorClient {
    async fn collection_by_path(&self, path: &str) -> Result<Option<Collection>, ConservatorError> {
        ConservatorClient::collection_by_path(self, path).await
    }

    async fn collection_by_id(&self, id: &str) -> Result<Collection, ConservatorError> {
        ConservatorClient::collection_by_id(self, id).await
    }

    async fn create_collection(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Collection, ConservatorError> {
        ConservatorClient::create_collection(self, name, parent_id).await
    }

    async fn datasets(&self, collection_id: &str) -> Result<Vec<DatasetRef>, ConservatorError> {
        ConservatorClient::datasets(self, collection_id).await
    }

    async fn media(
        &self,
        collection_id: &str,
        kind: MediaKind,
    ) -> Result<Vec<MediaFile>, ConservatorError> {
        ConservatorClient::media(self, collection_id, kind).await
    }

    async fn video_metadata(&self, video_id: &str) -> Result<Option<String>, ConservatorError> {
        ConservatorClient::video_metadata(self, video_id).await
    }

    async fn create_video(
        &self,
        filename: &str,
        collection_id: &str,
    ) -> Result<String, ConservatorError> {
        Ok(ConservatorClient::create_video(self, filename, collection_id)
            .await?
            .id)
    }

    async fn signed_video_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        self.generate_signed_video_upload_url(video_id, content_type)
            .await
    }

    async fn signed_metadata_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        self.generate_signed_metadata_upload_url(video_id, content_type, filename)
            .await
    }

    async fn signed_collection_locker_url(
        &self,
        collection_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        self.generate_signed_collection_file_locker_upload_url(collection_id, content_type, filename)
            .await
    }

    async fn process_video(
        &self,
        video_id: &str,
        metadata_url: Option<&str>,
    ) -> Result<(), ConservatorError> {
        ConservatorClient::process_video(self, video_id, metadata_url, false).await
    }

    async fn download_file(
        &self,
        url: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), ConservatorError> {
        tokio::select! {
            biased;
            _ = self.cancellation().cancelled() => Err(ConservatorError::Cancelled),
            result = self.transfer().download_to_path_checked(url, target, expected_md5) => {
                Ok(result?)
            }
        }
    }

    async fn upload_file(
        &self,
        source: &Path,
        url: &str,
        content_type: &str,
    ) -> Result<(), ConservatorError> {
        tokio::select! {
            biased;
            _ = self.cancellation().cancelled() => Err(ConservatorError::Cancelled),
            result = self.transfer().upload_from_path(url, source, content_type) => {
                Ok(result?)
            }
        }
    }
}
