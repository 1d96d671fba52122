//! Typed GraphQL operations used by the collection synchronizer.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::client::{ConservatorClient, ConservatorError};
use crate::model::{Collection, CreatedMedia, DatasetRef, MediaFile, MediaKind, SignedUrl, User};

/// Number of entries requested per page for paged listings.
pub const PAGE_SIZE: u32 = 200;

const COLLECTION_FIELDS: &str = "
    id
    name
    path
    childIds
    fileLockerFiles {
      name
      url
    }
";

const MEDIA_FIELDS: &str = "
    id
    name
    filename
    url
    md5
";

impl ConservatorClient {
    pub async fn current_user(&self) -> Result<User, ConservatorError> {
        let query = "
        query user {
          user {
            id
            email
          }
        }
        ";
        self.query_field(query, json!({}), "user").await
    }

    /// Returns `None` when nothing exists at `path`.
    pub async fn collection_by_path(&self, path: &str) -> Result<Option<Collection>, ConservatorError> {
        let query = format!(
            "
        query collectionByPath($path: String!) {{
          collectionByPath(path: $path) {{ {COLLECTION_FIELDS} }}
        }}
        "
        );
        self.query_field(&query, json!({ "path": path }), "collectionByPath")
            .await
    }

    pub async fn collection_by_id(&self, id: &str) -> Result<Collection, ConservatorError> {
        let query = format!(
            "
        query collection($id: ID!) {{
          collection(id: $id) {{ {COLLECTION_FIELDS} }}
        }}
        "
        );
        let collection: Option<Collection> =
            self.query_field(&query, json!({ "id": id }), "collection").await?;
        collection.ok_or_else(|| ConservatorError::UnknownId(id.to_string()))
    }

    /// The service does not deduplicate: callers check for an existing
    /// collection first.
    pub async fn create_collection(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Collection, ConservatorError> {
        let query = format!(
            "
        mutation createCollection($input: CreateCollectionInput!) {{
          createCollection(input: $input) {{ {COLLECTION_FIELDS} }}
        }}
        "
        );
        let variables = json!({
            "input": {
                "name": name,
                "parentId": parent_id,
            }
        });
        self.query_field(&query, variables, "createCollection").await
    }

    pub async fn datasets(&self, collection_id: &str) -> Result<Vec<DatasetRef>, ConservatorError> {
        let query = "
        query datasets($collectionId: ID!, $limit: Int, $page: Int) {
          datasets(collectionId: $collectionId, limit: $limit, page: $page) {
            id
            name
          }
        }
        ";
        self.paged(query, collection_id, "datasets").await
    }

    pub async fn media(
        &self,
        collection_id: &str,
        kind: MediaKind,
    ) -> Result<Vec<MediaFile>, ConservatorError> {
        let field = kind.collection_field();
        let query = format!(
            "
        query {field}($collectionId: ID!, $limit: Int, $page: Int) {{
          {field}(collectionId: $collectionId, limit: $limit, page: $page) {{ {MEDIA_FIELDS} }}
        }}
        "
        );
        self.paged(&query, collection_id, field).await
    }

    /// Raw metadata JSON attached to a video, if any.
    pub async fn video_metadata(&self, video_id: &str) -> Result<Option<String>, ConservatorError> {
        #[derive(Deserialize)]
        struct VideoMetadata {
            #[serde(default)]
            metadata: Option<String>,
        }

        let query = "
        query video($id: String!) {
          video(id: $id) {
            metadata
          }
        }
        ";
        let video: Option<VideoMetadata> =
            self.query_field(query, json!({ "id": video_id }), "video").await?;
        let video = video.ok_or_else(|| ConservatorError::UnknownId(video_id.to_string()))?;
        Ok(video.metadata.filter(|metadata| !metadata.is_empty()))
    }

    pub async fn create_video(
        &self,
        filename: &str,
        collection_id: &str,
    ) -> Result<CreatedMedia, ConservatorError> {
        let query = "
        mutation createVideo($filename: String!, $collectionId: ID) {
          createVideo(filename: $filename, collectionId: $collectionId) {
            id
          }
        }
        ";
        let variables = json!({ "filename": filename, "collectionId": collection_id });
        self.query_field(query, variables, "createVideo").await
    }

    pub async fn generate_signed_video_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        let query = "
        mutation generateSignedVideoUploadUrl($videoId: String!, $contentType: String!) {
          generateSignedVideoUploadUrl(videoId: $videoId, contentType: $contentType) {
            url
            signedUrl
          }
        }
        ";
        let variables = json!({ "videoId": video_id, "contentType": content_type });
        self.query_field(query, variables, "generateSignedVideoUploadUrl")
            .await
    }

    pub async fn generate_signed_metadata_upload_url(
        &self,
        video_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        let query = "
        mutation generateSignedMetadataUploadUrl($videoId: String!, $contentType: String!, $filename: String!) {
          generateSignedMetadataUploadUrl(videoId: $videoId, contentType: $contentType, filename: $filename) {
            url
            signedUrl
          }
        }
        ";
        let variables = json!({
            "videoId": video_id,
            "contentType": content_type,
            "filename": filename,
        });
        self.query_field(query, variables, "generateSignedMetadataUploadUrl")
            .await
    }

    pub async fn generate_signed_collection_file_locker_upload_url(
        &self,
        collection_id: &str,
        content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        let query = "
        mutation generateSignedCollectionFileLockerUploadUrl($collectionId: ID!, $contentType: String!, $filename: String!) {
          generateSignedCollectionFileLockerUploadUrl(collectionId: $collectionId, contentType: $contentType, filename: $filename) {
            url
            signedUrl
          }
        }
        ";
        let variables = json!({
            "collectionId": collection_id,
            "contentType": content_type,
            "filename": filename,
        });
        self.query_field(query, variables, "generateSignedCollectionFileLockerUploadUrl")
            .await
    }

    pub async fn process_video(
        &self,
        video_id: &str,
        metadata_url: Option<&str>,
        should_notify: bool,
    ) -> Result<(), ConservatorError> {
        let query = "
        mutation processVideo($id: String!, $metadataUrl: String, $shouldNotify: Boolean) {
          processVideo(id: $id, metadataUrl: $metadataUrl, shouldNotify: $shouldNotify) {
            id
          }
        }
        ";
        let variables = json!({
            "id": video_id,
            "metadataUrl": metadata_url,
            "shouldNotify": should_notify,
        });
        let _: serde_json::Value = self.query_field(query, variables, "processVideo").await?;
        Ok(())
    }

    async fn paged<T: DeserializeOwned>(
        &self,
        query: &str,
        collection_id: &str,
        field: &str,
    ) -> Result<Vec<T>, ConservatorError> {
        let mut items = Vec::new();
        let mut page = 0u32;
        loop {
            let variables = json!({
                "collectionId": collection_id,
                "limit": PAGE_SIZE,
                "page": page,
            });
            let batch: Option<Vec<T>> = self.query_field(query, variables, field).await?;
            match batch {
                Some(batch) if !batch.is_empty() => {
                    items.extend(batch);
                    page += 1;
                }
                _ => break,
            }
        }
        Ok(items)
    }
}
