use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::model::{Collection, DatasetRef, FileLockerFile, MediaFile, MediaKind, SignedUrl};
use crate::transfer::TransferError;
use crate::{ConservatorError, RemoteTree};

/// A file pushed through [`RemoteTree::upload_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub url: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    media: HashMap<(String, MediaKind), Vec<MediaFile>>,
    datasets: HashMap<String, Vec<DatasetRef>>,
    metadata: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
    created: Vec<String>,
    uploads: Vec<RecordedUpload>,
    processed: Vec<(String, Option<String>)>,
    next_id: u64,
}

/// In-memory collection tree for testing. Downloads are served from stored
/// blobs, uploads are recorded.
#[derive(Default)]
pub struct InMemoryTree {
    state: Mutex<State>,
}

impl InMemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("in-memory tree lock poisoned")
    }

    /// Adds a collection under `parent_id`, or a project root when `None`.
    pub fn add_collection(&self, parent_id: Option<&str>, id: &str, name: &str) {
        let mut state = self.state();
        insert_collection(&mut state, parent_id, id, name);
    }

    pub fn attach_file(&self, collection_id: &str, name: &str, content: &[u8]) {
        let mut state = self.state();
        let url = format!("mem://locker/{collection_id}/{name}");
        state.blobs.insert(url.clone(), content.to_vec());
        let collection = state
            .collections
            .get_mut(collection_id)
            .expect("attach_file: unknown collection");
        collection.file_locker_files.push(FileLockerFile {
            name: name.to_string(),
            url,
        });
    }

    pub fn add_media(
        &self,
        collection_id: &str,
        kind: MediaKind,
        id: &str,
        filename: &str,
        display_name: Option<&str>,
        content: &[u8],
    ) {
        let mut state = self.state();
        let url = format!("mem://media/{id}");
        state.blobs.insert(url.clone(), content.to_vec());
        state
            .media
            .entry((collection_id.to_string(), kind))
            .or_default()
            .push(MediaFile {
                id: id.to_string(),
                name: display_name.map(str::to_string),
                filename: filename.to_string(),
                url: Some(url),
                md5: None,
            });
    }

    pub fn set_video_metadata(&self, video_id: &str, metadata: &str) {
        self.state()
            .metadata
            .insert(video_id.to_string(), metadata.to_string());
    }

    pub fn add_dataset(&self, collection_id: &str, id: &str, name: &str) {
        self.state()
            .datasets
            .entry(collection_id.to_string())
            .or_default()
            .push(DatasetRef {
                id: id.to_string(),
                name: name.to_string(),
            });
    }

    pub fn collection_at(&self, path: &str) -> Option<Collection> {
        find_by_path(&self.state(), path)
    }

    /// Ids of collections created through [`RemoteTree::create_collection`].
    pub fn created_collections(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state().uploads.clone()
    }

    /// `(media id, metadata url)` for every processing request.
    pub fn processed(&self) -> Vec<(String, Option<String>)> {
        self.state().processed.clone()
    }
}

fn insert_collection(state: &mut State, parent_id: Option<&str>, id: &str, name: &str) {
    let path = match parent_id {
        Some(parent_id) => {
            let parent = state
                .collections
                .get_mut(parent_id)
                .expect("add_collection: unknown parent");
            parent.child_ids.push(id.to_string());
            format!("{}/{name}", parent.path.as_deref().unwrap_or_default())
        }
        None => format!("/{name}"),
    };
    state.collections.insert(
        id.to_string(),
        Collection {
            id: id.to_string(),
            name: name.to_string(),
            path: Some(path),
            child_ids: Vec::new(),
            file_locker_files: Vec::new(),
        },
    );
}

fn find_by_path(state: &State, path: &str) -> Option<Collection> {
    let wanted = path.trim_end_matches('/');
    state
        .collections
        .values()
        .find(|c| c.path.as_deref() == Some(wanted))
        .cloned()
}

fn missing(what: &str) -> ConservatorError {
    ConservatorError::UnknownId(what.to_string())
}

#[async_trait::async_trait]
impl RemoteTree for InMemoryTree {
    async fn collection_by_path(&self, path: &str) -> Result<Option<Collection>, ConservatorError> {
        Ok(find_by_path(&self.state(), path))
    }

    async fn collection_by_id(&self, id: &str) -> Result<Collection, ConservatorError> {
        self.state()
            .collections
            .get(id)
            .cloned()
            .ok_or_else(|| missing(id))
    }

    async fn create_collection(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<Collection, ConservatorError> {
        let mut state = self.state();
        if !state.collections.contains_key(parent_id) {
            return Err(missing(parent_id));
        }
        state.next_id += 1;
        let id = format!("created-{}", state.next_id);
        insert_collection(&mut state, Some(parent_id), &id, name);
        state.created.push(id.clone());
        Ok(state.collections[&id].clone())
    }

    async fn datasets(&self, collection_id: &str) -> Result<Vec<DatasetRef>, ConservatorError> {
        Ok(self
            .state()
            .datasets
            .get(collection_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn media(
        &self,
        collection_id: &str,
        kind: MediaKind,
    ) -> Result<Vec<MediaFile>, ConservatorError> {
        Ok(self
            .state()
            .media
            .get(&(collection_id.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn video_metadata(&self, video_id: &str) -> Result<Option<String>, ConservatorError> {
        Ok(self.state().metadata.get(video_id).cloned())
    }

    async fn create_video(
        &self,
        filename: &str,
        collection_id: &str,
    ) -> Result<String, ConservatorError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("media-{}", state.next_id);
        state
            .media
            .entry((collection_id.to_string(), MediaKind::Video))
            .or_default()
            .push(MediaFile {
                id: id.clone(),
                name: Some(filename.to_string()),
                filename: filename.to_string(),
                url: None,
                md5: None,
            });
        Ok(id)
    }

    async fn signed_video_upload_url(
        &self,
        video_id: &str,
        _content_type: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        Ok(SignedUrl {
            url: None,
            signed_url: format!("mem://upload/video/{video_id}"),
        })
    }

    async fn signed_metadata_upload_url(
        &self,
        video_id: &str,
        _content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        Ok(SignedUrl {
            url: Some(format!("mem://metadata/{video_id}/{filename}")),
            signed_url: format!("mem://upload/metadata/{video_id}/{filename}"),
        })
    }

    async fn signed_collection_locker_url(
        &self,
        collection_id: &str,
        _content_type: &str,
        filename: &str,
    ) -> Result<SignedUrl, ConservatorError> {
        Ok(SignedUrl {
            url: None,
            signed_url: format!("mem://upload/locker/{collection_id}/{filename}"),
        })
    }

    async fn process_video(
        &self,
        video_id: &str,
        metadata_url: Option<&str>,
    ) -> Result<(), ConservatorError> {
        self.state()
            .processed
            .push((video_id.to_string(), metadata_url.map(str::to_string)));
        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        target: &Path,
        _expected_md5: Option<&str>,
    ) -> Result<(), ConservatorError> {
        let content = self.state().blobs.get(url).cloned().ok_or_else(|| {
            TransferError::Io(io::Error::new(io::ErrorKind::NotFound, url.to_string()))
        })?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(TransferError::Io)?;
        }
        std::fs::write(target, content).map_err(TransferError::Io)?;
        Ok(())
    }

    async fn upload_file(
        &self,
        source: &Path,
        url: &str,
        content_type: &str,
    ) -> Result<(), ConservatorError> {
        let content = std::fs::read(source).map_err(TransferError::Io)?;
        self.state().uploads.push(RecordedUpload {
            url: url.to_string(),
            content_type: content_type.to_string(),
            content,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paths_follow_parent_chain() {
        let tree = InMemoryTree::new();
        tree.add_collection(None, "p", "Project");
        tree.add_collection(Some("p"), "a", "A");

        let found = tree.collection_by_path("/Project/A").await.unwrap().unwrap();
        assert_eq!(found.id, "a");
        assert_eq!(
            tree.collection_by_id("p").await.unwrap().child_ids,
            vec!["a".to_string()]
        );
        assert!(tree.collection_by_path("/Project/B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn composite_media_upload_records_every_step() {
        let tree = InMemoryTree::new();
        tree.add_collection(None, "p", "Project");
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"frames").unwrap();

        let id = tree
            .upload_media("p", &source, "clip.mp4", "video/mp4")
            .await
            .unwrap();

        let uploads = tree.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].url, format!("mem://upload/video/{id}"));
        assert_eq!(uploads[0].content, b"frames");
        assert_eq!(tree.processed(), vec![(id, None)]);
        assert_eq!(tree.media("p", MediaKind::Video).await.unwrap().len(), 1);
    }
}
