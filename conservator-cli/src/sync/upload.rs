use std::path::{Path, PathBuf};

use conservator_core::{Collection, RemoteTree};
use futures_util::future::{BoxFuture, FutureExt};

use super::datasets::DatasetRepository;
use super::paths::{join_remote, local_component, remote_components};
use super::plan::{
    ASSOCIATED_FILES_DIR, Listing, VIDEO_METADATA_DIR, associated_content_type,
    media_content_type,
};
use super::{
    IoContext, LocalEntry, NotFoundKind, PathError, SyncError, SyncFlags, fetch_listing,
    is_dataset_dir, sorted_entries,
};

/// Pushes a local directory tree into the remote collection hierarchy.
pub struct Uploader<'a> {
    tree: &'a dyn RemoteTree,
    datasets: &'a dyn DatasetRepository,
    flags: SyncFlags,
}

impl<'a> Uploader<'a> {
    pub fn new(
        tree: &'a dyn RemoteTree,
        datasets: &'a dyn DatasetRepository,
        flags: SyncFlags,
    ) -> Self {
        Self {
            tree,
            datasets,
            flags,
        }
    }

    /// Uploads `<local_folder>/<last component of remote_path>` to
    /// `remote_path` and returns the id of the root collection.
    ///
    /// The first component of `remote_path` names a project that must exist.
    pub async fn upload(&self, remote_path: &str, local_folder: &Path) -> Result<String, SyncError> {
        let components = remote_components(remote_path)?;
        let Some(root_name) = components.last() else {
            return Err(PathError::Empty.into());
        };
        let local_root = local_folder.join(local_component(root_name)?);
        let is_dir = tokio::fs::metadata(&local_root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SyncError::MissingLocal(local_root));
        }

        let root = self.resolve_root(&components).await?;
        let id = root.id.clone();
        let remote_root = format!("/{}", components.join("/"));
        self.upload_collection(root, remote_root, local_root)
            .await?;
        Ok(id)
    }

    async fn resolve_root(&self, components: &[&str]) -> Result<Collection, SyncError> {
        let Some((project, rest)) = components.split_first() else {
            return Err(PathError::Empty.into());
        };
        let mut path = format!("/{project}");
        let mut current = self
            .tree
            .collection_by_path(&path)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                kind: NotFoundKind::Project,
                path: path.clone(),
            })?;

        for name in rest {
            path = join_remote(&path, name);
            current = match self.tree.collection_by_path(&path).await? {
                Some(collection) => collection,
                None if self.flags.create => {
                    tracing::info!(%path, "creating collection");
                    self.tree.create_collection(name, &current.id).await?
                }
                None => {
                    return Err(SyncError::NotFound {
                        kind: NotFoundKind::Collection,
                        path,
                    });
                }
            };
        }
        Ok(current)
    }

    fn upload_collection(
        &self,
        collection: Collection,
        remote_path: String,
        dir: PathBuf,
    ) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            tracing::info!(collection = %remote_path, dir = %dir.display(), "uploading collection");

            let listing = if self.flags.include_video_metadata || self.flags.include_media {
                fetch_listing(self.tree, &collection.id).await?
            } else {
                Listing::default()
            };
            let entries = sorted_entries(&dir).await?;

            if self.flags.include_associated_files {
                self.upload_associated_files(&collection, &dir.join(ASSOCIATED_FILES_DIR))
                    .await?;
            }
            if self.flags.include_video_metadata {
                self.upload_video_metadata(&listing, &dir.join(VIDEO_METADATA_DIR))
                    .await?;
            }
            if self.flags.include_media {
                self.upload_media(&collection, &listing, &entries).await?;
            }

            for entry in entries.iter().filter(|entry| entry.is_dir) {
                if is_reserved(&entry.name) {
                    continue;
                }
                if is_dataset_dir(&entry.path).await {
                    if self.flags.include_datasets {
                        self.datasets.push(&entry.path).await?;
                    } else {
                        tracing::debug!(path = %entry.path.display(), "skipping dataset working tree");
                    }
                    continue;
                }

                let child_path = join_remote(&remote_path, &entry.name);
                let child = match self.tree.collection_by_path(&child_path).await? {
                    Some(child) => child,
                    None if self.flags.create => {
                        tracing::info!(path = %child_path, "creating collection");
                        self.tree
                            .create_collection(&entry.name, &collection.id)
                            .await?
                    }
                    None => {
                        tracing::warn!(
                            path = %child_path,
                            "remote collection does not exist and creation is disabled, skipping"
                        );
                        continue;
                    }
                };
                self.upload_collection(child, child_path, entry.path.clone())
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn upload_associated_files(
        &self,
        collection: &Collection,
        associated_dir: &Path,
    ) -> Result<(), SyncError> {
        for entry in sorted_entries(associated_dir).await? {
            if entry.is_dir {
                continue;
            }
            let Some(content_type) = associated_content_type(&entry.name) else {
                tracing::warn!(path = %entry.path.display(), "unsupported associated file type, skipping");
                continue;
            };
            tracing::debug!(path = %entry.path.display(), content_type, "uploading associated file");
            self.tree
                .upload_associated_file(&collection.id, &entry.path, &entry.name, content_type)
                .await?;
        }
        Ok(())
    }

    async fn upload_video_metadata(&self, listing: &Listing, metadata_dir: &Path) -> Result<(), SyncError> {
        for entry in sorted_entries(metadata_dir).await? {
            if entry.is_dir || !entry.name.ends_with(".json") {
                continue;
            }
            let Some(video) = listing.video_for_metadata_file(&entry.name) else {
                tracing::warn!(path = %entry.path.display(), "no remote video matches metadata file, skipping");
                continue;
            };
            tracing::debug!(path = %entry.path.display(), video = %video.id, "uploading video metadata");
            self.tree
                .upload_video_metadata(&video.id, &entry.path, &entry.name)
                .await?;
        }
        Ok(())
    }

    async fn upload_media(
        &self,
        collection: &Collection,
        listing: &Listing,
        entries: &[LocalEntry],
    ) -> Result<(), SyncError> {
        for entry in entries.iter().filter(|entry| !entry.is_dir) {
            if entry.name.starts_with('.') {
                continue;
            }
            let Some(content_type) = media_content_type(&entry.name) else {
                continue;
            };
            if listing.has_media_named(&entry.name) {
                tracing::debug!(path = %entry.path.display(), "media already uploaded, skipping");
                continue;
            }
            let size = tokio::fs::metadata(&entry.path)
                .await
                .at(&entry.path)?
                .len();
            tracing::info!(path = %entry.path.display(), size, "uploading media");
            self.tree
                .upload_media(&collection.id, &entry.path, &entry.name, content_type)
                .await?;
        }
        Ok(())
    }
}

fn is_reserved(name: &str) -> bool {
    name == ASSOCIATED_FILES_DIR || name == VIDEO_METADATA_DIR || name.starts_with('.')
}
