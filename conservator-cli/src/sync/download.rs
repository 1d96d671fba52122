use std::path::{Path, PathBuf};

use conservator_core::{Collection, RemoteTree};
use futures_util::future::{BoxFuture, FutureExt};

use super::datasets::DatasetRepository;
use super::paths::local_component;
use super::plan::{
    ASSOCIATED_FILES_DIR, LevelPlan, Listing, VIDEO_METADATA_DIR, metadata_file_name,
    render_metadata,
};
use super::prune::prune_dir;
use super::{IoContext, NotFoundKind, SyncError, SyncFlags, fetch_listing};

/// Mirrors a remote collection and its descendants into a local directory.
///
/// Each level is handled in a fixed order: the expected names are planned
/// from the remote listings, enabled categories are written, children are
/// recursed into, and only then is anything pruned.
pub struct Downloader<'a> {
    tree: &'a dyn RemoteTree,
    datasets: &'a dyn DatasetRepository,
    flags: SyncFlags,
}

impl<'a> Downloader<'a> {
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

    /// Downloads the collection at `remote_path` into
    /// `<local_folder>/<collection name>` and returns that directory.
    pub async fn download(&self, remote_path: &str, local_folder: &Path) -> Result<PathBuf, SyncError> {
        let collection = self
            .tree
            .collection_by_path(remote_path)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                kind: NotFoundKind::Collection,
                path: remote_path.to_string(),
            })?;
        tokio::fs::create_dir_all(local_folder)
            .await
            .at(local_folder)?;
        let name = self
            .download_collection(collection, local_folder.to_path_buf())
            .await?;
        Ok(local_folder.join(name))
    }

    fn download_collection(
        &self,
        collection: Collection,
        parent: PathBuf,
    ) -> BoxFuture<'_, Result<String, SyncError>> {
        async move {
            let name = local_component(&collection.name)?.to_string();
            let dir = parent.join(&name);
            tracing::info!(
                collection = collection.path.as_deref().unwrap_or(collection.name.as_str()),
                dir = %dir.display(),
                "downloading collection"
            );
            tokio::fs::create_dir_all(&dir).await.at(&dir)?;

            let listing = fetch_listing(self.tree, &collection.id).await?;
            let mut plan = LevelPlan::new(&collection, &listing);

            let associated_dir = dir.join(ASSOCIATED_FILES_DIR);
            let metadata_dir = dir.join(VIDEO_METADATA_DIR);
            tokio::fs::create_dir_all(&associated_dir)
                .await
                .at(&associated_dir)?;
            tokio::fs::create_dir_all(&metadata_dir)
                .await
                .at(&metadata_dir)?;

            if self.flags.include_video_metadata {
                self.write_video_metadata(&listing, &metadata_dir).await?;
            }
            if self.flags.include_associated_files {
                self.fetch_associated_files(&collection, &associated_dir)
                    .await?;
            }
            if self.flags.include_media {
                self.fetch_media(&listing, &dir).await?;
            }
            if self.flags.include_datasets {
                for dataset in &listing.datasets {
                    let target = dir.join(local_component(&dataset.name)?);
                    self.datasets.pull(dataset, &target).await?;
                }
            }

            for child_id in &collection.child_ids {
                let child = self.tree.collection_by_id(child_id).await?;
                let child_name = self.download_collection(child, dir.clone()).await?;
                plan.add_child(child_name);
            }

            if self.flags.delete {
                prune_dir(&associated_dir, &plan.associated_files, true)
                    .await
                    .at(&associated_dir)?;
                prune_dir(&metadata_dir, &plan.metadata_files, true)
                    .await
                    .at(&metadata_dir)?;
                prune_dir(&dir, &plan.entries, false).await.at(&dir)?;
            }

            Ok(name)
        }
        .boxed()
    }

    async fn write_video_metadata(&self, listing: &Listing, metadata_dir: &Path) -> Result<(), SyncError> {
        for video in &listing.videos {
            let file_name = metadata_file_name(&video.filename);
            let target = metadata_dir.join(local_component(&file_name)?);
            let Some(raw) = self.tree.video_metadata(&video.id).await? else {
                tracing::warn!(video = %video.filename, "video has no metadata, skipping");
                continue;
            };
            let rendered = match render_metadata(&raw, video.display_name()) {
                Ok(Some(rendered)) => rendered,
                Ok(None) => {
                    tracing::warn!(video = %video.filename, "metadata lists no videos, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(video = %video.filename, %err, "metadata is not valid JSON, skipping");
                    continue;
                }
            };
            tracing::debug!(path = %target.display(), "writing video metadata");
            tokio::fs::write(&target, rendered).await.at(&target)?;
        }
        Ok(())
    }

    async fn fetch_associated_files(
        &self,
        collection: &Collection,
        associated_dir: &Path,
    ) -> Result<(), SyncError> {
        for file in &collection.file_locker_files {
            let target = associated_dir.join(local_component(&file.name)?);
            self.tree.download_file(&file.url, &target, None).await?;
        }
        Ok(())
    }

    async fn fetch_media(&self, listing: &Listing, dir: &Path) -> Result<(), SyncError> {
        for media in listing.media() {
            let Some(url) = media.url.as_deref() else {
                tracing::warn!(media = %media.filename, "media has no download url, skipping");
                continue;
            };
            let target = dir.join(local_component(&media.filename)?);
            self.tree
                .download_file(url, &target, media.md5.as_deref())
                .await?;
        }
        Ok(())
    }
}
