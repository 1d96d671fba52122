//! Mirrors a remote collection tree to a local directory and back.

pub mod datasets;
mod download;
pub mod paths;
pub mod plan;
pub mod prune;
mod upload;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use conservator_core::{ConservatorError, MediaKind, RemoteTree};
use thiserror::Error;

use plan::Listing;

pub use datasets::{DatasetError, DatasetRepository, GitDatasets};
pub use download::Downloader;
pub use paths::PathError;
pub use upload::Uploader;

/// Which categories a walk touches. Everything is off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlags {
    pub include_datasets: bool,
    pub include_video_metadata: bool,
    pub include_associated_files: bool,
    pub include_media: bool,
    /// Download only: remove local entries the remote does not have.
    pub delete: bool,
    /// Upload only: create missing remote collections.
    pub create: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Project,
    Collection,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Project => f.write_str("Project"),
            NotFoundKind::Collection => f.write_str("Collection"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ConservatorError),
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("dataset sync failed: {0}")]
    Dataset(#[from] DatasetError),
    #[error("{kind} {path} not found!")]
    NotFound { kind: NotFoundKind, path: String },
    #[error("local folder {} does not exist", .0.display())]
    MissingLocal(PathBuf),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Api(ConservatorError::Cancelled))
    }
}

pub(crate) async fn fetch_listing(
    tree: &dyn RemoteTree,
    collection_id: &str,
) -> Result<Listing, SyncError> {
    Ok(Listing {
        videos: tree.media(collection_id, MediaKind::Video).await?,
        images: tree.media(collection_id, MediaKind::Image).await?,
        datasets: tree.datasets(collection_id).await?,
    })
}

pub(crate) struct LocalEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Entries of `dir` sorted by name. A missing directory is empty.
pub(crate) async fn sorted_entries(dir: &Path) -> Result<Vec<LocalEntry>, SyncError> {
    let mut read = match tokio::fs::read_dir(dir).await {
        Ok(read) => read,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SyncError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let mut entries = Vec::new();
    while let Some(entry) = read.next_entry().await.at(dir)? {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "skipping entry with a non UTF-8 name");
            continue;
        };
        let file_type = entry.file_type().await.at(&path)?;
        if file_type.is_symlink() {
            // Linked files are read through; linked directories are never walked.
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "skipping symlinked directory");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping dangling symlink");
                    continue;
                }
            }
        }
        let is_dir = file_type.is_dir();
        entries.push(LocalEntry { name, path, is_dir });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub(crate) async fn is_dataset_dir(dir: &Path) -> bool {
    tokio::fs::metadata(dir.join(plan::DATASET_MARKER))
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, SyncError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, SyncError> {
        self.map_err(|source| SyncError::Io {
            path: path.into(),
            source,
        })
    }
}
