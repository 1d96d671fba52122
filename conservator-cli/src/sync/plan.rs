//! Pure helpers deciding which local names a collection level should contain.

use std::collections::BTreeSet;

use conservator_core::{Collection, DatasetRef, MediaFile};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

pub const ASSOCIATED_FILES_DIR: &str = "associated_files";
pub const VIDEO_METADATA_DIR: &str = "video_metadata";
/// A directory holding this file is a dataset working tree.
pub const DATASET_MARKER: &str = "index.json";

/// Remote listings of one collection, fetched once per level.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub videos: Vec<MediaFile>,
    pub images: Vec<MediaFile>,
    pub datasets: Vec<DatasetRef>,
}

impl Listing {
    pub fn media(&self) -> impl Iterator<Item = &MediaFile> {
        self.videos.iter().chain(self.images.iter())
    }

    pub fn has_media_named(&self, filename: &str) -> bool {
        self.media().any(|media| media.filename == filename)
    }

    pub fn video_for_metadata_file(&self, file_name: &str) -> Option<&MediaFile> {
        self.videos
            .iter()
            .find(|video| metadata_file_name(&video.filename) == file_name)
    }
}

/// Everything a download level is expected to leave on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelPlan {
    /// Direct entries of the collection directory.
    pub entries: BTreeSet<String>,
    pub associated_files: BTreeSet<String>,
    pub metadata_files: BTreeSet<String>,
}

impl LevelPlan {
    /// Child collection names are not known until recursion and are added
    /// through [`LevelPlan::add_child`].
    pub fn new(collection: &Collection, listing: &Listing) -> Self {
        let mut entries: BTreeSet<String> = [ASSOCIATED_FILES_DIR, VIDEO_METADATA_DIR]
            .into_iter()
            .map(str::to_string)
            .collect();
        entries.extend(listing.datasets.iter().map(|dataset| dataset.name.clone()));
        entries.extend(listing.media().map(|media| media.filename.clone()));

        Self {
            entries,
            associated_files: collection
                .file_locker_files
                .iter()
                .map(|file| file.name.clone())
                .collect(),
            metadata_files: listing
                .videos
                .iter()
                .map(|video| metadata_file_name(&video.filename))
                .collect(),
        }
    }

    pub fn add_child(&mut self, name: String) {
        self.entries.insert(name);
    }
}

/// Sidecar name for a media file: the last extension is replaced by `json`.
pub fn metadata_file_name(media_filename: &str) -> String {
    match media_filename.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.json"),
        None => "json".to_string(),
    }
}

/// Rewrites `videos[0].name` to `display_name` and pretty-prints the result
/// with four-space indentation, keeping the original key order.
///
/// Returns `Ok(None)` when the document has no first video object.
pub fn render_metadata(raw: &str, display_name: &str) -> Result<Option<String>, serde_json::Error> {
    let mut document: Value = serde_json::from_str(raw)?;
    let Some(first) = document
        .get_mut("videos")
        .and_then(|videos| videos.get_mut(0))
        .and_then(Value::as_object_mut)
    else {
        return Ok(None);
    };
    first.insert("name".to_string(), Value::String(display_name.to_string()));

    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    document.serialize(&mut serializer)?;
    // serde_json only emits valid UTF-8.
    Ok(Some(String::from_utf8_lossy(&out).into_owned()))
}

/// Content type for an associated file, or `None` when it is not uploadable.
pub fn associated_content_type(file_name: &str) -> Option<&'static str> {
    match extension(file_name)?.as_str() {
        "png" => Some("image/png"),
        "json" => Some("application/json"),
        "csv" => Some("text/csv"),
        _ => None,
    }
}

/// Content type for a media file at a collection root.
pub fn media_content_type(file_name: &str) -> Option<&'static str> {
    match extension(file_name)?.as_str() {
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "avi" => Some("video/x-msvideo"),
        "mkv" => Some("video/x-matroska"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
