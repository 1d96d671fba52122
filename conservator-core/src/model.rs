use serde::{Deserialize, Serialize};

/// A node of the remote collection tree.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub file_locker_files: Vec<FileLockerFile>,
}

/// An associated file attached to a collection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileLockerFile {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatasetRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Image];

    /// Name of the paged GraphQL field listing this kind of media.
    pub fn collection_field(self) -> &'static str {
        match self {
            MediaKind::Video => "videos",
            MediaKind::Image => "images",
        }
    }
}

/// A video or image as listed inside a collection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MediaFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
}

impl MediaFile {
    /// Display name, falling back to the file name when the server has none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.filename)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    #[serde(default)]
    pub url: Option<String>,
    pub signed_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CreatedMedia {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
}
