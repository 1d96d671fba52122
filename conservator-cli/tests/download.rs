use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use conservator_cli::sync::{DatasetError, DatasetRepository, Downloader, SyncError, SyncFlags};
use conservator_core::test_support::InMemoryTree;
use conservator_core::{DatasetRef, MediaKind};
use tempfile::tempdir;

#[derive(Default)]
struct RecordingDatasets {
    pulls: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait::async_trait]
impl DatasetRepository for RecordingDatasets {
    async fn pull(&self, dataset: &DatasetRef, target: &Path) -> Result<(), DatasetError> {
        std::fs::create_dir_all(target).unwrap();
        std::fs::write(target.join("index.json"), b"{}").unwrap();
        self.pulls
            .lock()
            .unwrap()
            .push((dataset.id.clone(), target.to_path_buf()));
        Ok(())
    }

    async fn push(&self, _working_tree: &Path) -> Result<(), DatasetError> {
        Ok(())
    }
}

/// /Project/root with children A (empty) and B (one associated file).
fn sample_tree() -> InMemoryTree {
    let tree = InMemoryTree::new();
    tree.add_collection(None, "p", "Project");
    tree.add_collection(Some("p"), "root", "root");
    tree.add_collection(Some("root"), "a", "A");
    tree.add_collection(Some("root"), "b", "B");
    tree.attach_file("b", "notes.csv", b"x,y\n1,2\n");
    tree
}

/// Relative path of every entry under `root`, directories suffixed with `/`.
fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path
                .strip_prefix(base)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                out.insert(format!("{rel}/"), None);
                walk(base, &path, out);
            } else {
                out.insert(rel, Some(std::fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn paths(root: &Path) -> Vec<String> {
    snapshot(root).into_keys().collect()
}

#[tokio::test]
async fn associated_files_land_in_each_collection() {
    let tree = sample_tree();
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let flags = SyncFlags {
        include_associated_files: true,
        ..SyncFlags::default()
    };

    let root = Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();

    assert_eq!(root, out.path().join("root"));
    assert_eq!(
        paths(&root),
        [
            "A/",
            "A/associated_files/",
            "A/video_metadata/",
            "B/",
            "B/associated_files/",
            "B/associated_files/notes.csv",
            "B/video_metadata/",
            "associated_files/",
            "video_metadata/",
        ]
    );
    assert_eq!(
        std::fs::read(root.join("B/associated_files/notes.csv")).unwrap(),
        b"x,y\n1,2\n"
    );
}

#[tokio::test]
async fn delete_prunes_only_when_enabled() {
    let tree = sample_tree();
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let root = out.path().join("root");
    std::fs::create_dir_all(root.join("gone/deep")).unwrap();
    std::fs::write(root.join("stale.txt"), b"old").unwrap();
    std::fs::create_dir_all(root.join("B/associated_files")).unwrap();
    std::fs::write(root.join("B/associated_files/removed.csv"), b"old").unwrap();

    Downloader::new(&tree, &datasets, SyncFlags::default())
        .download("/Project/root", out.path())
        .await
        .unwrap();
    assert!(root.join("stale.txt").exists());
    assert!(root.join("gone/deep").exists());
    assert!(root.join("B/associated_files/removed.csv").exists());

    let flags = SyncFlags {
        delete: true,
        ..SyncFlags::default()
    };
    Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();
    assert!(!root.join("stale.txt").exists());
    assert!(!root.join("gone").exists());
    assert!(!root.join("B/associated_files/removed.csv").exists());
    assert!(root.join("A/associated_files").is_dir());
}

#[tokio::test]
async fn repeated_download_with_delete_is_stable() {
    let tree = sample_tree();
    tree.add_media("root", MediaKind::Video, "v1", "clip.mp4", Some("Clip"), b"frames");
    tree.set_video_metadata("v1", r#"{"videos":[{"name":"x"}]}"#);
    tree.add_dataset("root", "d1", "cars");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let flags = SyncFlags {
        include_datasets: true,
        include_video_metadata: true,
        include_associated_files: true,
        include_media: true,
        delete: true,
        create: false,
    };
    let downloader = Downloader::new(&tree, &datasets, flags);

    let root = downloader.download("/Project/root", out.path()).await.unwrap();
    let first = snapshot(&root);
    downloader.download("/Project/root", out.path()).await.unwrap();
    let second = snapshot(&root);

    assert_eq!(first, second);
    assert!(first.contains_key("clip.mp4"));
    assert!(first.contains_key("cars/index.json"));
    assert!(first.contains_key("video_metadata/clip.json"));
}

#[tokio::test]
async fn metadata_is_renamed_to_display_name() {
    let tree = sample_tree();
    tree.add_media("root", MediaKind::Video, "v1", "flight.01.mp4", Some("Morning flight"), b"");
    tree.set_video_metadata(
        "v1",
        r#"{"videos":[{"name":"upload-1234","frames":[{"id":1}]}],"attributes":{}}"#,
    );
    tree.add_media("root", MediaKind::Video, "v2", "bare.mov", None, b"");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let flags = SyncFlags {
        include_video_metadata: true,
        ..SyncFlags::default()
    };

    let root = Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();

    let written = std::fs::read_to_string(root.join("video_metadata/flight.01.json")).unwrap();
    assert!(written.starts_with("{\n    \"videos\": ["));
    assert!(!written.ends_with('\n'));
    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed["videos"][0]["name"], "Morning flight");
    assert_eq!(parsed["videos"][0]["frames"][0]["id"], 1);
    assert!(!root.join("video_metadata/bare.json").exists());
}

#[tokio::test]
async fn missing_metadata_keeps_existing_sidecar() {
    let tree = sample_tree();
    tree.add_media("root", MediaKind::Video, "v1", "clip.mp4", None, b"");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let sidecar = out.path().join("root/video_metadata/clip.json");
    std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
    std::fs::write(&sidecar, b"{}").unwrap();
    let flags = SyncFlags {
        include_video_metadata: true,
        delete: true,
        ..SyncFlags::default()
    };

    Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&sidecar).unwrap(), b"{}");
}

#[tokio::test]
async fn media_and_datasets_are_fetched_into_collection_root() {
    let tree = sample_tree();
    tree.add_media("a", MediaKind::Video, "v1", "clip.mp4", None, b"video");
    tree.add_media("a", MediaKind::Image, "i1", "frame.jpg", None, b"image");
    tree.add_dataset("a", "d1", "cars");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    let flags = SyncFlags {
        include_media: true,
        include_datasets: true,
        ..SyncFlags::default()
    };

    let root = Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(root.join("A/clip.mp4")).unwrap(), b"video");
    assert_eq!(std::fs::read(root.join("A/frame.jpg")).unwrap(), b"image");
    assert_eq!(
        *datasets.pulls.lock().unwrap(),
        vec![("d1".to_string(), root.join("A/cars"))]
    );
}

#[tokio::test]
async fn dataset_directories_survive_pruning_without_the_flag() {
    let tree = sample_tree();
    tree.add_dataset("root", "d1", "cars");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();
    std::fs::create_dir_all(out.path().join("root/cars")).unwrap();
    let flags = SyncFlags {
        delete: true,
        ..SyncFlags::default()
    };

    Downloader::new(&tree, &datasets, flags)
        .download("/Project/root", out.path())
        .await
        .unwrap();

    assert!(out.path().join("root/cars").is_dir());
    assert!(datasets.pulls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let tree = sample_tree();
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();

    let err = Downloader::new(&tree, &datasets, SyncFlags::default())
        .download("/Project/missing", out.path())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Collection /Project/missing not found!");
}

#[tokio::test]
async fn unsafe_collection_names_are_rejected() {
    let tree = sample_tree();
    tree.add_collection(Some("a"), "evil", "..");
    let datasets = RecordingDatasets::default();
    let out = tempdir().unwrap();

    let err = Downloader::new(&tree, &datasets, SyncFlags::default())
        .download("/Project/root", out.path())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Path(_)));
}
