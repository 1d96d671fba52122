use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Entries of `dir` whose names are not in `expected`, in name order.
///
/// With `files_only`, directories are never reported.
pub async fn stale_entries(
    dir: &Path,
    expected: &BTreeSet<String>,
    files_only: bool,
) -> io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut stale = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_str().is_some_and(|name| expected.contains(name)) {
            continue;
        }
        if files_only && entry.file_type().await?.is_dir() {
            continue;
        }
        stale.push(entry.path());
    }
    stale.sort();
    Ok(stale)
}

/// Removes everything in `dir` not named in `expected`. Returns the removed paths.
pub async fn prune_dir(
    dir: &Path,
    expected: &BTreeSet<String>,
    files_only: bool,
) -> io::Result<Vec<PathBuf>> {
    let stale = stale_entries(dir, expected, files_only).await?;
    for path in &stale {
        tracing::info!(path = %path.display(), "removing stale entry");
        remove_entry(path).await?;
    }
    Ok(stale)
}

/// Removes a file, falling back to recursive removal for directories.
pub async fn remove_entry(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let is_dir = tokio::fs::symlink_metadata(path)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if is_dir {
                tokio::fs::remove_dir_all(path).await
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn removes_unexpected_files_and_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        std::fs::write(dir.path().join("stale.txt"), b"s").unwrap();
        std::fs::create_dir_all(dir.path().join("old/nested")).unwrap();
        std::fs::write(dir.path().join("old/nested/file"), b"x").unwrap();

        let removed = prune_dir(dir.path(), &names(&["keep.txt"]), false)
            .await
            .unwrap();

        assert_eq!(removed, vec![dir.path().join("old"), dir.path().join("stale.txt")]);
        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("old").exists());
    }

    #[tokio::test]
    async fn files_only_leaves_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stale.json"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        prune_dir(dir.path(), &BTreeSet::new(), true).await.unwrap();

        assert!(!dir.path().join("stale.json").exists());
        assert!(dir.path().join("sub").exists());
    }

    #[tokio::test]
    async fn missing_directory_has_nothing_stale() {
        let dir = tempdir().unwrap();
        let stale = stale_entries(&dir.path().join("absent"), &BTreeSet::new(), false)
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
