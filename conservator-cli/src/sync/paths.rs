use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("name `{0}` cannot be used as a local file name")]
    UnsupportedComponent(String),
}

/// Checks that a remote name maps to exactly one local path component.
pub fn local_component(name: &str) -> Result<&str, PathError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}

/// Splits a POSIX-like remote path ("/Project/A/B") into its names.
pub fn remote_components(remote_path: &str) -> Result<Vec<&str>, PathError> {
    let parts: Vec<&str> = remote_path.split('/').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts)
}

pub fn join_remote(parent: &str, name: &str) -> String {
    format!("{}/{name}", parent.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert_eq!(local_component("notes.csv"), Ok("notes.csv"));
        assert_eq!(local_component(".hidden"), Ok(".hidden"));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for name in ["", ".", "..", "a/b", "../secret", "a\\b"] {
            assert!(
                matches!(local_component(name), Err(PathError::UnsupportedComponent(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn splits_remote_paths() {
        assert_eq!(remote_components("/Project/A/").unwrap(), ["Project", "A"]);
        assert_eq!(remote_components("//"), Err(PathError::Empty));
        assert_eq!(join_remote("/Project/", "A"), "/Project/A");
    }
}
