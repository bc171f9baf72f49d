//! Portable path helpers shared by trackers, the modifier engine, and
//! deployers: splitting a relative path into its directory components,
//! duplicating a file into a staging tree, and safe removal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Split a `/`-joined relative path into its named components, innermost
/// directory last. Used by the FTP deployer to create parent directory
/// chains top-down (`a`, `a/b`, `a/b/c`, ...).
pub fn explode(relative_dir: &str) -> Vec<String> {
    relative_dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// All path prefixes of a relative directory, shortest first: for `a/b/c`,
/// yields `a`, `a/b`, `a/b/c`.
pub fn prefixes(relative_dir: &str) -> Vec<String> {
    let parts = explode(relative_dir);
    (1..=parts.len())
        .map(|n| parts[..n].join("/"))
        .collect()
}

/// Copy `source` (an absolute path) into `staging_dir` at `relative`,
/// creating any parent directories needed. Returns `true` if a copy was
/// actually performed (the source exists); callers only emit an action for
/// a path once it is actually staged.
pub fn duplicate(source: &Path, staging_dir: &Path, relative: &str) -> Result<bool> {
    if !source.is_file() {
        return Ok(false);
    }

    let destination = staging_dir.join(relative);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    fs::copy(source, &destination).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;

    Ok(true)
}

/// Remove a file or directory tree, tolerating "already gone".
pub fn remove(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if path.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory {}", path.display()))
    } else {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file {}", path.display()))
    }
}

/// Join two path fragments and normalize the result (collapsing `.`/`..`).
pub fn join_normalized(base: &Path, relative: &str) -> PathBuf {
    let joined = base.join(relative);
    let mut result = PathBuf::new();

    for component in joined.components() {
        use std::path::Component::*;
        match component {
            CurDir => continue,
            ParentDir => {
                result.pop();
            }
            other => result.push(other.as_os_str()),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explode_splits_on_slash() {
        assert_eq!(explode("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(explode(""), Vec::<String>::new());
    }

    #[test]
    fn prefixes_are_cumulative() {
        assert_eq!(
            prefixes("a/b/c"),
            vec!["a".to_string(), "a/b".to_string(), "a/b/c".to_string()]
        );
    }

    #[test]
    fn duplicate_copies_into_staging_and_creates_parents() {
        let td = tempfile::tempdir().unwrap();
        let source_dir = td.path().join("source");
        let staging_dir = td.path().join("staging");
        fs::create_dir_all(&source_dir).unwrap();
        fs::write(source_dir.join("file.txt"), b"hello").unwrap();

        let copied = duplicate(
            &source_dir.join("file.txt"),
            &staging_dir,
            "nested/file.txt",
        )
        .unwrap();

        assert!(copied);
        assert_eq!(
            fs::read(staging_dir.join("nested/file.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn duplicate_returns_false_for_missing_source() {
        let td = tempfile::tempdir().unwrap();
        let copied = duplicate(&td.path().join("missing"), &td.path().join("out"), "x").unwrap();
        assert!(!copied);
    }

    #[test]
    fn remove_tolerates_missing_path() {
        let td = tempfile::tempdir().unwrap();
        remove(&td.path().join("nope")).unwrap();
    }

    #[test]
    fn join_normalized_collapses_dot_dot() {
        let base = Path::new("/a/b");
        assert_eq!(join_normalized(base, "../c"), PathBuf::from("/a/c"));
        assert_eq!(join_normalized(base, "./d"), PathBuf::from("/a/b/d"));
    }
}
