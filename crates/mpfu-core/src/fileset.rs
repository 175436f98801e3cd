//! Local file selection.
//!
//! Accepted pattern forms:
//! - a bare filename or wildcard relative to the base directory (`*.log`)
//! - an absolute path ending in a wildcard (`/var/out/*.csv`)
//! - an absolute path to one existing file (`/var/out/report.csv`)
//!
//! Directories matched by the pattern are dropped; zero matches is a valid,
//! empty set.

use crate::error::{UploadError, UploadResult};
use std::path::{Path, PathBuf};

/// Ordered list of absolute local file paths, shared read-only by every
/// destination of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: Vec<PathBuf>,
}

impl FileSet {
    pub fn resolve(base_dir: &Path, pattern: &str) -> UploadResult<Self> {
        let (dir, file_pattern) = split_pattern(base_dir, pattern.trim());

        if !dir.is_dir() {
            return Err(UploadError::invalid_local_path(format!(
                "local directory '{}' does not exist",
                dir.display()
            )));
        }

        let full = dir.join(&file_pattern);
        let full_str = full.to_str().ok_or_else(|| {
            UploadError::invalid_local_path(format!("path '{}' is not valid UTF-8", full.display()))
        })?;

        let entries = glob::glob(full_str).map_err(|e| {
            UploadError::invalid_local_path(format!("invalid file pattern '{}': {}", file_pattern, e))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    files.push(std::fs::canonicalize(&path).unwrap_or(path));
                }
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable match: {}", e),
            }
        }

        log::debug!("Resolved {} file(s) for '{}'", files.len(), full.display());
        Ok(Self { files })
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of the sizes of every file, skipping ones that vanished.
    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .sum()
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Split a pattern into the directory to search and the file-name glob.
fn split_pattern(base_dir: &Path, pattern: &str) -> (PathBuf, String) {
    if pattern.is_empty() {
        return (base_dir.to_path_buf(), "*".into());
    }

    let path = Path::new(pattern);
    let rooted = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };

    if rooted.is_dir() && !has_glob_chars(pattern) {
        return (rooted, "*".into());
    }

    match (rooted.parent(), rooted.file_name()) {
        (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
        _ => (base_dir.to_path_buf(), pattern.to_string()),
    }
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Local directory tree for directory-mode uploads. Paths are relative to
/// the root's parent and use `/`, so the root directory itself is recreated
/// remotely.
#[derive(Debug, Clone, Default)]
pub struct DirectoryTree {
    pub root: PathBuf,
    /// Parents always precede their children.
    pub directories: Vec<String>,
    pub files: Vec<(PathBuf, String)>,
}

impl DirectoryTree {
    pub fn scan(root: &Path) -> UploadResult<Self> {
        if !root.is_dir() {
            return Err(UploadError::invalid_local_path(format!(
                "local directory '{}' does not exist",
                root.display()
            )));
        }
        let root = std::fs::canonicalize(root)?;
        let anchor = root.parent().unwrap_or(&root).to_path_buf();

        let mut tree = DirectoryTree {
            root: root.clone(),
            ..Default::default()
        };
        for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                UploadError::invalid_local_path(format!("cannot walk '{}': {}", root.display(), e))
            })?;
            let relative = match entry.path().strip_prefix(&anchor) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => continue,
            };
            if entry.file_type().is_dir() {
                tree.directories.push(relative);
            } else if entry.file_type().is_file() {
                tree.files.push((entry.into_path(), relative));
            }
        }
        Ok(tree)
    }
}

/// File name sent to the remote side for a local path.
pub fn remote_name(local: &Path) -> UploadResult<String> {
    local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::invalid_local_path(format!("'{}' has no file name", local.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"bravo!").unwrap();
        fs::write(dir.path().join("c.log"), b"log").unwrap();
        fs::create_dir(dir.path().join("d.txt")).unwrap();
        dir
    }

    fn names(set: &FileSet) -> Vec<String> {
        let mut names: Vec<String> = set
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn relative_wildcard_excludes_directories() {
        let dir = fixture();
        let set = FileSet::resolve(dir.path(), "*.txt").unwrap();
        assert_eq!(names(&set), vec!["a.txt", "b.txt"]);
        assert!(set.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn absolute_wildcard() {
        let dir = fixture();
        let pattern = format!("{}/*.log", dir.path().display());
        let set = FileSet::resolve(Path::new("/nonexistent-base"), &pattern).unwrap();
        assert_eq!(names(&set), vec!["c.log"]);
    }

    #[test]
    fn absolute_single_file() {
        let dir = fixture();
        let pattern = dir.path().join("b.txt");
        let set = FileSet::resolve(Path::new("/"), pattern.to_str().unwrap()).unwrap();
        assert_eq!(names(&set), vec!["b.txt"]);
        assert_eq!(set.total_bytes(), 6);
    }

    #[test]
    fn zero_matches_is_empty_not_error() {
        let dir = fixture();
        let set = FileSet::resolve(dir.path(), "*.csv").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn missing_base_dir_is_invalid_local_path() {
        let err = FileSet::resolve(Path::new("/no/such/dir/anywhere"), "*").unwrap_err();
        assert_eq!(err.kind, crate::error::UploadErrorKind::InvalidLocalPath);
    }

    #[test]
    fn empty_pattern_selects_all_files() {
        let dir = fixture();
        let set = FileSet::resolve(dir.path(), "").unwrap();
        assert_eq!(names(&set), vec!["a.txt", "b.txt", "c.log"]);
    }

    #[test]
    fn directory_tree_lists_parents_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("README"), b"r").unwrap();
        fs::write(root.join("src/main.rs"), b"m").unwrap();
        fs::write(root.join("src/nested/x.rs"), b"x").unwrap();

        let tree = DirectoryTree::scan(&root).unwrap();
        assert_eq!(tree.directories, vec!["proj", "proj/src", "proj/src/nested"]);
        let mut rel: Vec<&str> = tree.files.iter().map(|(_, r)| r.as_str()).collect();
        rel.sort();
        assert_eq!(rel, vec!["proj/README", "proj/src/main.rs", "proj/src/nested/x.rs"]);
    }

    #[test]
    fn directory_tree_requires_directory() {
        assert!(DirectoryTree::scan(Path::new("/no/such/tree")).is_err());
    }

    #[test]
    fn remote_name_is_basename() {
        assert_eq!(remote_name(Path::new("/tmp/x/report.csv")).unwrap(), "report.csv");
    }
}
