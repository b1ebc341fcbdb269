use crate::error::{FleetError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// CredentialSnapshot
// ---------------------------------------------------------------------------

/// The credential files present in a source directory at collection time.
///
/// Files are opaque: only names are inspected. There is no versioning; the
/// snapshot is whatever the directory holds when [`collect`] walks it.
///
/// [`collect`]: CredentialSnapshot::collect
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub root: PathBuf,
    /// Paths relative to `root`, sorted.
    pub files: Vec<PathBuf>,
}

impl CredentialSnapshot {
    /// Recursively collect every regular file under `root` whose name ends
    /// with `suffix`. Symlinks are not followed.
    pub fn collect(root: &Path, suffix: &str) -> Result<Self> {
        if !root.is_dir() {
            return Err(FleetError::SourceMissing(root.display().to_string()));
        }
        let mut files = Vec::new();
        walk(root, Path::new(""), suffix, &mut files)?;
        files.sort();
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Like [`collect`](Self::collect) but an empty result is an error.
    pub fn collect_non_empty(root: &Path, suffix: &str) -> Result<Self> {
        let snap = Self::collect(root, suffix)?;
        if snap.is_empty() {
            return Err(FleetError::EmptySnapshot {
                dir: root.display().to_string(),
                suffix: suffix.to_string(),
            });
        }
        Ok(snap)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Files grouped by their relative parent directory (`""` for the root),
    /// each group as absolute local paths. Used to recreate the directory
    /// layout on the remote side.
    pub fn by_directory(&self) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for rel in &self.files {
            let parent = rel.parent().map(Path::to_path_buf).unwrap_or_default();
            groups.entry(parent).or_default().push(self.root.join(rel));
        }
        groups
    }
}

fn walk(base: &Path, rel: &Path, suffix: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(base.join(rel))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let child = rel.join(&name);
        if file_type.is_dir() {
            walk(base, &child, suffix, out)?;
        } else if file_type.is_file() && name.to_string_lossy().ends_with(suffix) {
            out.push(child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) {
        let p = dir.path().join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "{}").unwrap();
    }

    #[test]
    fn collects_matching_files_sorted() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "bob_cookies.json");
        touch(&dir, "alice_cookies.json");
        touch(&dir, "notes.txt");
        touch(&dir, "cookies.json.bak");
        let snap = CredentialSnapshot::collect(dir.path(), "_cookies.json").unwrap();
        assert_eq!(
            snap.files,
            vec![
                PathBuf::from("alice_cookies.json"),
                PathBuf::from("bob_cookies.json")
            ]
        );
    }

    #[test]
    fn recurses_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "alice_twitter_cookies.json");
        touch(&dir, "pool-2/carol_twitter_cookies.json");
        let snap = CredentialSnapshot::collect(dir.path(), "_cookies.json").unwrap();
        assert_eq!(snap.len(), 2);
        let groups = snap.by_directory();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[&PathBuf::from("pool-2")],
            vec![dir.path().join("pool-2/carol_twitter_cookies.json")]
        );
        assert_eq!(
            groups[&PathBuf::new()],
            vec![dir.path().join("alice_twitter_cookies.json")]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = CredentialSnapshot::collect(&dir.path().join("nope"), "_cookies.json").unwrap_err();
        assert!(matches!(err, FleetError::SourceMissing(_)));
    }

    #[test]
    fn empty_directory_is_valid_but_not_non_empty() {
        let dir = TempDir::new().unwrap();
        let snap = CredentialSnapshot::collect(dir.path(), "_cookies.json").unwrap();
        assert!(snap.is_empty());
        let err = CredentialSnapshot::collect_non_empty(dir.path(), "_cookies.json").unwrap_err();
        assert!(matches!(err, FleetError::EmptySnapshot { .. }));
    }
}
