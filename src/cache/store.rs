//! On-disk cache entries: atomic write-through and tree enumeration.
//!
//! Entries are whole files.  Every write goes to a uniquely named temp file
//! next to the destination and is renamed into place, so concurrent writers
//! of the same entry race harmlessly (last rename wins) and readers never
//! observe a partially written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::debug;
use walkdir::WalkDir;

use super::resolver::INDEX_FILE;

const TEMP_PREFIX: &str = ".lazymirror-";
const TEMP_SUFFIX: &str = ".tmp";

// ---------------------------------------------------------------------------
// Write-through
// ---------------------------------------------------------------------------

/// Persist `bytes` at `path`, creating parent directories as needed.
pub async fn write_through(path: &Path, bytes: Bytes) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
        .await
        .context("cache write task panicked")?
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("cache path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.flush()?;

    // Dropping the temp file on any earlier error removes it.
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to move cache entry into place: {}", path.display()))?;

    debug!(path = %path.display(), bytes = bytes.len(), "cache entry written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

/// A file in the cache tree together with the request path it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub logical_path: String,
}

/// List every cache entry under `root`, skipping in-flight temp files.
pub fn list_entries(root: &Path) -> Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk cache tree: {}", root.display()))?;
        if !entry.file_type().is_file() || is_temp_file(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        entries.push(CacheEntry {
            path: entry.path().to_path_buf(),
            logical_path: logical_path(relative),
        });
    }

    entries.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));
    Ok(entries)
}

/// Map a root-relative file path back to the request path that produced it.
///
/// `game/index.html` becomes `/game/` so the origin sees the same directory
/// request it answered originally.
pub fn logical_path(relative: &Path) -> String {
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let mut logical = String::from("/");
    logical.push_str(&segments.join("/"));
    if let Some(dir) = logical.strip_suffix(INDEX_FILE) {
        if dir.ends_with('/') {
            return dir.to_owned();
        }
    }
    logical
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_through_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c/index.html");

        write_through(&target, Bytes::from_static(b"HELLO")).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"HELLO");
    }

    #[tokio::test]
    async fn write_through_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.js");
        std::fs::write(&target, b"old").unwrap();

        write_through(&target, Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn write_through_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"file").unwrap();

        let result = write_through(&dir.path().join("a/b.js"), Bytes::from_static(b"x")).await;

        assert!(result.is_err());
    }

    #[test]
    fn logical_path_maps_index_to_directory() {
        assert_eq!(logical_path(Path::new("game/index.html")), "/game/");
        assert_eq!(logical_path(Path::new("index.html")), "/");
        assert_eq!(logical_path(Path::new("game/main.js")), "/game/main.js");
        assert_eq!(
            logical_path(Path::new("game/notindex.html")),
            "/game/notindex.html"
        );
    }

    #[test]
    fn list_entries_skips_temp_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("game/empty")).unwrap();
        std::fs::write(dir.path().join("game/index.html"), b"a").unwrap();
        std::fs::write(dir.path().join("game/main.js"), b"b").unwrap();
        std::fs::write(dir.path().join("game/.lazymirror-abc.tmp"), b"c").unwrap();

        let entries = list_entries(dir.path()).unwrap();
        let logical: Vec<_> = entries.iter().map(|e| e.logical_path.as_str()).collect();

        assert_eq!(logical, vec!["/game/", "/game/main.js"]);
    }
}
