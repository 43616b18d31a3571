//! Maps request paths onto the on-disk cache tree.
//!
//! The cache mirrors the origin's URL space: `/a/b.js` lives at
//! `{root}/a/b.js` and the directory request `/a/` at `{root}/a/index.html`.
//! Query strings never take part in the mapping.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// File served for directory requests.
pub const INDEX_FILE: &str = "index.html";

/// A request path that cannot be mapped into the cache root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("path traversal rejected: {0:?}")]
    Traversal(String),
    #[error("invalid character in path: {0:?}")]
    InvalidSegment(String),
    #[error("path resolves outside the cache root: {0:?}")]
    OutsideRoot(String),
}

/// Outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Where the cache entry for this request lives (or will live).
    pub local_path: PathBuf,
    /// `true` when the request names a directory and `local_path` is its
    /// `index.html`.
    pub directory_index: bool,
}

/// Resolves request paths against a canonical cache root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create the cache root if needed and pin its canonical form.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create cache root: {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize cache root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Canonical cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `request_path` (as received, query string included) to its cache
    /// location.
    pub fn resolve(&self, request_path: &str) -> Result<Resolved, ResolveError> {
        let path = strip_query(request_path);
        let mut directory_index = path.ends_with('/') || path.is_empty();

        let mut local_path = self.root.clone();
        let mut ends_in_current_dir = false;
        for segment in path.split('/') {
            match segment {
                "" => continue,
                s if is_current_dir(s) => {
                    ends_in_current_dir = true;
                    continue;
                }
                ".." => return Err(ResolveError::Traversal(request_path.to_owned())),
                s if is_encoded_parent(s) => {
                    return Err(ResolveError::Traversal(request_path.to_owned()));
                }
                s if s.contains(['\\', '\0']) => {
                    return Err(ResolveError::InvalidSegment(request_path.to_owned()));
                }
                s => {
                    ends_in_current_dir = false;
                    local_path.push(s);
                }
            }
        }

        // `/game/.` names the directory, the same way the origin normalizes it.
        if directory_index || ends_in_current_dir || local_path.is_dir() {
            local_path.push(INDEX_FILE);
            directory_index = true;
        }

        self.confine(&local_path, request_path)?;

        Ok(Resolved {
            local_path,
            directory_index,
        })
    }

    /// Require the deepest existing ancestor of `candidate` to canonicalize
    /// under the root, so symlinks cannot lead out of the cache tree.
    fn confine(&self, candidate: &Path, request_path: &str) -> Result<(), ResolveError> {
        let mut probe = candidate;
        loop {
            if let Ok(real) = probe.canonicalize() {
                if real.starts_with(&self.root) {
                    return Ok(());
                }
                return Err(ResolveError::OutsideRoot(request_path.to_owned()));
            }
            probe = probe
                .parent()
                .ok_or_else(|| ResolveError::OutsideRoot(request_path.to_owned()))?;
        }
    }
}

/// Drop everything from the first `?` onward.
pub fn strip_query(request_path: &str) -> &str {
    request_path
        .split_once('?')
        .map_or(request_path, |(path, _)| path)
}

/// `.` or its encoded form `%2e`, which origins drop during normalization.
pub fn is_current_dir(segment: &str) -> bool {
    segment == "." || segment.eq_ignore_ascii_case("%2e")
}

/// `%2e%2e`, `.%2E` and friends: origins decode these to `..`.
fn is_encoded_parent(segment: &str) -> bool {
    segment.len() > 2
        && segment.contains('%')
        && segment.to_ascii_lowercase().replace("%2e", ".") == ".."
}
