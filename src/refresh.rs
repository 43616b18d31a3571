//! One-shot refresh of the cache tree against the origin.
//!
//! Every cached file is fetched again and compared byte-for-byte with the
//! local copy; differing files are overwritten.  Entries are never deleted,
//! including those the origin no longer serves.

use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{info, warn};

use crate::cache::store::{self, CacheEntry};
use crate::origin::OriginClient;

/// Default number of origin fetches in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub unchanged: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Unchanged,
    Updated,
    Failed,
}

/// Refresh every entry under `root` from `origin`.
///
/// Per-entry failures are logged and counted; only failing to enumerate the
/// tree is an error.
pub async fn run_refresh(
    root: &Path,
    origin: &OriginClient,
    concurrency: usize,
) -> Result<RefreshReport> {
    let walk_root = root.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || store::list_entries(&walk_root))
        .await
        .context("cache walk task panicked")??;

    info!(
        root = %root.display(),
        entries = entries.len(),
        origin = %origin.prefix(),
        "refreshing cache from origin"
    );

    let outcomes: Vec<EntryOutcome> = futures::stream::iter(entries)
        .map(|entry| async move { refresh_entry(origin, &entry).await })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = RefreshReport {
        checked: outcomes.len(),
        ..RefreshReport::default()
    };
    for outcome in outcomes {
        match outcome {
            EntryOutcome::Unchanged => report.unchanged += 1,
            EntryOutcome::Updated => report.updated += 1,
            EntryOutcome::Failed => report.failed += 1,
        }
    }

    info!(
        checked = report.checked,
        unchanged = report.unchanged,
        updated = report.updated,
        failed = report.failed,
        "refresh finished"
    );
    Ok(report)
}

async fn refresh_entry(origin: &OriginClient, entry: &CacheEntry) -> EntryOutcome {
    let fresh = match origin.fetch_bytes(&entry.logical_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, path = %entry.path.display(), "refresh fetch failed");
            return EntryOutcome::Failed;
        }
    };

    let current = match tokio::fs::read(&entry.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, path = %entry.path.display(), "failed to read cached file");
            return EntryOutcome::Failed;
        }
    };

    if current == fresh {
        info!(path = %entry.path.display(), "up to date");
        return EntryOutcome::Unchanged;
    }

    match store::write_through(&entry.path, fresh).await {
        Ok(()) => {
            info!(path = %entry.path.display(), "changed on origin, updated");
            EntryOutcome::Updated
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), path = %entry.path.display(), "failed to update cached file");
            EntryOutcome::Failed
        }
    }
}
