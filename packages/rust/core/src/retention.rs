//! Age-based cleanup of exported files.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Remove entries of `dir` last modified more than `days` days ago.
///
/// Directories are removed recursively. Entries that cannot be inspected or
/// removed are skipped. Returns how many entries were removed; a missing
/// `dir` removes nothing.
pub fn cleanup_old_files(dir: &Path, days: u64) -> usize {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!(dir = %dir.display(), "nothing to clean");
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified >= cutoff {
            continue;
        }

        let path = entry.path();
        let result = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed expired entry");
                removed += 1;
            }
            Err(e) => debug!(path = %path.display(), error = %e, "could not remove entry"),
        }
    }

    info!(dir = %dir.display(), days, removed, "retention cleanup done");
    removed
}
