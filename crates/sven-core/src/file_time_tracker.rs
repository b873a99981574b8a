// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Detects a write/edit racing against an on-disk change the agent never
//! saw (§4.5 file-modification race detection).
//!
//! Every successful read-class tool call records the file's mtime and size.
//! A later write/edit-class call on the same path is rejected if the file
//! has changed since — most often because a human, another process, or a
//! sibling sub-agent edited it out from under the conversation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("file modified on disk since it was last read: {path}")]
pub struct FileModifiedError {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    mtime: Option<SystemTime>,
    size: u64,
}

/// Per-session tracker. One instance is shared across every tool call made
/// within the same session.
#[derive(Default)]
pub struct FileTimeTracker {
    seen: Mutex<HashMap<PathBuf, Snapshot>>,
}

impl FileTimeTracker {
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()) }
    }

    /// Record the current on-disk state of `path` as "known to the agent".
    /// Called after a successful read, and again after a successful write so
    /// the new state becomes the new baseline.
    pub fn record(&self, path: &Path) {
        let snapshot = snapshot_of(path);
        self.seen.lock().unwrap().insert(path.to_path_buf(), snapshot);
    }

    /// Forget everything tracked for `path` (e.g. after it is deleted).
    pub fn forget(&self, path: &Path) {
        self.seen.lock().unwrap().remove(path);
    }

    /// Checks that `path` has not changed on disk since it was last
    /// recorded. Returns `Ok(())` if the path was never recorded — the
    /// tracker only guards paths the agent has actually observed.
    pub fn check(&self, path: &Path) -> Result<(), FileModifiedError> {
        let seen = self.seen.lock().unwrap();
        let Some(prior) = seen.get(path) else { return Ok(()) };
        let current = snapshot_of(path);
        if current != *prior {
            return Err(FileModifiedError { path: path.to_path_buf() });
        }
        Ok(())
    }
}

fn snapshot_of(path: &Path) -> Snapshot {
    match std::fs::metadata(path) {
        Ok(meta) => Snapshot { mtime: meta.modified().ok(), size: meta.len() },
        Err(_) => Snapshot { mtime: None, size: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tmp_path() -> PathBuf {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("sven_ftt_test_{}_{n}.txt", std::process::id()))
    }

    #[test]
    fn unrecorded_path_always_passes() {
        let tracker = FileTimeTracker::new();
        assert!(tracker.check(Path::new("/tmp/never-seen-by-tracker")).is_ok());
    }

    #[test]
    fn unchanged_file_passes() {
        let path = tmp_path();
        std::fs::write(&path, "a").unwrap();
        let tracker = FileTimeTracker::new();
        tracker.record(&path);
        assert!(tracker.check(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn content_change_is_detected() {
        let path = tmp_path();
        std::fs::write(&path, "a").unwrap();
        let tracker = FileTimeTracker::new();
        tracker.record(&path);

        // Sleep isn't reliable across filesystems with coarse mtime
        // resolution, so force a size change too — the check is OR'd.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "more content, different size").unwrap();
        drop(f);

        assert!(tracker.check(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn recording_again_resets_the_baseline() {
        let path = tmp_path();
        std::fs::write(&path, "a").unwrap();
        let tracker = FileTimeTracker::new();
        tracker.record(&path);
        std::fs::write(&path, "a longer replacement").unwrap();
        assert!(tracker.check(&path).is_err());
        tracker.record(&path);
        assert!(tracker.check(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn deleted_file_is_detected_as_modified() {
        let path = tmp_path();
        std::fs::write(&path, "a").unwrap();
        let tracker = FileTimeTracker::new();
        tracker.record(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(tracker.check(&path).is_err());
    }

    #[test]
    fn forget_drops_tracking_for_path() {
        let path = tmp_path();
        std::fs::write(&path, "a").unwrap();
        let tracker = FileTimeTracker::new();
        tracker.record(&path);
        std::fs::write(&path, "changed").unwrap();
        tracker.forget(&path);
        assert!(tracker.check(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }
}
