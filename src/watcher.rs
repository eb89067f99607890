//! Polling folder watcher.
//!
//! Each cycle picks the most recently modified file whose name matches the
//! glob pattern. A candidate whose path or modification time differs from the
//! last accepted file is only accepted once its modification time is the same
//! before and after the settle delay, so files still being written are left
//! for a later cycle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{DashError, Result};

/// Translate a file-name glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

fn modified_at(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

pub struct FolderWatcher {
    folder: PathBuf,
    pattern: Regex,
    settle: Duration,
    current_file: Option<PathBuf>,
    last_modified: Option<SystemTime>,
}

impl FolderWatcher {
    pub fn new(folder: impl Into<PathBuf>, pattern: &str, settle: Duration) -> Result<Self> {
        Ok(Self {
            folder: folder.into(),
            pattern: glob_to_regex(pattern)?,
            settle,
            current_file: None,
            last_modified: None,
        })
    }

    /// Newest matching regular file. Entries that cannot be stat'ed are skipped.
    pub fn latest_match(&self) -> Result<Option<(PathBuf, SystemTime)>> {
        let mut latest: Option<(PathBuf, SystemTime)> = None;
        for entry in std::fs::read_dir(&self.folder)? {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Office lock files share the workbook's extension.
            if name.starts_with("~$") || !self.pattern.is_match(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else { continue };
            if latest.as_ref().map_or(true, |(_, t)| modified > *t) {
                latest = Some((entry.path(), modified));
            }
        }
        Ok(latest)
    }

    /// One watch cycle. Returns the path when a new or modified file has
    /// settled.
    pub fn poll(&mut self) -> Option<PathBuf> {
        self.poll_with(thread::sleep)
    }

    /// Like [`poll`](Self::poll) with the settle wait supplied by the caller.
    pub fn poll_with(&mut self, wait: impl FnOnce(Duration)) -> Option<PathBuf> {
        let (path, modified) = match self.latest_match() {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!(folder = %self.folder.display(), "no matching file");
                return None;
            }
            Err(e) => {
                warn!(folder = %self.folder.display(), error = %e, "cannot scan watch folder");
                return None;
            }
        };

        let same_file = self.current_file.as_deref() == Some(path.as_path());
        if same_file && self.last_modified == Some(modified) {
            return None;
        }

        wait(self.settle);

        match modified_at(&path) {
            Ok(again) if again == modified => {
                self.current_file = Some(path.clone());
                self.last_modified = Some(modified);
                Some(path)
            }
            Ok(_) => {
                debug!(file = %path.display(), "file still changing, retrying next cycle");
                None
            }
            Err(e) => {
                debug!(file = %path.display(), error = %e, "file momentarily inaccessible");
                None
            }
        }
    }

    /// Run the watch loop on a background thread, calling `on_change` with
    /// every settled file.
    pub fn spawn<F>(mut self, interval: Duration, mut on_change: F) -> Result<WatchHandle>
    where
        F: FnMut(&Path) + Send + 'static,
    {
        if !self.folder.is_dir() {
            return Err(DashError::WatchFolderMissing(self.folder.display().to_string()));
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name("folder-watcher".to_string())
            .spawn(move || {
                info!(folder = %self.folder.display(), pattern = %self.pattern, "watcher started");
                while flag.load(Ordering::SeqCst) {
                    if let Some(path) = self.poll() {
                        info!(file = %path.display(), "file detected");
                        on_change(&path);
                    }
                    sleep_while_running(&flag, interval);
                }
                info!("watcher stopped");
            })?;
        Ok(WatchHandle {
            running,
            thread: Some(thread),
        })
    }
}

fn sleep_while_running(flag: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < total && flag.load(Ordering::SeqCst) {
        let chunk = step.min(total - slept);
        thread::sleep(chunk);
        slept += chunk;
    }
}

/// Stops the watcher thread when stopped or dropped.
pub struct WatchHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("watcher thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
