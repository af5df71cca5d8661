//! Filesystem-change aggregation and scan dispatch.
//!
//! A [`PathWatcher`] covers one directory subtree and yields a destructive
//! [`PathWatcherReport`] on each poll. The [`WorkspaceWatcher`] owns one
//! watcher per deduplicated workspace root, unions their reports, and
//! decides whether a scan is needed and which kind.
//!
//! Reports are bounded: past the changed-path cap a report degenerates to
//! "fully invalidated" and the path set is discarded. A change touching
//! the ignore file also fully invalidates, since one ignore rule can flip
//! the inclusion of arbitrary other paths.
//!
//! # Public API
//! - [`PathWatcherReport`]: bounded set of changed paths or full invalidation
//! - [`PathWatcher`]: subtree notification source
//! - [`NotifyPathWatcher`]: OS-notification backend
//! - [`WorkspaceWatcher`]: per-workspace aggregation and scan dispatch

use crate::core::cancel::{CancellationToken, ProgressSink};
use crate::core::config::TrackerConfig;
use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::local_path;
use crate::core::scanner::{LocalWorkspaceScanner, ScanSummary};
use crate::core::table::MetadataTable;
use crate::core::tables::{LocalVersionTable, PendingChangesTable};
use crate::core::working_folder::WorkingFolderSet;
use log::{debug, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};

/// A bounded invalidation report.
#[derive(Debug, Clone)]
pub struct PathWatcherReport {
    cap: usize,
    fully_invalidated: bool,
    changed_paths: HashSet<String>,
}

impl PathWatcherReport {
    pub fn new(cap: usize) -> PathWatcherReport {
        PathWatcherReport {
            cap,
            fully_invalidated: false,
            changed_paths: HashSet::new(),
        }
    }

    /// Records one changed path. Exceeding the cap discards the set and
    /// fully invalidates.
    pub fn add_changed_path(&mut self, path: impl Into<String>) {
        if self.fully_invalidated {
            return;
        }
        self.changed_paths.insert(path.into());
        if self.changed_paths.len() > self.cap {
            debug!("change report exceeded {} paths, fully invalidating", self.cap);
            self.fully_invalidate();
        }
    }

    /// Degenerates the report to "rescan everything".
    pub fn fully_invalidate(&mut self) {
        self.fully_invalidated = true;
        self.changed_paths.clear();
    }

    pub fn fully_invalidated(&self) -> bool {
        self.fully_invalidated
    }

    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.changed_paths.iter().map(String::as_str)
    }

    /// True if nothing has been recorded.
    pub fn is_clean(&self) -> bool {
        !self.fully_invalidated && self.changed_paths.is_empty()
    }

    /// Folds another report into this one.
    pub fn union(&mut self, other: PathWatcherReport) {
        if other.fully_invalidated {
            self.fully_invalidate();
            return;
        }
        for path in other.changed_paths {
            self.add_changed_path(path);
        }
    }

    /// Drains this report, leaving it clean.
    pub fn take(&mut self) -> PathWatcherReport {
        let taken = self.clone();
        self.fully_invalidated = false;
        self.changed_paths.clear();
        taken
    }
}

/// A change-notification source for one directory subtree.
pub trait PathWatcher {
    /// The watched root.
    fn root(&self) -> &str;

    /// Drains pending notifications into a fresh report. Destructive.
    fn poll(&mut self) -> PathWatcherReport;
}

/// OS-notification backend.
pub struct NotifyPathWatcher {
    root: String,
    cap: usize,
    receiver: Receiver<notify::Result<notify::Event>>,
    // Dropping the watcher stops the notification stream.
    _watcher: RecommendedWatcher,
}

impl NotifyPathWatcher {
    pub fn new(root: impl Into<String>, cap: usize) -> Result<NotifyPathWatcher> {
        let root = root.into();
        let (sender, receiver) = channel();

        let mut watcher = notify::recommended_watcher(sender).map_err(|e| {
            WorkspaceTrackerError::WatchFailed {
                path: root.clone(),
                message: e.to_string(),
            }
        })?;
        watcher
            .watch(Path::new(&root), RecursiveMode::Recursive)
            .map_err(|e| WorkspaceTrackerError::WatchFailed {
                path: root.clone(),
                message: e.to_string(),
            })?;

        debug!("watching {}", root);
        Ok(NotifyPathWatcher {
            root,
            cap,
            receiver,
            _watcher: watcher,
        })
    }
}

impl PathWatcher for NotifyPathWatcher {
    fn root(&self) -> &str {
        &self.root
    }

    fn poll(&mut self) -> PathWatcherReport {
        let mut report = PathWatcherReport::new(self.cap);
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Ok(event) => {
                    for path in event.paths {
                        match path.to_str() {
                            Some(p) => report.add_changed_path(p),
                            None => report.fully_invalidate(),
                        }
                    }
                }
                Err(e) => {
                    // A dropped or errored notification means unknown
                    // scope; treat everything as changed.
                    warn!("watch error under {}: {}", self.root, e);
                    report.fully_invalidate();
                }
            }
        }
        report
    }
}

/// Test/manual backend fed by explicit calls.
#[derive(Debug)]
pub struct ManualPathWatcher {
    root: String,
    report: PathWatcherReport,
}

impl ManualPathWatcher {
    pub fn new(root: impl Into<String>, cap: usize) -> ManualPathWatcher {
        ManualPathWatcher {
            root: root.into(),
            report: PathWatcherReport::new(cap),
        }
    }

    pub fn notify_changed(&mut self, path: impl Into<String>) {
        self.report.add_changed_path(path);
    }

    pub fn notify_overflow(&mut self) {
        self.report.fully_invalidate();
    }
}

impl PathWatcher for ManualPathWatcher {
    fn root(&self) -> &str {
        &self.root
    }

    fn poll(&mut self) -> PathWatcherReport {
        self.report.take()
    }
}

/// Computes the deduplicated watch roots for a workspace: working-folder
/// roots unioned with local-version-table roots not already covered.
pub fn watch_roots(working_folders: &WorkingFolderSet, lv: &LocalVersionTable) -> Vec<String> {
    let mut roots = working_folders.local_roots();
    for candidate in lv.local_roots() {
        if !roots.iter().any(|r| local_path::is_child(r, &candidate)) {
            roots.push(candidate);
        }
    }
    roots.sort_by(|a, b| local_path::compare_top_down(a, b));
    roots.dedup_by(|next, kept| local_path::is_child(kept, next));
    roots
}

/// Per-workspace change aggregation and scan dispatch.
pub struct WorkspaceWatcher {
    watchers: Vec<Box<dyn PathWatcher>>,
    report: PathWatcherReport,
    ignore_file_name: String,
    partial_scan_enabled: bool,
}

impl WorkspaceWatcher {
    pub fn new(config: &TrackerConfig) -> WorkspaceWatcher {
        WorkspaceWatcher {
            watchers: Vec::new(),
            report: PathWatcherReport::new(config.watcher_change_cap),
            ignore_file_name: config.ignore_file_name.clone(),
            partial_scan_enabled: config.partial_scan_enabled,
        }
    }

    /// Adds a watcher unless its root is already covered by an existing
    /// one; a new root covering existing watchers replaces them.
    pub fn add_watcher(&mut self, watcher: Box<dyn PathWatcher>) {
        let root = watcher.root().to_string();
        if self
            .watchers
            .iter()
            .any(|w| local_path::is_child(w.root(), &root))
        {
            trace!("watch root {} already covered", root);
            return;
        }
        self.watchers
            .retain(|w| !local_path::is_child(&root, w.root()));
        self.watchers.push(watcher);
    }

    pub fn watched_roots(&self) -> Vec<&str> {
        self.watchers.iter().map(|w| w.root()).collect()
    }

    /// Records an externally observed change.
    pub fn mark_path_changed(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.ignore_file_touched(&path) {
            self.report.fully_invalidate();
        } else {
            self.report.add_changed_path(path);
        }
    }

    /// Drains every watcher into the aggregate report.
    pub fn poll(&mut self) {
        let mut polled_reports = Vec::with_capacity(self.watchers.len());
        for watcher in &mut self.watchers {
            polled_reports.push(watcher.poll());
        }

        for polled in polled_reports {
            if !polled.fully_invalidated()
                && polled.changed_paths().any(|p| self.ignore_file_touched(p))
            {
                self.report.fully_invalidate();
                continue;
            }
            self.report.union(polled);
        }
    }

    pub fn is_scan_necessary(&self) -> bool {
        !self.report.is_clean()
    }

    /// Runs the appropriate scan for the accumulated report and resets it.
    /// A clean report scans nothing.
    pub fn scan(&mut self, scanner: &mut LocalWorkspaceScanner<'_>) -> Result<Option<ScanSummary>> {
        if !self.is_scan_necessary() {
            return Ok(None);
        }

        let report = self.report.take();
        let summary = if report.fully_invalidated() || !self.partial_scan_enabled {
            scanner.full_scan()?
        } else {
            let paths: Vec<String> = report.changed_paths().map(str::to_string).collect();
            scanner.partial_scan(&paths)?
        };
        Ok(Some(summary))
    }

    fn ignore_file_touched(&self, path: &str) -> bool {
        let name = local_path::get_file_name(path);
        if local_path::CASE_SENSITIVE {
            name == self.ignore_file_name
        } else {
            name.eq_ignore_ascii_case(&self.ignore_file_name)
        }
    }
}

/// Convenience wiring: a watcher-driven scan over freshly opened tables.
pub fn scan_if_necessary(
    watcher: &mut WorkspaceWatcher,
    lv: &mut MetadataTable<LocalVersionTable>,
    pc: &mut MetadataTable<PendingChangesTable>,
    working_folders: &WorkingFolderSet,
    config: &TrackerConfig,
    token: CancellationToken,
    progress: &mut dyn ProgressSink,
) -> Result<Option<ScanSummary>> {
    watcher.poll();
    if !watcher.is_scan_necessary() {
        return Ok(None);
    }
    let mut scanner = LocalWorkspaceScanner::new(lv, pc, working_folders, config, token, progress);
    watcher.scan(&mut scanner)
}
