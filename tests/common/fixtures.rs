//! On-disk workspace fixtures for integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use workspace_tracker::core::scanner::hash_file;
use workspace_tracker::core::state::system_time_to_millis;
use workspace_tracker::{
    CancellationToken, LocalVersionEntry, NullProgress, PendingChange, ScanSummary, TrackerConfig,
    WorkingFolder, WorkingFolderSet, Workspace,
};

/// The server directory every test workspace maps.
pub const SERVER_ROOT: &str = "$/proj";

/// A real on-disk workspace: a mapped root directory plus a separate
/// metadata directory, both inside one temp dir.
pub struct TestWorkspace {
    // Holds the temp dir alive for the fixture's lifetime.
    _dir: TempDir,
    pub root: String,
    pub workspace: Workspace,
}

impl TestWorkspace {
    pub fn new() -> TestWorkspace {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> TestWorkspace {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = TempDir::new().expect("temp dir");
        let root_path = dir.path().join("ws");
        fs::create_dir_all(&root_path).expect("workspace root");
        let root = root_path.to_str().expect("utf-8 temp path").to_string();

        let folders = WorkingFolderSet::new(vec![WorkingFolder::map(SERVER_ROOT, &root)]);
        let workspace = Workspace::new(dir.path().join("metadata"), folders, config);

        TestWorkspace {
            _dir: dir,
            root,
            workspace,
        }
    }

    /// Absolute path of a file inside the workspace root.
    pub fn local_path(&self, relative: &str) -> PathBuf {
        Path::new(&self.root).join(relative)
    }

    /// The server item a workspace-relative path maps to.
    pub fn server_item(&self, relative: &str) -> String {
        format!("{}/{}", SERVER_ROOT, relative.replace('\\', "/"))
    }

    /// Writes a file (creating parent directories), returning its path.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.local_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dirs");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn delete(&self, relative: &str) {
        let path = self.local_path(relative);
        if path.is_dir() {
            fs::remove_dir_all(&path).expect("remove dir");
        } else {
            fs::remove_file(&path).expect("remove file");
        }
    }

    /// Registers an already-written file as tracked, recording its current
    /// on-disk length, hash, and mtime as the known server state.
    pub fn track_file(&mut self, relative: &str) {
        let path = self.local_path(relative);
        let meta = fs::metadata(&path).expect("tracked file exists");

        let mut entry = LocalVersionEntry::new(
            self.server_item(relative),
            path.to_str().expect("utf-8 path"),
        );
        entry.length = meta.len() as i64;
        entry.hash = Some(hash_file(&path).expect("hash"));
        entry.last_modified_millis = system_time_to_millis(meta.modified().expect("mtime"));

        let mut txn = self.workspace.transaction().expect("transaction");
        txn.local_versions_mut().add(entry);
        txn.commit().expect("commit");
    }

    pub fn full_scan(&mut self) -> ScanSummary {
        let mut txn = self.workspace.transaction().expect("transaction");
        let summary = txn
            .full_scan(CancellationToken::new(), &mut NullProgress)
            .expect("full scan");
        txn.commit().expect("commit");
        summary
    }

    pub fn partial_scan(&mut self, changed: &[&str]) -> ScanSummary {
        let changed: Vec<String> = changed.iter().map(|s| s.to_string()).collect();
        let mut txn = self.workspace.transaction().expect("transaction");
        let summary = txn
            .partial_scan(&changed, CancellationToken::new(), &mut NullProgress)
            .expect("partial scan");
        txn.commit().expect("commit");
        summary
    }

    /// Snapshot of the current candidates, sorted by target server item.
    pub fn candidates(&mut self) -> Vec<PendingChange> {
        let txn = self.workspace.transaction().expect("transaction");
        let mut result: Vec<PendingChange> = txn.pending_changes().candidates().cloned().collect();
        txn.commit().expect("commit");
        result.sort_by(|a, b| a.target_server_item.cmp(&b.target_server_item));
        result
    }

    /// Snapshot of the current real pending changes.
    pub fn pending(&mut self) -> Vec<PendingChange> {
        let txn = self.workspace.transaction().expect("transaction");
        let mut result: Vec<PendingChange> = txn.pending_changes().changes().cloned().collect();
        txn.commit().expect("commit");
        result.sort_by(|a, b| a.target_server_item.cmp(&b.target_server_item));
        result
    }

    /// The tracked entry for a workspace-relative path, if any.
    pub fn entry(&mut self, relative: &str) -> Option<LocalVersionEntry> {
        let server_item = self.server_item(relative);
        let txn = self.workspace.transaction().expect("transaction");
        let entry = txn.local_versions().get_by_server_item(&server_item).cloned();
        txn.commit().expect("commit");
        entry
    }

    /// True if a candidate exists targeting the given relative path.
    pub fn has_candidate(&mut self, relative: &str) -> bool {
        let server_item = self.server_item(relative);
        self.candidates()
            .iter()
            .any(|c| c.target_server_item == server_item)
    }
}
