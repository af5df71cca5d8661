use std::thread;
use std::time::Duration;

mod common;
use common::fixtures::TestWorkspace;
use workspace_tracker::core::tables::{LOCAL_VERSION_TABLE_NAME, PENDING_CHANGES_TABLE_NAME};
use workspace_tracker::{
    CancellationToken, ChangeKind, LocalVersionTable, LocalWorkspaceScanner, MetadataTable,
    NullProgress, PendingChangesTable, ProgressSink, TrackerConfig, WorkingFolder,
    WorkingFolderSet, Workspace,
};

#[cfg(test)]
mod scanner_tests {
    use super::*;

    #[derive(Default)]
    struct RecordingProgress {
        messages: Vec<String>,
    }

    impl ProgressSink for RecordingProgress {
        fn report(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }
    }

    #[test]
    fn test_full_scan_discovers_candidate_adds() {
        let mut ws = TestWorkspace::new();
        ws.write_file("a.txt", "alpha");
        ws.write_file("sub/b.txt", "beta");

        let summary = ws.full_scan();
        assert_eq!(summary.candidate_adds, 2);

        let candidates = ws.candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.candidate));
        assert!(candidates.iter().all(|c| c.kind == ChangeKind::add_edit()));
        assert!(ws.has_candidate("a.txt"));
        assert!(ws.has_candidate("sub/b.txt"));
    }

    #[test]
    fn test_second_scan_with_no_disk_changes_is_idempotent() {
        let mut ws = TestWorkspace::new();
        ws.write_file("tracked.txt", "content");
        ws.track_file("tracked.txt");
        ws.write_file("untracked.txt", "new");

        let first = ws.full_scan();
        assert_eq!(first.candidate_adds, 1);

        let second = ws.full_scan();
        assert_eq!(second.candidate_adds, 0);
        assert_eq!(second.candidate_deletes, 0);
        assert_eq!(second.edits_pended, 0);
        assert_eq!(second.candidates_removed, 0);
        assert!(!second.changed_anything());
    }

    #[test]
    fn test_content_change_pends_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "original");
        ws.track_file("f.txt");

        ws.write_file("f.txt", "changed and longer");
        let summary = ws.full_scan();
        assert_eq!(summary.edits_pended, 1);

        let pending = ws.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_edit());
        assert!(!pending[0].candidate);
        assert_eq!(pending[0].target_server_item, ws.server_item("f.txt"));
    }

    #[test]
    fn test_same_length_content_change_pends_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "aaaa");
        ws.track_file("f.txt");

        thread::sleep(Duration::from_millis(30));
        ws.write_file("f.txt", "bbbb");

        let summary = ws.full_scan();
        assert_eq!(summary.edits_pended, 1);
    }

    #[test]
    fn test_edit_is_not_pended_twice() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "original");
        ws.track_file("f.txt");

        ws.write_file("f.txt", "first change!");
        assert_eq!(ws.full_scan().edits_pended, 1);

        ws.write_file("f.txt", "second change, longer");
        assert_eq!(ws.full_scan().edits_pended, 0);
        assert_eq!(ws.pending().len(), 1);
    }

    #[test]
    fn test_touched_but_unchanged_file_refreshes_mtime_without_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "stable content");
        ws.track_file("f.txt");
        let recorded = ws.entry("f.txt").unwrap().last_modified_millis;

        // Rewrite identical content so only the timestamp moves.
        thread::sleep(Duration::from_millis(30));
        ws.write_file("f.txt", "stable content");

        let summary = ws.full_scan();
        assert_eq!(summary.edits_pended, 0);
        assert_eq!(summary.attributes_refreshed.len(), 1);
        assert!(ws.pending().is_empty());

        let entry = ws.entry("f.txt").unwrap();
        assert_ne!(entry.last_modified_millis, recorded);
    }

    #[test]
    fn test_touched_but_unchanged_file_undoes_pending_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "stable content");
        ws.track_file("f.txt");

        ws.write_file("f.txt", "different length content");
        assert_eq!(ws.full_scan().edits_pended, 1);

        // Restore the original content: the recorded hash matches again.
        thread::sleep(Duration::from_millis(30));
        ws.write_file("f.txt", "stable content");

        let summary = ws.full_scan();
        assert_eq!(summary.edits_pended, 0);
        assert!(ws.pending().is_empty());
        assert_eq!(summary.attributes_refreshed.len(), 1);
    }

    #[test]
    fn test_deleted_tracked_file_becomes_candidate_delete() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "content");
        ws.track_file("f.txt");

        ws.delete("f.txt");
        let summary = ws.full_scan();
        assert_eq!(summary.candidate_deletes, 1);

        let candidates = ws.candidates();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_delete());
        assert!(ws.entry("f.txt").unwrap().missing_on_disk);
    }

    #[test]
    fn test_reappeared_file_clears_missing_flag_and_candidate() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "content");
        ws.track_file("f.txt");

        ws.delete("f.txt");
        ws.full_scan();
        assert!(ws.entry("f.txt").unwrap().missing_on_disk);

        ws.write_file("f.txt", "content");
        let summary = ws.full_scan();
        assert!(!ws.entry("f.txt").unwrap().missing_on_disk);
        assert_eq!(summary.candidates_removed, 1);
        assert!(ws.candidates().is_empty());
    }

    #[test]
    fn test_file_replaced_by_directory_is_marked_stale() {
        let mut ws = TestWorkspace::new();
        ws.write_file("x", "was a file");
        ws.track_file("x");

        ws.delete("x");
        ws.write_file("x/child.txt", "now a directory");

        let summary = ws.full_scan();
        assert_eq!(summary.candidate_deletes, 1);
        assert_eq!(summary.candidate_adds, 1);
        assert!(ws.entry("x").unwrap().missing_on_disk);
        assert!(ws.has_candidate("x/child.txt"));
    }

    #[test]
    fn test_ignore_rule_filters_candidates_recursively() {
        let mut ws = TestWorkspace::new();
        ws.write_file(".tfignore", "*.class\n");
        ws.write_file("a/b/Foo.class", "bytecode");
        ws.write_file("a/b/Foo.java", "source");

        ws.full_scan();
        assert!(!ws.has_candidate("a/b/Foo.class"));
        assert!(ws.has_candidate("a/b/Foo.java"));
    }

    #[test]
    fn test_inclusion_beneath_excluded_directory_is_honored() {
        let mut ws = TestWorkspace::new();
        ws.write_file(".tfignore", "build\n");
        ws.write_file("build/sub/.tfignore", "!keep.log\n");
        ws.write_file("build/sub/keep.log", "kept");
        ws.write_file("build/sub/junk.txt", "dropped");

        // The nearer ignore file re-admits keep.log even though every
        // ancestor directory is excluded by the root rule.
        ws.full_scan();
        assert!(ws.has_candidate("build/sub/keep.log"));
        assert!(!ws.has_candidate("build/sub/junk.txt"));
        assert!(!ws.has_candidate("build/sub/.tfignore"));
    }

    #[test]
    fn test_skipped_items_are_left_untouched() {
        let mut ws = TestWorkspace::new();
        let edited = ws.write_file("edited.txt", "original");
        ws.write_file("removed.txt", "content");
        ws.track_file("edited.txt");
        ws.track_file("removed.txt");

        ws.write_file("edited.txt", "changed and longer");
        ws.delete("removed.txt");

        let meta = ws.workspace.metadata_dir().to_path_buf();
        let mut lv: MetadataTable<LocalVersionTable> =
            MetadataTable::open(meta.join(LOCAL_VERSION_TABLE_NAME)).unwrap();
        let mut pc: MetadataTable<PendingChangesTable> =
            MetadataTable::open(meta.join(PENDING_CHANGES_TABLE_NAME)).unwrap();

        let folders = ws.workspace.working_folders().clone();
        let config = ws.workspace.config().clone();
        let mut progress = NullProgress;
        let mut scanner = LocalWorkspaceScanner::new(
            &mut lv,
            &mut pc,
            &folders,
            &config,
            CancellationToken::new(),
            &mut progress,
        );
        scanner.skip_item(edited.to_str().unwrap());
        scanner.skip_item(ws.local_path("removed.txt").to_str().unwrap());

        // Both items are owned by other machinery: the scan must pend
        // nothing against them and leave their entries alone.
        let summary = scanner.full_scan().unwrap();
        assert_eq!(summary.edits_pended, 0);
        assert_eq!(summary.candidate_deletes, 0);
        assert_eq!(pc.data().changes().count(), 0);
        assert_eq!(pc.data().candidates().count(), 0);

        let removed_entry = lv
            .data()
            .get_by_server_item(&ws.server_item("removed.txt"))
            .unwrap();
        assert!(!removed_entry.missing_on_disk);

        lv.close().unwrap();
        pc.close().unwrap();
    }

    #[test]
    fn test_unreadable_attributes_bias_toward_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("a/f.txt", "content");
        ws.track_file("a/f.txt");

        // Replace the parent directory with a file: attribute reads for
        // f.txt now fail with an error other than not-found, and the scan
        // must survive it.
        ws.delete("a");
        ws.write_file("a", "now a file");

        let summary = ws.full_scan();
        assert_eq!(summary.edits_pended, 1);
        assert_eq!(summary.candidate_adds, 1);

        let pending = ws.pending();
        assert!(pending
            .iter()
            .any(|c| c.target_server_item == ws.server_item("a/f.txt") && c.is_edit()));
    }

    #[test]
    fn test_full_scan_reports_progress() {
        let mut ws = TestWorkspace::new();
        ws.write_file("a.txt", "content");

        let mut progress = RecordingProgress::default();
        let mut txn = ws.workspace.transaction().unwrap();
        txn.full_scan(CancellationToken::new(), &mut progress)
            .unwrap();
        txn.commit().unwrap();

        assert!(progress.messages.iter().any(|m| m.contains(&ws.root)));
        assert!(progress.messages.iter().any(|m| m.contains("scanned")));
    }

    #[test]
    fn test_candidate_add_refused_directly_under_server_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let root_path = dir.path().join("ws");
        std::fs::create_dir_all(&root_path).unwrap();
        let root = root_path.to_str().unwrap().to_string();

        // Mapping straight at $/ puts top-level files at the server root.
        let folders = WorkingFolderSet::new(vec![WorkingFolder::map("$/", &root)]);
        let mut workspace = Workspace::new(
            dir.path().join("metadata"),
            folders,
            TrackerConfig::default(),
        );

        std::fs::write(root_path.join("top.txt"), "top").unwrap();
        std::fs::create_dir_all(root_path.join("sub")).unwrap();
        std::fs::write(root_path.join("sub/a.txt"), "nested").unwrap();

        let mut txn = workspace.transaction().unwrap();
        let summary = txn
            .full_scan(CancellationToken::new(), &mut NullProgress)
            .unwrap();
        assert_eq!(summary.candidate_adds, 1);

        let targets: Vec<String> = txn
            .pending_changes()
            .candidates()
            .map(|c| c.target_server_item.clone())
            .collect();
        assert_eq!(targets, vec!["$/sub/a.txt".to_string()]);
        txn.commit().unwrap();
    }

    #[test]
    fn test_partial_scan_detects_edit() {
        let mut ws = TestWorkspace::new();
        ws.write_file("f.txt", "original");
        ws.track_file("f.txt");

        ws.write_file("f.txt", "changed and longer");
        let path = ws.local_path("f.txt");
        let summary = ws.partial_scan(&[path.to_str().unwrap()]);
        assert_eq!(summary.edits_pended, 1);
    }

    #[test]
    fn test_partial_scan_scopes_candidate_discovery() {
        let mut ws = TestWorkspace::new();
        ws.write_file("seen.txt", "one");
        ws.write_file("unseen.txt", "two");

        let path = ws.local_path("seen.txt");
        ws.partial_scan(&[path.to_str().unwrap()]);

        assert!(ws.has_candidate("seen.txt"));
        assert!(!ws.has_candidate("unseen.txt"));
    }

    #[test]
    fn test_partial_scan_with_bad_path_falls_back_to_full() {
        let mut ws = TestWorkspace::new();
        ws.write_file("a.txt", "one");
        ws.write_file("b.txt", "two");

        // An empty path cannot be canonicalized; the scan must degrade to
        // a full scan and still see everything.
        let summary = ws.partial_scan(&[""]);
        assert_eq!(summary.candidate_adds, 2);
        assert!(ws.has_candidate("a.txt"));
        assert!(ws.has_candidate("b.txt"));
    }

    #[test]
    fn test_partial_scan_sweeps_candidates_under_deleted_directory() {
        let mut ws = TestWorkspace::new();
        ws.write_file("sub/f1.txt", "one");
        ws.write_file("sub/f2.txt", "two");
        ws.full_scan();
        assert_eq!(ws.candidates().len(), 2);

        ws.delete("sub");
        let path = ws.local_path("sub");
        let summary = ws.partial_scan(&[path.to_str().unwrap()]);
        assert_eq!(summary.candidates_removed, 2);
        assert!(ws.candidates().is_empty());
    }

    #[test]
    fn test_truncated_enumeration_still_visits_every_entry() {
        let mut config = TrackerConfig::default();
        config.max_enumerated_items = 1;
        let mut ws = TestWorkspace::with_config(config);

        ws.write_file("a.txt", "one");
        ws.write_file("b.txt", "two");
        ws.write_file("c.txt", "three");
        ws.track_file("a.txt");
        ws.track_file("b.txt");
        ws.track_file("c.txt");

        ws.delete("c.txt");

        // Enumeration stops after one item; the catch-up pass must still
        // reach the deleted entry.
        let summary = ws.full_scan();
        assert!(summary.truncated);
        assert_eq!(summary.candidate_deletes, 1);
        assert!(ws.entry("c.txt").unwrap().missing_on_disk);
        assert!(!ws.entry("a.txt").unwrap().missing_on_disk);
        assert!(!ws.entry("b.txt").unwrap().missing_on_disk);
    }

    #[test]
    fn test_candidate_add_limit_truncates_enumeration() {
        let mut config = TrackerConfig::default();
        config.max_candidate_adds = 1;
        let mut ws = TestWorkspace::with_config(config);

        ws.write_file("a.txt", "one");
        ws.write_file("b.txt", "two");
        ws.write_file("c.txt", "three");

        let summary = ws.full_scan();
        assert!(summary.truncated);
        assert_eq!(summary.candidate_adds, 1);
    }

    #[test]
    fn test_cancellation_aborts_scan() {
        let mut ws = TestWorkspace::new();
        ws.write_file("a.txt", "content");

        let token = CancellationToken::new();
        token.cancel();

        let mut txn = ws.workspace.transaction().unwrap();
        let err = txn.full_scan(token, &mut NullProgress).unwrap_err();
        assert!(err.is_cancellation());
        txn.abort().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_candidate_with_property() {
        use workspace_tracker::core::state::PROPERTY_SYMLINK;

        let mut ws = TestWorkspace::new();
        ws.write_file("target.txt", "content");
        ws.track_file("target.txt");
        std::os::unix::fs::symlink(ws.local_path("target.txt"), ws.local_path("link"))
            .unwrap();

        ws.full_scan();
        let candidates = ws.candidates();
        let link = candidates
            .iter()
            .find(|c| c.target_server_item == ws.server_item("link"))
            .expect("symlink candidate");
        assert_eq!(link.property(PROPERTY_SYMLINK), Some("true"));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_change_pends_property() {
        use std::os::unix::fs::PermissionsExt;
        use workspace_tracker::core::state::PROPERTY_EXECUTABLE;

        let mut ws = TestWorkspace::new();
        let path = ws.write_file("script.sh", "#!/bin/sh\n");
        ws.track_file("script.sh");

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        let summary = ws.full_scan();
        assert_eq!(summary.properties_pended, 1);

        let pending = ws.pending();
        assert_eq!(pending[0].property(PROPERTY_EXECUTABLE), Some("true"));
        assert!(pending[0].kind.is_property());
    }
}
