//! The local workspace scanner: reconciles on-disk state against the local
//! version table and records pending and candidate changes.
//!
//! Two execution modes share one second phase. A full scan enumerates every
//! mapped working folder (bounded by the candidate-add and enumerated-item
//! limits); a partial scan visits an explicit list of changed paths. Either
//! way, the first phase only collects observations; the tables are mutated
//! in the second phase, and candidates that the pass did not re-confirm are
//! reconciled away at the end.
//!
//! # Public API
//! - [`LocalWorkspaceScanner`]: borrow the open tables, then
//!   [`full_scan`](LocalWorkspaceScanner::full_scan) or
//!   [`partial_scan`](LocalWorkspaceScanner::partial_scan)
//! - [`ScanSummary`]: what the scan recorded

use crate::core::cancel::{CancellationToken, ProgressSink};
use crate::core::config::TrackerConfig;
use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::ignore::ExclusionEvaluator;
use crate::core::state::{
    system_time_to_millis, ChangeKind, LocalVersionEntry, PendingChange, PropertyValue,
};
use crate::core::table::MetadataTable;
use crate::core::tables::{LocalVersionTable, PendingChangesTable};
use crate::core::working_folder::WorkingFolderSet;
use crate::core::{baseline, local_path, server_path};
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// What one scan pass recorded.
#[derive(Debug, Default, Clone)]
pub struct ScanSummary {
    /// Items enumerated during phase one.
    pub enumerated_items: usize,
    /// Candidate adds recorded this pass (new or replaced).
    pub candidate_adds: usize,
    /// Candidate deletes recorded this pass.
    pub candidate_deletes: usize,
    /// Real edit changes pended this pass.
    pub edits_pended: usize,
    /// Property changes pended this pass.
    pub properties_pended: usize,
    /// Stale candidates removed by reconciliation.
    pub candidates_removed: usize,
    /// True if enumeration stopped early at a safety limit.
    pub truncated: bool,
    /// Local items whose recorded attributes this scan refreshed.
    pub attributes_refreshed: Vec<String>,
}

impl ScanSummary {
    /// True if the scan changed either table.
    pub fn changed_anything(&self) -> bool {
        self.candidate_adds > 0
            || self.candidate_deletes > 0
            || self.edits_pended > 0
            || self.properties_pended > 0
            || self.candidates_removed > 0
            || !self.attributes_refreshed.is_empty()
    }
}

/// On-disk attributes of one item, read once per visit.
#[derive(Debug, Clone, Copy)]
struct DiskSnapshot {
    is_directory: bool,
    symlink: bool,
    executable: bool,
    length: i64,
    modified_millis: i64,
}

impl DiskSnapshot {
    /// Reads attributes without following symlinks. `Ok(None)` means the
    /// item is not on disk.
    fn read(path: &Path) -> Result<Option<DiskSnapshot>> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let modified_millis = meta
            .modified()
            .map(system_time_to_millis)
            .unwrap_or(-1);

        Ok(Some(DiskSnapshot {
            is_directory: meta.is_dir(),
            symlink: meta.file_type().is_symlink(),
            executable: is_executable(&meta),
            length: meta.len() as i64,
            modified_millis,
        }))
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    !meta.is_dir() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Diff observations collected in phase one and applied in phase two.
#[derive(Debug, Default)]
struct Observations {
    /// Server items whose entries are stale or missing on disk.
    mark_for_removal: Vec<String>,
    /// Previously missing server items seen on disk again.
    reappeared: Vec<String>,
    /// Hash-match items: (server item, fresh on-disk mtime).
    refresh_mtime: Vec<(String, i64)>,
    /// Server items with confirmed content edits.
    confirmed_edits: Vec<String>,
    /// Server items whose symlink/executable state changed on disk.
    property_changes: Vec<(String, bool, bool)>,
    /// New candidate adds.
    candidate_adds: Vec<PendingChange>,
}

/// The diff engine over one workspace's open tables.
pub struct LocalWorkspaceScanner<'a> {
    lv: &'a mut MetadataTable<LocalVersionTable>,
    pc: &'a mut MetadataTable<PendingChangesTable>,
    working_folders: &'a WorkingFolderSet,
    config: &'a TrackerConfig,
    token: CancellationToken,
    progress: &'a mut dyn ProgressSink,
    /// Local items currently owned by other machinery; never marked
    /// missing by this scan.
    skipped_items: HashSet<String>,
}

impl<'a> LocalWorkspaceScanner<'a> {
    pub fn new(
        lv: &'a mut MetadataTable<LocalVersionTable>,
        pc: &'a mut MetadataTable<PendingChangesTable>,
        working_folders: &'a WorkingFolderSet,
        config: &'a TrackerConfig,
        token: CancellationToken,
        progress: &'a mut dyn ProgressSink,
    ) -> LocalWorkspaceScanner<'a> {
        LocalWorkspaceScanner {
            lv,
            pc,
            working_folders,
            config,
            token,
            progress,
            skipped_items: HashSet::new(),
        }
    }

    /// Marks a local item as owned by other machinery for this scan.
    pub fn skip_item(&mut self, local_item: impl Into<String>) {
        self.skipped_items.insert(local_item.into());
    }

    /// True if the tracked entry for a server item sits at a skipped local
    /// item. Phase two leaves such entries entirely alone.
    fn entry_is_skipped(&self, server_item: &str) -> bool {
        self.lv
            .data()
            .get_by_server_item(server_item)
            .and_then(|e| e.local_item.as_deref())
            .map(|local| self.skipped_items.contains(local))
            .unwrap_or(false)
    }

    /// Reconciles every mapped working folder against the tables.
    pub fn full_scan(&mut self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut observations = Observations::default();
        let mut confirmed: HashSet<String> = HashSet::new();

        self.lv.modify_transient().mark_all_unscanned();

        let mut new_candidates = 0usize;
        'roots: for root in self.working_folders.local_roots() {
            self.progress.report(&format!("scanning {}", root));
            let mut evaluator =
                ExclusionEvaluator::with_ignore_file_name(&root, &self.config.ignore_file_name);
            evaluator.set_global_rules(&self.config.global_exclusions);

            let mut walker = WalkDir::new(&root)
                .min_depth(1)
                .follow_links(false)
                .into_iter();

            while let Some(entry) = walker.next() {
                self.token.check()?;

                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("enumeration error under {}: {}", root, e);
                        continue;
                    }
                };

                if summary.enumerated_items >= self.config.max_enumerated_items
                    || new_candidates >= self.config.max_candidate_adds
                {
                    // Safety limit: stop enumerating; phase two still
                    // visits every tracked entry.
                    debug!(
                        "enumeration truncated at {} items / {} new candidates",
                        summary.enumerated_items, new_candidates
                    );
                    summary.truncated = true;
                    break 'roots;
                }

                let file_type = entry.file_type();
                let is_dir = file_type.is_dir();

                let name = entry.file_name().to_string_lossy();
                if is_dir && baseline::is_potential_baseline_folder_name(&name) {
                    walker.skip_current_dir();
                    continue;
                }

                let Some(local_item) = entry.path().to_str() else {
                    warn!("skipping non-unicode path under {}", root);
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                };
                let local_item = local_item.to_string();

                summary.enumerated_items += 1;

                if let Some(known) = self.lv.modify_transient().get_mut_by_local_item(&local_item)
                {
                    known.scanned = true;
                    let known = known.clone();
                    match entry_snapshot(&entry) {
                        Ok(snapshot) => self.diff_item(&known, &snapshot, &mut observations)?,
                        Err(e) => {
                            // Unreadable attributes cannot confirm a match;
                            // fail toward reporting an edit.
                            warn!("attribute read failed for {}: {}", local_item, e);
                            if !known.is_directory {
                                observations.confirmed_edits.push(known.server_item.clone());
                            }
                        }
                    }
                    continue;
                }

                // Unknown item: a candidate add, unless filtered out.
                // Excluded directories are still descended; an ignore file
                // deeper in the tree can re-include items beneath them.
                if evaluator.is_excluded(&local_item, is_dir)? {
                    trace!("excluded: {}", local_item);
                    continue;
                }

                // Directories are only candidates when symbolic links.
                if is_dir && !file_type.is_symlink() {
                    continue;
                }

                let snapshot = match entry_snapshot(&entry) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("attribute read failed for {}: {}", local_item, e);
                        continue;
                    }
                };
                if self.consider_candidate_add(&local_item, &snapshot, &mut observations) {
                    new_candidates += 1;
                }
            }
        }

        // Catch-up pass: every tracked entry enumeration never reached is
        // diffed straight from its on-disk attributes, so truncation above
        // cannot cause a tracked item to be skipped.
        for server_item in self.lv.data().unscanned_server_items() {
            self.token.check()?;

            let Some(entry) = self.lv.data().get_by_server_item(&server_item) else {
                continue;
            };
            let entry = entry.clone();
            let Some(local_item) = entry.local_item.as_deref() else {
                continue;
            };

            match DiskSnapshot::read(Path::new(local_item)) {
                Ok(Some(snapshot)) => self.diff_item(&entry, &snapshot, &mut observations)?,
                Ok(None) => observations.mark_for_removal.push(entry.server_item.clone()),
                Err(e) => {
                    warn!("attribute read failed for {}: {}", local_item, e);
                    if !entry.is_directory {
                        observations.confirmed_edits.push(entry.server_item.clone());
                    }
                }
            }
        }

        self.scan_part_two(observations, &mut confirmed, &mut summary)?;
        self.reconcile_full(&confirmed, &mut summary);

        self.progress
            .report(&format!("scanned {} items", summary.enumerated_items));
        info!(
            "full scan: {} items, {} adds, {} deletes, {} edits{}",
            summary.enumerated_items,
            summary.candidate_adds,
            summary.candidate_deletes,
            summary.edits_pended,
            if summary.truncated { " (truncated)" } else { "" }
        );
        Ok(summary)
    }

    /// Reconciles an explicit list of changed paths. Falls back to a full
    /// scan when any path fails canonicalization.
    pub fn partial_scan(&mut self, changed_paths: &[String]) -> Result<ScanSummary> {
        let mut canonical = Vec::with_capacity(changed_paths.len());
        for path in changed_paths {
            match local_path::canonicalize(path) {
                Ok(c) => canonical.push(c),
                Err(e) => {
                    warn!(
                        "partial scan falling back to full: {} ({})",
                        path, e
                    );
                    return self.full_scan();
                }
            }
        }

        let mut summary = ScanSummary::default();
        let mut observations = Observations::default();
        let mut confirmed: HashSet<String> = HashSet::new();
        let mut scanned_server_items: Vec<String> = Vec::new();
        let mut not_on_disk: Vec<String> = Vec::new();

        self.progress
            .report(&format!("rescanning {} changed paths", canonical.len()));

        for local_item in &canonical {
            self.token.check()?;
            summary.enumerated_items += 1;

            let snapshot = match DiskSnapshot::read(Path::new(local_item)) {
                Ok(s) => s,
                Err(e) => {
                    warn!("attribute read failed for {}: {}", local_item, e);
                    if let Some(known) = self.lv.data().get_by_local_item(local_item) {
                        if !known.is_directory {
                            observations.confirmed_edits.push(known.server_item.clone());
                        }
                    }
                    continue;
                }
            };

            if let Some(known) = self.lv.data().get_by_local_item(local_item) {
                scanned_server_items.push(known.server_item.clone());
                let known = known.clone();
                match snapshot {
                    Some(snapshot) => self.diff_item(&known, &snapshot, &mut observations)?,
                    None => {
                        observations.mark_for_removal.push(known.server_item.clone());
                        not_on_disk.push(local_item.clone());
                    }
                }
                continue;
            }

            let Some(snapshot) = snapshot else {
                not_on_disk.push(local_item.clone());
                continue;
            };

            if snapshot.is_directory && !snapshot.symlink {
                continue;
            }

            // Scope exclusion to the working-folder root containing the
            // item; unmapped items are simply not candidates.
            let Some(root) = self.working_folders.root_containing(local_item) else {
                continue;
            };
            let mut evaluator =
                ExclusionEvaluator::with_ignore_file_name(&root, &self.config.ignore_file_name);
            evaluator.set_global_rules(&self.config.global_exclusions);
            if evaluator.is_excluded(local_item, snapshot.is_directory)? {
                continue;
            }

            if self.consider_candidate_add(local_item, &snapshot, &mut observations) {
                trace!("partial scan candidate add: {}", local_item);
            }

            if let Ok(server_item) = self.working_folders.translate_local_to_server(local_item) {
                scanned_server_items.push(server_item);
            }
        }

        self.scan_part_two(observations, &mut confirmed, &mut summary)?;
        self.reconcile_partial(&scanned_server_items, &not_on_disk, &confirmed, &mut summary);

        debug!(
            "partial scan of {} paths: {} adds, {} deletes, {} edits",
            canonical.len(),
            summary.candidate_adds,
            summary.candidate_deletes,
            summary.edits_pended
        );
        Ok(summary)
    }

    /// Decides whether an unknown on-disk item becomes a candidate add and
    /// records the observation. Returns true when it did.
    fn consider_candidate_add(
        &self,
        local_item: &str,
        snapshot: &DiskSnapshot,
        observations: &mut Observations,
    ) -> bool {
        // Directories are only candidates when symbolic links.
        if snapshot.is_directory && !snapshot.symlink {
            return false;
        }

        let server_item = match self.working_folders.translate_local_to_server(local_item) {
            Ok(s) => s,
            Err(_) => return false,
        };

        // No adds directly in the server root.
        if server_path::is_direct_child_of_root(&server_item) {
            trace!("refusing candidate add at server root: {}", server_item);
            return false;
        }

        let mut change = PendingChange::new(server_item, ChangeKind::add_edit());
        change.candidate = true;
        change.length = snapshot.length;
        if snapshot.symlink {
            change.set_property(PropertyValue::symlink(true));
        }
        if snapshot.executable {
            change.set_property(PropertyValue::executable(true));
        }

        observations.candidate_adds.push(change);
        true
    }

    /// Shared diff of one known entry against its on-disk snapshot. Only
    /// records observations; table mutation happens in phase two.
    fn diff_item(
        &self,
        entry: &LocalVersionEntry,
        disk: &DiskSnapshot,
        observations: &mut Observations,
    ) -> Result<()> {
        // A file became a directory or vice versa: the entry is stale.
        if entry.is_directory != disk.is_directory {
            observations.mark_for_removal.push(entry.server_item.clone());
            return Ok(());
        }

        if entry.missing_on_disk {
            observations.reappeared.push(entry.server_item.clone());
        }

        if disk.is_directory {
            return Ok(());
        }

        if entry.symlink != disk.symlink || entry.executable != disk.executable {
            observations.property_changes.push((
                entry.server_item.clone(),
                disk.symlink,
                disk.executable,
            ));
        }

        // Without recorded length/hash there is nothing to compare against.
        if !entry.has_comparison_data() {
            return Ok(());
        }

        if entry.length != disk.length && !disk.symlink {
            observations.confirmed_edits.push(entry.server_item.clone());
            return Ok(());
        }

        if entry.last_modified_millis != disk.modified_millis || disk.symlink {
            let local_item = entry
                .local_item
                .as_deref()
                .ok_or_else(|| WorkspaceTrackerError::item_not_mapped(&entry.server_item))?;

            match hash_file(Path::new(local_item)) {
                Ok(hash) if Some(hash) == entry.hash => {
                    // Content unchanged: only the timestamp moved.
                    observations
                        .refresh_mtime
                        .push((entry.server_item.clone(), disk.modified_millis));
                }
                Ok(_) => {
                    observations.confirmed_edits.push(entry.server_item.clone());
                }
                Err(e) => {
                    // Cannot confirm a match: fail toward reporting an
                    // edit, never toward losing one.
                    warn!("hash failed for {}: {}", local_item, e);
                    observations.confirmed_edits.push(entry.server_item.clone());
                }
            }
        }

        Ok(())
    }

    /// Phase two: applies the collected observations to the tables.
    fn scan_part_two(
        &mut self,
        observations: Observations,
        confirmed: &mut HashSet<String>,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        for server_item in observations.mark_for_removal {
            if self.entry_is_skipped(&server_item) {
                continue;
            }
            let Some(entry) = self.lv.data().get_by_server_item(&server_item) else {
                continue;
            };
            let entry = entry.clone();

            // A pending add means the user owns this item; its absence is
            // their business, not a detected delete.
            if let Some(change) = self.pc.data().get_by_target_server_item(&server_item) {
                if change.is_add() {
                    continue;
                }
            }

            if !entry.missing_on_disk {
                if let Some(e) = self.lv.modify().get_mut_by_server_item(&server_item) {
                    e.missing_on_disk = true;
                }
            }

            // A rename away from this committed item already accounts for
            // its absence at the old path.
            if entry.committed && self.pc.data().is_renamed_away(&server_item) {
                continue;
            }

            let candidate = PendingChange::candidate_delete(&entry, server_item.clone());
            confirmed.insert(fold_server(&server_item));
            if self.pc.modify_transient().add_candidate(candidate) {
                self.pc.modify();
                summary.candidate_deletes += 1;
            }
        }

        for server_item in observations.reappeared {
            if self.entry_is_skipped(&server_item) {
                continue;
            }
            if let Some(entry) = self.lv.modify().get_mut_by_server_item(&server_item) {
                entry.missing_on_disk = false;
                debug!("reappeared on disk: {}", server_item);
            }
        }

        for (server_item, modified_millis) in observations.refresh_mtime {
            if self.entry_is_skipped(&server_item) {
                continue;
            }
            if let Some(entry) = self.lv.modify().get_mut_by_server_item(&server_item) {
                entry.last_modified_millis = modified_millis;
                if let Some(local_item) = &entry.local_item {
                    summary.attributes_refreshed.push(local_item.clone());
                }
            }

            // Content matches the recorded hash: a pending edit (but never
            // an add) is reversed.
            if let Some(change) = self.pc.data().get_by_target_server_item(&server_item) {
                if change.is_edit() && !change.is_add() {
                    let remaining = change.kind.without(ChangeKind::EDIT);
                    if remaining.is_empty() {
                        self.pc.modify().remove_change(&server_item);
                    } else if let Some(change) =
                        self.pc.modify().get_by_target_server_item(&server_item).cloned()
                    {
                        let mut change = change;
                        change.kind = remaining;
                        self.pc.modify().pend(change);
                    }
                    debug!("undid pending edit for {}", server_item);
                }
            }
        }

        for server_item in observations.confirmed_edits {
            if self.entry_is_skipped(&server_item) {
                continue;
            }
            let already_edited = self
                .pc
                .data()
                .get_by_target_server_item(&server_item)
                .map(|c| c.is_edit())
                .unwrap_or(false);
            if already_edited {
                continue;
            }

            let Some(entry) = self.lv.data().get_by_server_item(&server_item) else {
                continue;
            };

            let mut change = match self.pc.data().get_by_target_server_item(&server_item) {
                Some(existing) => {
                    let mut change = existing.clone();
                    change.kind = change.kind.with(ChangeKind::EDIT);
                    change
                }
                None => {
                    let mut change = PendingChange::new(server_item.clone(), ChangeKind::EDIT);
                    change.committed = entry.committed;
                    change.committed_server_item =
                        entry.committed.then(|| entry.server_item.clone());
                    change
                }
            };
            change.length = entry.length;
            change.hash = entry.hash;

            self.pc.modify().pend(change);
            summary.edits_pended += 1;
        }

        for (server_item, symlink, executable) in observations.property_changes {
            if self.entry_is_skipped(&server_item) {
                continue;
            }
            let Some(entry) = self.lv.data().get_by_server_item(&server_item) else {
                continue;
            };
            let committed = entry.committed;

            let mut change = match self.pc.data().get_by_target_server_item(&server_item) {
                Some(existing) => existing.clone(),
                None => {
                    let mut change =
                        PendingChange::new(server_item.clone(), ChangeKind::default());
                    change.committed = committed;
                    change.committed_server_item = committed.then(|| server_item.clone());
                    change
                }
            };
            change.set_property(PropertyValue::symlink(symlink));
            change.set_property(PropertyValue::executable(executable));

            self.pc.modify().pend(change);
            summary.properties_pended += 1;
        }

        for candidate in observations.candidate_adds {
            confirmed.insert(fold_server(&candidate.target_server_item));
            if self.pc.modify_transient().add_candidate(candidate) {
                self.pc.modify();
                summary.candidate_adds += 1;
            }
        }

        Ok(())
    }

    /// Full-scan reconciliation: every candidate not re-confirmed by this
    /// pass is stale.
    fn reconcile_full(&mut self, confirmed: &HashSet<String>, summary: &mut ScanSummary) {
        let removed = self
            .pc
            .modify_transient()
            .retain_candidates(|c| confirmed.contains(&fold_server(&c.target_server_item)));
        if removed > 0 {
            self.pc.modify();
            summary.candidates_removed += removed;
        }
    }

    /// Partial-scan reconciliation: only candidates targeted by this pass
    /// are reconsidered, plus candidate adds beneath paths confirmed
    /// missing from disk (candidates have no local-item index to consult).
    fn reconcile_partial(
        &mut self,
        scanned_server_items: &[String],
        not_on_disk: &[String],
        confirmed: &HashSet<String>,
        summary: &mut ScanSummary,
    ) {
        let scanned: HashSet<String> = scanned_server_items.iter().map(|s| fold_server(s)).collect();

        let missing_server_items: Vec<String> = not_on_disk
            .iter()
            .filter_map(|local| self.working_folders.translate_local_to_server(local).ok())
            .collect();

        let removed = self.pc.modify_transient().retain_candidates(|c| {
            let key = fold_server(&c.target_server_item);
            if scanned.contains(&key) && !confirmed.contains(&key) {
                return false;
            }
            if c.is_add() {
                for missing in &missing_server_items {
                    if server_path::is_child(missing, &c.target_server_item)
                        && !server_path::equals(missing, &c.target_server_item)
                    {
                        return false;
                    }
                }
            }
            true
        });
        if removed > 0 {
            self.pc.modify();
            summary.candidates_removed += removed;
        }
    }
}

fn fold_server(server_item: &str) -> String {
    server_item.to_ascii_uppercase()
}

fn entry_snapshot(entry: &walkdir::DirEntry) -> Result<DiskSnapshot> {
    let meta = entry
        .metadata()
        .map_err(|e| WorkspaceTrackerError::Io(e.into()))?;

    let modified_millis = meta.modified().map(system_time_to_millis).unwrap_or(-1);

    Ok(DiskSnapshot {
        is_directory: meta.is_dir(),
        symlink: entry.file_type().is_symlink(),
        executable: is_executable(&meta),
        length: meta.len() as i64,
        modified_millis,
    })
}

/// Streams a file through the content hash. A symbolic link hashes its
/// link target string, matching what is stored for symlink content.
pub fn hash_file(path: &Path) -> Result<[u8; 16]> {
    if std::fs::symlink_metadata(path)?.file_type().is_symlink() {
        let target = std::fs::read_link(path)?;
        return Ok(md5::compute(target.to_string_lossy().as_bytes()).0);
    }

    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(context.finalize().0)
}
