//! The two persisted workspace tables: local versions and pending changes.
//!
//! Both are [`TableData`] payloads for [`MetadataTable`]. Entries are keyed
//! by folded server item so lookups honor server path case rules; the local
//! version table additionally keeps a transient local-item index that is
//! rebuilt after every load.
//!
//! # Public API
//! - [`LocalVersionTable`]: what the workspace believes is on disk
//! - [`PendingChangesTable`]: real pending changes and scan candidates

use crate::core::local_path;
use crate::core::state::{LocalVersionEntry, PendingChange};
use crate::core::table::{MetadataTable, TableData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// File base name of the local version table (no extension).
pub const LOCAL_VERSION_TABLE_NAME: &str = "localversion";

/// File base name of the pending changes table (no extension).
pub const PENDING_CHANGES_TABLE_NAME: &str = "pendingchanges";

/// An open local version table.
pub type LocalVersionTableHandle = MetadataTable<LocalVersionTable>;

/// An open pending changes table.
pub type PendingChangesTableHandle = MetadataTable<PendingChangesTable>;

fn server_key(server_item: &str) -> String {
    server_item.to_ascii_uppercase()
}

fn local_key(local_item: &str) -> String {
    if local_path::CASE_SENSITIVE {
        local_item.to_string()
    } else {
        local_item.to_ascii_uppercase()
    }
}

/// The workspace's record of every tracked on-disk item.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LocalVersionTable {
    /// Entries keyed by folded server item.
    entries: BTreeMap<String, LocalVersionEntry>,
    /// Folded local item -> entry key. Transient; rebuilt on load.
    #[serde(skip)]
    by_local_item: HashMap<String, String>,
}

impl TableData for LocalVersionTable {
    fn on_loaded(&mut self) {
        self.by_local_item.clear();
        for (key, entry) in &self.entries {
            if let Some(local_item) = &entry.local_item {
                self.by_local_item.insert(local_key(local_item), key.clone());
            }
        }
    }
}

impl LocalVersionTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_by_server_item(&self, server_item: &str) -> Option<&LocalVersionEntry> {
        self.entries.get(&server_key(server_item))
    }

    pub fn get_mut_by_server_item(&mut self, server_item: &str) -> Option<&mut LocalVersionEntry> {
        self.entries.get_mut(&server_key(server_item))
    }

    pub fn get_by_local_item(&self, local_item: &str) -> Option<&LocalVersionEntry> {
        let key = self.by_local_item.get(&local_key(local_item))?;
        self.entries.get(key)
    }

    pub fn get_mut_by_local_item(&mut self, local_item: &str) -> Option<&mut LocalVersionEntry> {
        let key = self.by_local_item.get(&local_key(local_item))?;
        self.entries.get_mut(key)
    }

    /// Adds or replaces an entry, keeping the local-item index coherent.
    pub fn add(&mut self, entry: LocalVersionEntry) {
        let key = server_key(&entry.server_item);

        if let Some(previous) = self.entries.get(&key) {
            if let Some(local_item) = &previous.local_item {
                self.by_local_item.remove(&local_key(local_item));
            }
        }

        if let Some(local_item) = &entry.local_item {
            self.by_local_item.insert(local_key(local_item), key.clone());
        }

        self.entries.insert(key, entry);
    }

    /// Removes the entry for a server item, returning it if present.
    pub fn remove_by_server_item(&mut self, server_item: &str) -> Option<LocalVersionEntry> {
        let entry = self.entries.remove(&server_key(server_item))?;
        if let Some(local_item) = &entry.local_item {
            self.by_local_item.remove(&local_key(local_item));
        }
        Some(entry)
    }

    /// Iterates entries in server item order.
    pub fn entries(&self) -> impl Iterator<Item = &LocalVersionEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut LocalVersionEntry> {
        self.entries.values_mut()
    }

    /// Clears the transient scanned marker on every entry.
    pub fn mark_all_unscanned(&mut self) {
        for entry in self.entries.values_mut() {
            entry.scanned = false;
        }
    }

    /// Server items of entries not visited by the current scan pass.
    pub fn unscanned_server_items(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| !e.scanned)
            .map(|e| e.server_item.clone())
            .collect()
    }

    /// Distinct local directories that contain at least one tracked item,
    /// reduced to the topmost ancestors. Used to derive watch roots.
    pub fn local_roots(&self) -> Vec<String> {
        let mut parents: Vec<String> = self
            .entries
            .values()
            .filter_map(|e| e.local_item.as_deref())
            .filter_map(local_path::get_parent)
            .collect();
        parents.sort_by(|a, b| local_path::compare_top_down(a, b));
        parents.dedup_by(|next, kept| local_path::is_child(kept, next));
        parents
    }
}

/// Real pending changes plus candidates detected by the scanner.
///
/// At most one real change and one candidate exist per target server item;
/// a real change suppresses the candidate for the same target.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PendingChangesTable {
    /// Real changes keyed by folded target server item.
    changes: BTreeMap<String, PendingChange>,
    /// Candidates keyed by folded target server item.
    candidates: BTreeMap<String, PendingChange>,
    /// Folded committed server item -> real change key. Transient.
    #[serde(skip)]
    by_committed: HashMap<String, String>,
}

impl TableData for PendingChangesTable {
    fn on_loaded(&mut self) {
        self.by_committed.clear();
        for (key, change) in &self.changes {
            if let Some(committed) = &change.committed_server_item {
                self.by_committed.insert(server_key(committed), key.clone());
            }
        }
    }
}

impl PendingChangesTable {
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn get_by_target_server_item(&self, server_item: &str) -> Option<&PendingChange> {
        self.changes.get(&server_key(server_item))
    }

    /// Looks up the real change whose committed (source) server item is the
    /// given path. Renames register here under their old name.
    pub fn get_by_committed_server_item(&self, server_item: &str) -> Option<&PendingChange> {
        let key = self.by_committed.get(&server_key(server_item))?;
        self.changes.get(key)
    }

    /// Records a real change, displacing any candidate on the same target.
    pub fn pend(&mut self, mut change: PendingChange) {
        change.candidate = false;
        let key = server_key(&change.target_server_item);
        self.candidates.remove(&key);

        if let Some(previous) = self.changes.get(&key) {
            if let Some(committed) = &previous.committed_server_item {
                self.by_committed.remove(&server_key(committed));
            }
        }
        if let Some(committed) = &change.committed_server_item {
            self.by_committed.insert(server_key(committed), key.clone());
        }

        self.changes.insert(key, change);
    }

    /// Removes the real change for a target server item.
    pub fn remove_change(&mut self, server_item: &str) -> Option<PendingChange> {
        let change = self.changes.remove(&server_key(server_item))?;
        if let Some(committed) = &change.committed_server_item {
            self.by_committed.remove(&server_key(committed));
        }
        Some(change)
    }

    pub fn get_candidate(&self, server_item: &str) -> Option<&PendingChange> {
        self.candidates.get(&server_key(server_item))
    }

    /// Records a candidate change. A real change on the same target
    /// suppresses it; an identical existing candidate is kept untouched.
    /// Returns true when the table changed.
    pub fn add_candidate(&mut self, mut change: PendingChange) -> bool {
        change.candidate = true;
        let key = server_key(&change.target_server_item);

        if self.changes.contains_key(&key) {
            return false;
        }

        if let Some(existing) = self.candidates.get(&key) {
            let same = existing.kind == change.kind
                && existing.committed == change.committed
                && committed_items_equal(
                    existing.committed_server_item.as_deref(),
                    change.committed_server_item.as_deref(),
                );
            if same {
                return false;
            }
        }

        self.candidates.insert(key, change);
        true
    }

    /// Removes the candidate for a target. Returns true if one existed.
    pub fn remove_candidate(&mut self, server_item: &str) -> bool {
        self.candidates.remove(&server_key(server_item)).is_some()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &PendingChange> {
        self.candidates.values()
    }

    pub fn changes(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.values()
    }

    /// Drops every candidate failing the predicate. Returns the number
    /// removed.
    pub fn retain_candidates(&mut self, mut keep: impl FnMut(&PendingChange) -> bool) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|_, c| keep(c));
        before - self.candidates.len()
    }

    /// True if a committed item is the source of a rename-style change,
    /// i.e. a real change claims it as committed item while targeting a
    /// different server item.
    pub fn is_renamed_away(&self, server_item: &str) -> bool {
        match self.get_by_committed_server_item(server_item) {
            Some(change) => !crate::core::server_path::equals(
                &change.target_server_item,
                server_item,
            ),
            None => false,
        }
    }
}

fn committed_items_equal(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => crate::core::server_path::equals(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ChangeKind;

    fn entry(server: &str, local: &str) -> LocalVersionEntry {
        LocalVersionEntry::new(server, local)
    }

    #[test]
    fn test_local_item_index_follows_add_and_remove() {
        let mut table = LocalVersionTable::default();
        table.add(entry("$/p/a.txt", "/w/a.txt"));

        assert!(table.get_by_local_item("/w/a.txt").is_some());

        // Re-adding under a new local item drops the stale index entry.
        table.add(entry("$/p/a.txt", "/w/renamed.txt"));
        assert!(table.get_by_local_item("/w/a.txt").is_none());
        assert!(table.get_by_local_item("/w/renamed.txt").is_some());

        table.remove_by_server_item("$/p/a.txt");
        assert!(table.get_by_local_item("/w/renamed.txt").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_server_item_lookup_is_case_insensitive() {
        let mut table = LocalVersionTable::default();
        table.add(entry("$/Proj/File.txt", "/w/File.txt"));
        assert!(table.get_by_server_item("$/proj/file.TXT").is_some());
    }

    #[test]
    fn test_on_loaded_rebuilds_local_index() {
        let mut table = LocalVersionTable::default();
        table.add(entry("$/p/a", "/w/a"));

        let json = serde_json::to_string(&table).unwrap();
        let mut reloaded: LocalVersionTable = serde_json::from_str(&json).unwrap();
        assert!(reloaded.get_by_local_item("/w/a").is_none());

        reloaded.on_loaded();
        assert!(reloaded.get_by_local_item("/w/a").is_some());
    }

    #[test]
    fn test_local_roots_deduplicates_nested_parents() {
        let mut table = LocalVersionTable::default();
        table.add(entry("$/p/a", "/w/a"));
        table.add(entry("$/p/d/b", "/w/d/b"));
        table.add(entry("$/q/x", "/other/x"));

        let roots = table.local_roots();
        assert_eq!(roots, vec!["/other".to_string(), "/w".to_string()]);
    }

    #[test]
    fn test_real_change_suppresses_candidate() {
        let mut table = PendingChangesTable::default();
        table.pend(PendingChange::new("$/p/a", ChangeKind::EDIT));

        let mut candidate = PendingChange::new("$/p/a", ChangeKind::add_edit());
        candidate.candidate = true;
        assert!(!table.add_candidate(candidate));
        assert_eq!(table.candidate_count(), 0);
    }

    #[test]
    fn test_identical_candidate_does_not_dirty() {
        let mut table = PendingChangesTable::default();
        let candidate = PendingChange::new("$/p/a", ChangeKind::add_edit());

        assert!(table.add_candidate(candidate.clone()));
        assert!(!table.add_candidate(candidate));

        // A different kind replaces.
        let replacement = PendingChange::new("$/p/a", ChangeKind::DELETE);
        assert!(table.add_candidate(replacement));
        assert_eq!(table.candidate_count(), 1);
    }

    #[test]
    fn test_pend_displaces_candidate() {
        let mut table = PendingChangesTable::default();
        assert!(table.add_candidate(PendingChange::new("$/p/a", ChangeKind::add_edit())));

        table.pend(PendingChange::new("$/p/a", ChangeKind::ADD));
        assert_eq!(table.candidate_count(), 0);
        assert!(table.get_by_target_server_item("$/p/a").is_some());
    }

    #[test]
    fn test_committed_index_tracks_renames() {
        let mut table = PendingChangesTable::default();
        let mut rename = PendingChange::new("$/p/new", ChangeKind::EDIT);
        rename.committed_server_item = Some("$/p/old".to_string());
        table.pend(rename);

        assert!(table.get_by_committed_server_item("$/p/old").is_some());
        assert!(table.is_renamed_away("$/p/old"));
        assert!(!table.is_renamed_away("$/p/new"));

        table.remove_change("$/p/new");
        assert!(table.get_by_committed_server_item("$/p/old").is_none());
    }

    #[test]
    fn test_retain_candidates() {
        let mut table = PendingChangesTable::default();
        table.add_candidate(PendingChange::new("$/p/a", ChangeKind::add_edit()));
        table.add_candidate(PendingChange::new("$/p/b", ChangeKind::DELETE));

        let removed = table.retain_candidates(|c| c.is_delete());
        assert_eq!(removed, 1);
        assert!(table.get_candidate("$/p/b").is_some());
        assert!(table.get_candidate("$/p/a").is_none());
    }
}
