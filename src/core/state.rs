//! Tracked-item and pending-change data structures.
//!
//! These are the rows of the two persisted metadata tables. They carry no
//! behavior beyond invariant-preserving accessors; all mutation flows
//! through the scanner and explicit workspace operations.
//!
//! # Public API
//! - [`LocalVersionEntry`]: one tracked filesystem object
//! - [`PendingChange`]: a real pending change or a detected candidate
//! - [`ChangeKind`]: the add/edit/delete/property combination on a change
//! - [`PropertyValue`]: a named property carried by property changes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Well-known property indicating an item is a symbolic link.
pub const PROPERTY_SYMLINK: &str = "symlink";

/// Well-known property indicating an item carries the executable bit.
pub const PROPERTY_EXECUTABLE: &str = "executable";

/// Converts a filesystem modification time to the millisecond form stored
/// in the local version table.
pub fn system_time_to_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// A named property value attached to a pending change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub name: String,
    pub value: String,
}

impl PropertyValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The property recorded for a symbolic link.
    pub fn symlink(enabled: bool) -> Self {
        Self::new(PROPERTY_SYMLINK, if enabled { "true" } else { "false" })
    }

    /// The property recorded for the executable bit.
    pub fn executable(enabled: bool) -> Self {
        Self::new(PROPERTY_EXECUTABLE, if enabled { "true" } else { "false" })
    }
}

/// The combination of change types carried by one pending change.
///
/// A change may carry several kinds at once (a candidate add is recorded as
/// add + edit, possibly + property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeKind(u8);

impl ChangeKind {
    pub const ADD: ChangeKind = ChangeKind(1);
    pub const EDIT: ChangeKind = ChangeKind(2);
    pub const DELETE: ChangeKind = ChangeKind(4);
    pub const PROPERTY: ChangeKind = ChangeKind(8);

    /// The kind recorded for a newly detected candidate add.
    pub fn add_edit() -> ChangeKind {
        Self::ADD.with(Self::EDIT)
    }

    pub fn with(self, other: ChangeKind) -> ChangeKind {
        ChangeKind(self.0 | other.0)
    }

    pub fn without(self, other: ChangeKind) -> ChangeKind {
        ChangeKind(self.0 & !other.0)
    }

    pub fn contains(self, other: ChangeKind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_add(self) -> bool {
        self.contains(Self::ADD)
    }

    pub fn is_edit(self) -> bool {
        self.contains(Self::EDIT)
    }

    pub fn is_delete(self) -> bool {
        self.contains(Self::DELETE)
    }

    pub fn is_property(self) -> bool {
        self.contains(Self::PROPERTY)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_add() {
            parts.push("add");
        }
        if self.is_edit() {
            parts.push("edit");
        }
        if self.is_delete() {
            parts.push("delete");
        }
        if self.is_property() {
            parts.push("property");
        }
        if parts.is_empty() {
            parts.push("none");
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// One tracked filesystem object in the local version table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVersionEntry {
    /// Server item path (`$/...`).
    pub server_item: String,
    /// Local item path; `None` if the item has no local presence.
    pub local_item: Option<String>,
    /// True for directories.
    pub is_directory: bool,
    /// True if the item has a server-known version, false if purely local.
    pub committed: bool,
    /// True if the item was last seen missing from disk.
    pub missing_on_disk: bool,
    /// Byte length of the file content (0 for directories).
    pub length: i64,
    /// 16-byte content hash, or `None` if no hash data is recorded.
    pub hash: Option<[u8; 16]>,
    /// Baseline identifier for the pristine copy, if one is stored.
    pub baseline_id: Option<[u8; 16]>,
    /// Last-modified time in milliseconds since the epoch; -1 if unknown.
    pub last_modified_millis: i64,
    /// True if the item is a symbolic link.
    pub symlink: bool,
    /// True if the item carries the executable bit.
    pub executable: bool,
    /// Transient marker used only during a scan pass; never persisted.
    #[serde(skip)]
    pub scanned: bool,
}

impl LocalVersionEntry {
    pub fn new(server_item: impl Into<String>, local_item: impl Into<String>) -> Self {
        Self {
            server_item: server_item.into(),
            local_item: Some(local_item.into()),
            is_directory: false,
            committed: true,
            missing_on_disk: false,
            length: -1,
            hash: None,
            baseline_id: None,
            last_modified_millis: -1,
            symlink: false,
            executable: false,
            scanned: false,
        }
    }

    /// True if this entry carries the length/hash data needed for diffing.
    pub fn has_comparison_data(&self) -> bool {
        self.length >= 0 && self.hash.is_some()
    }
}

/// A proposed (candidate) or recorded (real) local change.
///
/// Invariant, enforced by the pending-changes table: at most one real change
/// and at most one candidate exist per target server item, and the real
/// change suppresses the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// The server item this change targets.
    pub target_server_item: String,
    /// The previously committed server item, if the change renames.
    pub committed_server_item: Option<String>,
    /// The change kinds carried.
    pub kind: ChangeKind,
    /// True for a detected-but-not-yet-pended candidate.
    pub candidate: bool,
    /// True if the target has a committed server version.
    pub committed: bool,
    /// Byte length snapshot taken when the change was recorded.
    pub length: i64,
    /// Content hash snapshot, if taken.
    pub hash: Option<[u8; 16]>,
    /// Properties carried by property changes.
    pub properties: Vec<PropertyValue>,
}

impl PendingChange {
    pub fn new(target_server_item: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            target_server_item: target_server_item.into(),
            committed_server_item: None,
            kind,
            candidate: false,
            committed: false,
            length: 0,
            hash: None,
            properties: Vec::new(),
        }
    }

    /// Builds the candidate delete recorded when a tracked item goes
    /// missing from disk.
    pub fn candidate_delete(entry: &LocalVersionEntry, target_server_item: impl Into<String>) -> Self {
        let mut change = Self::new(target_server_item, ChangeKind::DELETE);
        change.candidate = true;
        change.committed = entry.committed;
        change.committed_server_item = entry.committed.then(|| entry.server_item.clone());
        change
    }

    pub fn is_add(&self) -> bool {
        self.kind.is_add()
    }

    pub fn is_edit(&self) -> bool {
        self.kind.is_edit()
    }

    pub fn is_delete(&self) -> bool {
        self.kind.is_delete()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Adds or replaces a carried property and marks the change as a
    /// property change.
    pub fn set_property(&mut self, value: PropertyValue) {
        self.kind = self.kind.with(ChangeKind::PROPERTY);
        if let Some(existing) = self.properties.iter_mut().find(|p| p.name == value.name) {
            *existing = value;
        } else {
            self.properties.push(value);
        }
    }
}
