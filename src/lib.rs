//! Workspace Tracker - the local workspace tracking engine of a centralized
//! version-control client.
//!
//! This library maintains an offline, crash-safe record of which files under
//! a set of mapped directories are tracked, what their last-known server
//! state was, and which local edits, adds, and deletes are pending - without
//! needing server round-trips for every file operation.
//!
//! # Public API
//! The main public interface is re-exported from the [`core`] module, which
//! provides:
//! - Local/server path canonicalization and wildcard matching
//! - Ignore-file exclusion evaluation
//! - Crash-safe, lock-protected metadata table persistence
//! - The full/partial workspace scanner
//! - Filesystem-change aggregation and scan dispatch
//! - Baseline (pristine copy) storage

pub mod core;

// Re-export the core public API for external users
pub use core::{
    BaselineFolder,
    BaselineId,

    CachedTable,
    // Cancellation and progress
    CancellationToken,
    ChangeKind,
    // Ignore evaluation
    ExclusionEvaluator,
    IgnoreEntry,
    IgnoreFile,

    // Tracked state
    LocalVersionEntry,
    LocalVersionTable,
    // Scanning
    LocalWorkspaceScanner,
    ManualPathWatcher,
    MappingDepth,
    // Table persistence
    MetadataTable,
    NotifyPathWatcher,
    NullProgress,

    PathWatcher,
    // Change watching
    PathWatcherReport,
    PendingChange,
    PendingChangesTable,
    ProgressSink,
    PropertyValue,
    // Error handling
    Result,

    ScanSummary,
    TableData,
    TableLock,
    // Configuration
    TrackerConfig,

    WorkingFolder,
    // Mappings and transactions
    WorkingFolderSet,
    Workspace,
    WorkspaceTrackerError,
    WorkspaceTransaction,
    WorkspaceWatcher,
};
