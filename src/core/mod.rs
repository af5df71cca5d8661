//! Core functionality for the workspace tracking engine.
//!
//! This module provides the fundamental building blocks: path utilities,
//! ignore evaluation, baseline storage, crash-safe table persistence, the
//! workspace scanner, and change-notification aggregation.

pub mod baseline;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ignore;
pub mod local_path;
pub mod scanner;
pub mod server_path;
pub mod state;
pub mod table;
pub mod table_lock;
pub mod tables;
pub mod watcher;
pub mod wildcard;
pub mod working_folder;
pub mod workspace;

// === Error handling ===
// Core error types and result type used throughout the engine
pub use error::{Result, WorkspaceTrackerError};

// === Tracked state ===
// Rows of the two persisted tables and the change-kind flags
pub use state::{ChangeKind, LocalVersionEntry, PendingChange, PropertyValue};

// === Table persistence ===
// Crash-safe 3-slot rotation, cross-process locking, concrete payloads
pub use table::{CachedTable, MetadataTable, TableData};
pub use table_lock::TableLock;
pub use tables::{LocalVersionTable, PendingChangesTable};

// === Baseline storage ===
// Partitioned content-addressed storage for pristine file copies
pub use baseline::{BaselineFolder, BaselineId};

// === Ignore evaluation ===
// Per-directory rule sets plus global rules, evaluated nearest-first
pub use ignore::{ExclusionEvaluator, IgnoreEntry, IgnoreFile};

// === Scanning ===
// The full/partial diff engine over one workspace's open tables
pub use scanner::{LocalWorkspaceScanner, ScanSummary};

// === Change watching ===
// Bounded invalidation reports and per-workspace scan dispatch
pub use watcher::{
    ManualPathWatcher, NotifyPathWatcher, PathWatcher, PathWatcherReport, WorkspaceWatcher,
};

// === Workspace plumbing ===
// Mappings, configuration, cancellation, and the table transaction
pub use cancel::{CancellationToken, NullProgress, ProgressSink};
pub use config::TrackerConfig;
pub use working_folder::{MappingDepth, WorkingFolder, WorkingFolderSet};
pub use workspace::{Workspace, WorkspaceTransaction};
