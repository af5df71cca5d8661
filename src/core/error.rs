//! Domain-specific error types and error handling utilities.
//!
//! This module defines [`WorkspaceTrackerError`] which provides error handling
//! for all workspace tracking operations. It uses `thiserror` for ergonomic
//! error definitions and includes specialized error constructors for common
//! failure scenarios.
//!
//! # Public API
//! - [`WorkspaceTrackerError`]: Main error enum covering all failure modes
//! - [`Result<T>`]: Type alias for `std::result::Result<T, WorkspaceTrackerError>`
//!
//! # Error Categories
//! - **Path format errors**: malformed, oversized or illegal paths; never retried
//! - **Lock/timeout errors**: table lock acquisition and slot-rename retries
//!   exhausted; kept distinct so callers can tell "busy" from "corrupt"
//! - **I/O errors**: attribute reads, hashing, table slot files
//! - **Cancellation**: the cooperative scan-abort signal, never conflated
//!   with real failures

use std::path::PathBuf;
use thiserror::Error;

/// Domain-specific error types for workspace-tracker
#[derive(Error, Debug)]
pub enum WorkspaceTrackerError {
    // Path format errors
    #[error("Path is too long ({length} characters, maximum is {maximum}): {path}")]
    PathTooLong {
        path: String,
        length: usize,
        maximum: usize,
    },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("A path component must not begin with '$': {path}")]
    IllegalDollarInPath { path: String },

    #[error("Wildcard characters are not allowed here: {path}")]
    UnexpectedWildcard { path: String },

    #[error("Item is not mapped to this workspace: {path}")]
    ItemNotMapped { path: String },

    // Lock/timeout errors
    #[error("Timed out acquiring the table lock '{name}' after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    #[error("Could not rename {from} to {to} after repeated attempts")]
    RenameExhausted { from: PathBuf, to: PathBuf },

    // Baseline errors
    #[error("Baseline identifier must be 16 bytes (got {length})")]
    InvalidBaselineId { length: usize },

    #[error("Could not create a baseline folder under: {path}")]
    BaselineFolderUnavailable { path: PathBuf },

    #[error("Baseline {id} not found in {folder}")]
    BaselineNotFound { id: String, folder: PathBuf },

    // Watcher errors
    #[error("Failed to watch {path}: {message}")]
    WatchFailed { path: String, message: String },

    // Generic I/O and serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize table data: {source}")]
    TableSerializationFailed { source: serde_json::Error },

    #[error("Failed to parse table file '{path}': {source}")]
    TableParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    // Cancellation
    #[error("The operation was cancelled")]
    Cancelled,
}

/// Convenience type alias for Results using WorkspaceTrackerError
pub type Result<T> = std::result::Result<T, WorkspaceTrackerError>;

impl WorkspaceTrackerError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a path too long error
    pub fn path_too_long(path: impl Into<String>, maximum: usize) -> Self {
        let path = path.into();
        let length = path.chars().count();
        Self::PathTooLong {
            path,
            length,
            maximum,
        }
    }

    /// Create an item not mapped error
    pub fn item_not_mapped(path: impl Into<String>) -> Self {
        Self::ItemNotMapped { path: path.into() }
    }

    /// Create a lock timeout error
    pub fn lock_timeout(name: impl Into<String>, attempts: u32) -> Self {
        Self::LockTimeout {
            name: name.into(),
            attempts,
        }
    }

    /// Create a rename exhausted error
    pub fn rename_exhausted(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::RenameExhausted {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a table parse failed error
    pub fn table_parse_failed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::TableParseFailed {
            path: path.into(),
            source,
        }
    }

    /// True if this error represents the cooperative cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True if this error represents a lock or rename timeout ("busy", not
    /// "corrupt").
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::RenameExhausted { .. }
        )
    }
}
