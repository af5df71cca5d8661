//! Tracker configuration.
//!
//! Everything the original system read from global statics or system
//! properties is an explicit value here, passed in at construction.

use serde::{Deserialize, Serialize};

use crate::core::ignore::DEFAULT_IGNORE_FILE_NAME;

/// Configuration for scanning and watching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Name of the per-directory ignore file.
    pub ignore_file_name: String,
    /// Global exclusion rules applied beneath every workspace root.
    pub global_exclusions: Vec<String>,
    /// Full-scan stops discovering new candidate adds past this count.
    pub max_candidate_adds: usize,
    /// Full-scan stops enumerating past this many items.
    pub max_enumerated_items: usize,
    /// Changed-path cap before a watcher report fully invalidates.
    pub watcher_change_cap: usize,
    /// When false, every detected change triggers a full scan.
    pub partial_scan_enabled: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            ignore_file_name: DEFAULT_IGNORE_FILE_NAME.to_string(),
            global_exclusions: Vec::new(),
            max_candidate_adds: 50_000,
            max_enumerated_items: 500_000,
            watcher_change_cap: 128,
            partial_scan_enabled: true,
        }
    }
}
