//! Cross-process locking for the metadata tables.
//!
//! Each table is guarded by an exclusive advisory lock on a sibling
//! `<name>.lock` file. Acquisition retries with escalating sleeps and gives
//! up with a timeout error rather than blocking forever; a `<name>.yield`
//! marker file lets a waiter ask a long-running holder to release early.
//! Yielding is voluntary: holders poll for the marker at safe points.
//!
//! # Public API
//! - [`TableLock`]: RAII lock guard, unlocked on drop
//! - [`TableLock::acquire`] / [`TableLock::try_acquire`]
//! - [`TableLock::yield_requested`] / [`TableLock::request_yield`]

use crate::core::error::{Result, WorkspaceTrackerError};
use fs2::FileExt;
use log::{debug, trace, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Extension of the lock file guarding a table.
pub const LOCK_EXTENSION: &str = "lock";

/// Extension of the advisory yield-request marker.
pub const YIELD_EXTENSION: &str = "yield";

/// Sleep lengths between acquisition attempts. The total wait before a
/// timeout is the sum of these, about 8 seconds.
const RETRY_SCHEDULE_MS: &[u64] = &[10, 20, 50, 100, 250, 500, 1000, 2000, 4000];

/// An exclusive cross-process lock over one metadata table.
///
/// The lock is released when the guard drops. The lock file itself is left
/// in place for the next acquirer.
#[derive(Debug)]
pub struct TableLock {
    name: String,
    lock_path: PathBuf,
    yield_path: PathBuf,
    file: File,
}

impl TableLock {
    /// Acquires the lock for the table rooted at `table_base` (the slot
    /// path without extension), retrying on contention. Posts a yield
    /// request to the current holder while waiting.
    pub fn acquire(table_base: &Path) -> Result<TableLock> {
        let lock_path = table_base.with_extension(LOCK_EXTENSION);
        let yield_path = table_base.with_extension(YIELD_EXTENSION);
        let name = table_name(table_base);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let mut attempts: u32 = 0;
        for &sleep_ms in RETRY_SCHEDULE_MS {
            attempts += 1;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let lock = TableLock {
                        name,
                        lock_path,
                        yield_path,
                        file,
                    };
                    lock.clear_yield_request();
                    trace!("acquired table lock '{}'", lock.name);
                    return Ok(lock);
                }
                Err(e) => {
                    trace!(
                        "table lock '{}' busy (attempt {}): {}",
                        name,
                        attempts,
                        e
                    );
                }
            }

            // Ask the holder to wrap up, then back off.
            if let Err(e) = File::create(&yield_path) {
                warn!("could not post yield request for '{}': {}", name, e);
            }
            thread::sleep(Duration::from_millis(sleep_ms));
        }

        // Final attempt after the last sleep.
        attempts += 1;
        if file.try_lock_exclusive().is_ok() {
            let lock = TableLock {
                name,
                lock_path,
                yield_path,
                file,
            };
            lock.clear_yield_request();
            return Ok(lock);
        }

        debug!("table lock '{}' timed out after {} attempts", name, attempts);
        Err(WorkspaceTrackerError::lock_timeout(name, attempts))
    }

    /// Single non-blocking acquisition attempt.
    pub fn try_acquire(table_base: &Path) -> Result<Option<TableLock>> {
        let lock_path = table_base.with_extension(LOCK_EXTENSION);
        let yield_path = table_base.with_extension(YIELD_EXTENSION);
        let name = table_name(table_base);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let lock = TableLock {
                    name,
                    lock_path,
                    yield_path,
                    file,
                };
                lock.clear_yield_request();
                Ok(Some(lock))
            }
            Err(_) => Ok(None),
        }
    }

    /// The table name this lock guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if a waiter has asked the holder to release the lock. Holders
    /// poll this at safe points during long operations.
    pub fn yield_requested(&self) -> bool {
        self.yield_path.exists()
    }

    /// Posts a yield request for whoever holds the lock on `table_base`.
    pub fn request_yield(table_base: &Path) -> Result<()> {
        let yield_path = table_base.with_extension(YIELD_EXTENSION);
        File::create(yield_path)?;
        Ok(())
    }

    fn clear_yield_request(&self) {
        match fs::remove_file(&self.yield_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "could not clear yield marker {}: {}",
                self.yield_path.display(),
                e
            ),
        }
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("failed to unlock '{}': {}", self.lock_path.display(), e);
        }
        trace!("released table lock '{}'", self.name);
    }
}

fn table_name(table_base: &Path) -> String {
    table_base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| table_base.display().to_string())
}
