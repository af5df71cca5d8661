//! Three-slot atomic persistence for metadata tables.
//!
//! Each table lives in up to three sibling slot files: `.tb1` is the
//! authoritative copy, `.tb2` the on-deck copy from the previous save, and
//! `.tb3` the copy currently being written. A save writes slot three in
//! full, then rotates the slots with renames so a crash at any point leaves
//! either the old or the new table intact, never a torn file.
//!
//! Recovery on open: a leftover slot two beside a slot one is discarded; a
//! slot two without a slot one is promoted. Slot three is always discarded.
//!
//! # Public API
//! - [`TableData`]: contract for a table's serializable payload
//! - [`MetadataTable`]: open/load/save/close handle over one table
//! - [`CachedTable`]: reusable in-memory copy returned by a clean close

use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::table_lock::TableLock;
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

/// Extension of the authoritative slot.
pub const SLOT_ONE_EXTENSION: &str = "tb1";
/// Extension of the on-deck slot.
pub const SLOT_TWO_EXTENSION: &str = "tb2";
/// Extension of the in-progress slot.
pub const SLOT_THREE_EXTENSION: &str = "tb3";

/// Rename attempts before giving up; anti-virus and indexer interference
/// usually clears within the first retry or two.
const RENAME_ATTEMPTS: u32 = 5;
const RENAME_RETRY_SLEEP: Duration = Duration::from_millis(100);

/// The serializable payload of a metadata table.
pub trait TableData: Serialize + DeserializeOwned + Default {
    /// Called after deserialization so the payload can rebuild transient
    /// indexes that are not persisted.
    fn on_loaded(&mut self) {}
}

/// Size and mtime of a slot-one file, captured to validate cached reuse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotAttributes {
    pub length: u64,
    pub modified: SystemTime,
}

impl SlotAttributes {
    fn read(path: &Path) -> Option<SlotAttributes> {
        let meta = fs::metadata(path).ok()?;
        Some(SlotAttributes {
            length: meta.len(),
            modified: meta.modified().ok()?,
        })
    }
}

/// An in-memory table copy eligible for reuse on the next open, paired
/// with the slot-one attributes it mirrors.
#[derive(Debug)]
pub struct CachedTable<D> {
    pub data: D,
    pub attributes: SlotAttributes,
}

/// An open, locked metadata table.
///
/// The table holds its cross-process lock from open to close. Mutations go
/// through [`MetadataTable::modify`] so the dirty flag stays accurate; a
/// close persists only when dirty and not aborted.
pub struct MetadataTable<D: TableData> {
    base: PathBuf,
    data: D,
    dirty: bool,
    aborted: bool,
    lock: TableLock,
}

impl<D: TableData> MetadataTable<D> {
    /// Opens the table at `base` (path without extension): acquires the
    /// lock, runs slot recovery, and loads slot one if present.
    pub fn open(base: impl Into<PathBuf>) -> Result<MetadataTable<D>> {
        Self::open_with_cache(base, None).map(|(table, _)| table)
    }

    /// Like [`MetadataTable::open`], but reuses a previously returned
    /// [`CachedTable`] when slot one is unchanged since it was captured.
    /// Returns the cache back if it was not consumed.
    pub fn open_with_cache(
        base: impl Into<PathBuf>,
        cache: Option<CachedTable<D>>,
    ) -> Result<(MetadataTable<D>, Option<CachedTable<D>>)> {
        let base = base.into();
        let lock = TableLock::acquire(&base)?;

        recover(&base)?;

        let slot_one = base.with_extension(SLOT_ONE_EXTENSION);
        let current = SlotAttributes::read(&slot_one);

        // Reuse the cached copy only when slot one is byte-for-byte the
        // file it was captured from (same length and mtime).
        let (data, leftover) = match (cache, current) {
            (Some(cached), Some(current)) if cached.attributes == current => {
                trace!("cached load hit for {}", base.display());
                (cached.data, None)
            }
            (cache, _) => {
                let data = match load_slot(&slot_one)? {
                    Some(data) => data,
                    None => {
                        debug!("no table file at {}, starting empty", slot_one.display());
                        D::default()
                    }
                };
                (data, cache)
            }
        };

        Ok((
            MetadataTable {
                base,
                data,
                dirty: false,
                aborted: false,
                lock,
            },
            leftover,
        ))
    }

    /// Read access to the payload.
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Mutable access that marks the table dirty.
    pub fn modify(&mut self) -> &mut D {
        self.dirty = true;
        &mut self.data
    }

    /// Mutable access for transient state that must not trigger a save.
    pub fn modify_transient(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the table aborted: close will discard all changes.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// True if another process has asked this holder to release the table.
    pub fn yield_requested(&self) -> bool {
        self.lock.yield_requested()
    }

    /// Closes the table. Dirty, non-aborted data is persisted through the
    /// slot rotation; the returned [`CachedTable`] (when available) can be
    /// passed to the next [`MetadataTable::open_with_cache`].
    pub fn close(mut self) -> Result<Option<CachedTable<D>>> {
        if !self.dirty || self.aborted {
            if self.aborted && self.dirty {
                // The in-memory copy diverged from slot one and must not
                // be offered for cached reuse.
                debug!("discarding changes to {}", self.base.display());
                return Ok(None);
            }
            let slot_one = self.base.with_extension(SLOT_ONE_EXTENSION);
            let attributes = SlotAttributes::read(&slot_one);
            let data = std::mem::take(&mut self.data);
            return Ok(attributes.map(|attributes| CachedTable { data, attributes }));
        }

        let slot_one = self.base.with_extension(SLOT_ONE_EXTENSION);
        let slot_two = self.base.with_extension(SLOT_TWO_EXTENSION);
        let slot_three = self.base.with_extension(SLOT_THREE_EXTENSION);

        // Write the new table in full to slot three.
        if let Some(parent) = slot_three.parent() {
            fs::create_dir_all(parent)?;
        }
        save_slot(&slot_three, &self.data)?;

        // Rotate: 3 -> 2 -> 1. Slot one is only unlinked after the new
        // table is durable in slot two.
        remove_if_present(&slot_two)?;
        rename_with_retries(&slot_three, &slot_two)?;
        remove_if_present(&slot_one)?;
        rename_with_retries(&slot_two, &slot_one)?;

        trace!("saved table {}", slot_one.display());

        let attributes = SlotAttributes::read(&slot_one);
        let data = std::mem::take(&mut self.data);
        Ok(attributes.map(|attributes| CachedTable { data, attributes }))
    }
}

/// Repairs the slot files after a crash. Called under the table lock.
fn recover(base: &Path) -> Result<()> {
    let slot_one = base.with_extension(SLOT_ONE_EXTENSION);
    let slot_two = base.with_extension(SLOT_TWO_EXTENSION);
    let slot_three = base.with_extension(SLOT_THREE_EXTENSION);

    // A partial write in slot three is never trustworthy.
    remove_if_present(&slot_three)?;

    if slot_two.exists() {
        if slot_one.exists() {
            // The rotation completed through slot one; slot two is stale.
            warn!("discarding stale table slot {}", slot_two.display());
            remove_if_present(&slot_two)?;
        } else {
            // Crash between the unlink of slot one and the final rename.
            warn!("promoting table slot {}", slot_two.display());
            rename_with_retries(&slot_two, &slot_one)?;
        }
    }

    Ok(())
}

fn load_slot<D: TableData>(path: &Path) -> Result<Option<D>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut data: D = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| WorkspaceTrackerError::table_parse_failed(path, e))?;
    data.on_loaded();
    Ok(Some(data))
}

fn save_slot<D: TableData>(path: &Path, data: &D) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, data)
        .map_err(|e| WorkspaceTrackerError::TableSerializationFailed { source: e })?;
    let file = writer
        .into_inner()
        .map_err(|e| WorkspaceTrackerError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Renames with a short retry loop. Transient sharing violations from
/// scanners and indexers are the common cause of rename failures here.
fn rename_with_retries(from: &Path, to: &Path) -> Result<()> {
    let mut last_error: Option<io::Error> = None;
    for attempt in 0..RENAME_ATTEMPTS {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(e) => {
                trace!(
                    "rename {} -> {} failed (attempt {}): {}",
                    from.display(),
                    to.display(),
                    attempt + 1,
                    e
                );
                last_error = Some(e);
            }
        }
        thread::sleep(RENAME_RETRY_SLEEP);
    }

    warn!(
        "rename {} -> {} failed after {} attempts: {:?}",
        from.display(),
        to.display(),
        RENAME_ATTEMPTS,
        last_error
    );
    Err(WorkspaceTrackerError::rename_exhausted(from, to))
}
