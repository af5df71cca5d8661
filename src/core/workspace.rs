//! Workspace metadata layout and the table transaction.
//!
//! A [`Workspace`] owns the location of the metadata tables, the working
//! folder mappings, and the cached table copies that make repeated opens
//! cheap. All table access goes through a [`WorkspaceTransaction`]: open
//! both tables under their locks, mutate, then commit (flush) or abort
//! (discard). Dropping a transaction without committing discards changes.
//!
//! # Public API
//! - [`Workspace`]: per-workspace state and table locations
//! - [`WorkspaceTransaction`]: scoped access to the open tables

use crate::core::baseline::BaselineFolder;
use crate::core::cancel::{CancellationToken, ProgressSink};
use crate::core::config::TrackerConfig;
use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::scanner::{LocalWorkspaceScanner, ScanSummary};
use crate::core::table::{CachedTable, MetadataTable};
use crate::core::tables::{
    LocalVersionTable, PendingChangesTable, LOCAL_VERSION_TABLE_NAME, PENDING_CHANGES_TABLE_NAME,
};
use crate::core::working_folder::WorkingFolderSet;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// One local workspace: metadata location, mappings, configuration, and
/// the cached table copies from the last committed transaction.
pub struct Workspace {
    metadata_dir: PathBuf,
    working_folders: WorkingFolderSet,
    config: TrackerConfig,
    lv_cache: Option<CachedTable<LocalVersionTable>>,
    pc_cache: Option<CachedTable<PendingChangesTable>>,
}

impl Workspace {
    pub fn new(
        metadata_dir: impl Into<PathBuf>,
        working_folders: WorkingFolderSet,
        config: TrackerConfig,
    ) -> Workspace {
        Workspace {
            metadata_dir: metadata_dir.into(),
            working_folders,
            config,
            lv_cache: None,
            pc_cache: None,
        }
    }

    /// The conventional metadata directory for a named workspace under the
    /// user's local data directory.
    pub fn default_metadata_dir(workspace_name: &str) -> Option<PathBuf> {
        Some(
            dirs::data_local_dir()?
                .join("workspace-tracker")
                .join(workspace_name),
        )
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn working_folders(&self) -> &WorkingFolderSet {
        &self.working_folders
    }

    pub fn working_folders_mut(&mut self) -> &mut WorkingFolderSet {
        // Mapping changes invalidate any cached table reuse pairing.
        self.lv_cache = None;
        self.pc_cache = None;
        &mut self.working_folders
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn local_version_base(&self) -> PathBuf {
        self.metadata_dir.join(LOCAL_VERSION_TABLE_NAME)
    }

    fn pending_changes_base(&self) -> PathBuf {
        self.metadata_dir.join(PENDING_CHANGES_TABLE_NAME)
    }

    /// The baseline folder serving a local item, created on demand at the
    /// working-folder root that contains it.
    pub fn baseline_folder_for(&self, local_item: &str) -> Result<BaselineFolder> {
        let root = self
            .working_folders
            .root_containing(local_item)
            .ok_or_else(|| WorkspaceTrackerError::item_not_mapped(local_item))?;
        BaselineFolder::create(&root)
    }

    /// Opens both tables under their locks and starts a transaction.
    pub fn transaction(&mut self) -> Result<WorkspaceTransaction<'_>> {
        let lv_cache = self.lv_cache.take();
        let pc_cache = self.pc_cache.take();

        let (lv, _) = MetadataTable::open_with_cache(self.local_version_base(), lv_cache)?;
        let (pc, _) = MetadataTable::open_with_cache(self.pending_changes_base(), pc_cache)?;

        debug!("transaction opened at {}", self.metadata_dir.display());
        Ok(WorkspaceTransaction {
            working_folders: self.working_folders.clone(),
            config: self.config.clone(),
            workspace: self,
            lv,
            pc,
        })
    }
}

/// Scoped, single-writer access to a workspace's open tables.
///
/// Holds both table locks for its lifetime. Commit flushes dirty tables
/// through the slot rotation and hands their in-memory copies back to the
/// workspace for cached reuse; abort (or drop) discards all changes.
pub struct WorkspaceTransaction<'a> {
    workspace: &'a mut Workspace,
    working_folders: WorkingFolderSet,
    config: TrackerConfig,
    lv: MetadataTable<LocalVersionTable>,
    pc: MetadataTable<PendingChangesTable>,
}

impl<'a> WorkspaceTransaction<'a> {
    pub fn local_versions(&self) -> &LocalVersionTable {
        self.lv.data()
    }

    pub fn local_versions_mut(&mut self) -> &mut LocalVersionTable {
        self.lv.modify()
    }

    pub fn pending_changes(&self) -> &PendingChangesTable {
        self.pc.data()
    }

    pub fn pending_changes_mut(&mut self) -> &mut PendingChangesTable {
        self.pc.modify()
    }

    /// True if another process asked this holder to wrap up.
    pub fn yield_requested(&self) -> bool {
        self.lv.yield_requested() || self.pc.yield_requested()
    }

    /// Runs a full scan inside this transaction.
    pub fn full_scan(
        &mut self,
        token: CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<ScanSummary> {
        let mut scanner = LocalWorkspaceScanner::new(
            &mut self.lv,
            &mut self.pc,
            &self.working_folders,
            &self.config,
            token,
            progress,
        );
        scanner.full_scan()
    }

    /// Runs a partial scan inside this transaction.
    pub fn partial_scan(
        &mut self,
        changed_paths: &[String],
        token: CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<ScanSummary> {
        let mut scanner = LocalWorkspaceScanner::new(
            &mut self.lv,
            &mut self.pc,
            &self.working_folders,
            &self.config,
            token,
            progress,
        );
        scanner.partial_scan(changed_paths)
    }

    /// Flushes dirty tables and releases the locks. The flushed in-memory
    /// copies stay with the workspace for cached reuse.
    pub fn commit(self) -> Result<()> {
        let WorkspaceTransaction {
            workspace, lv, pc, ..
        } = self;

        let lv_dirty = lv.is_dirty();
        let pc_dirty = pc.is_dirty();

        workspace.lv_cache = lv.close()?;
        workspace.pc_cache = pc.close()?;

        if lv_dirty || pc_dirty {
            info!(
                "transaction committed at {}",
                workspace.metadata_dir.display()
            );
        }
        Ok(())
    }

    /// Discards every change made in this transaction.
    pub fn abort(self) -> Result<()> {
        let WorkspaceTransaction {
            workspace,
            mut lv,
            mut pc,
            ..
        } = self;

        lv.abort();
        pc.abort();
        workspace.lv_cache = lv.close()?;
        workspace.pc_cache = pc.close()?;

        debug!("transaction aborted at {}", workspace.metadata_dir.display());
        Ok(())
    }
}
