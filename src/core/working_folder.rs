//! Working folder mappings between server subtrees and local directories.
//!
//! Translation picks the closest (deepest) mapping that covers an item.
//! Cloaked mappings hide a server subtree: items under them translate to
//! nothing, and translation through them fails with `ItemNotMapped`.
//!
//! # Public API
//! - [`WorkingFolder`]: one mapping
//! - [`WorkingFolderSet`]: the workspace's mappings with translation

use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::{local_path, server_path};
use serde::{Deserialize, Serialize};

/// How deep a mapping applies below its mapped directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MappingDepth {
    /// The whole subtree.
    #[default]
    Full,
    /// The mapped directory and its direct children only.
    OneLevel,
}

/// One server-to-local mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingFolder {
    /// Mapped server directory (`$/...`).
    pub server_item: String,
    /// Mapped local directory; `None` for cloaked mappings.
    pub local_item: Option<String>,
    pub depth: MappingDepth,
    /// Cloaked mappings hide their subtree from the workspace.
    pub cloaked: bool,
}

impl WorkingFolder {
    pub fn map(server_item: impl Into<String>, local_item: impl Into<String>) -> WorkingFolder {
        WorkingFolder {
            server_item: server_item.into(),
            local_item: Some(local_item.into()),
            depth: MappingDepth::Full,
            cloaked: false,
        }
    }

    pub fn cloak(server_item: impl Into<String>) -> WorkingFolder {
        WorkingFolder {
            server_item: server_item.into(),
            local_item: None,
            depth: MappingDepth::Full,
            cloaked: true,
        }
    }

    /// True if the mapping covers the given server item, honoring depth.
    fn covers_server_item(&self, server_item: &str) -> bool {
        if !server_path::is_child(&self.server_item, server_item) {
            return false;
        }
        match self.depth {
            MappingDepth::Full => true,
            MappingDepth::OneLevel => {
                server_path::equals(&self.server_item, server_item)
                    || server_path::get_parent(server_item)
                        .map(|p| server_path::equals(&p, &self.server_item))
                        .unwrap_or(false)
            }
        }
    }

    /// True if the mapping covers the given local item, honoring depth.
    fn covers_local_item(&self, local_item: &str) -> bool {
        let Some(root) = &self.local_item else {
            return false;
        };
        if !local_path::is_child(root, local_item) {
            return false;
        }
        match self.depth {
            MappingDepth::Full => true,
            MappingDepth::OneLevel => {
                local_path::equals(root, local_item)
                    || local_path::is_direct_child(root, local_item)
            }
        }
    }
}

/// The full set of a workspace's mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingFolderSet {
    folders: Vec<WorkingFolder>,
}

impl WorkingFolderSet {
    pub fn new(folders: Vec<WorkingFolder>) -> WorkingFolderSet {
        WorkingFolderSet { folders }
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn folders(&self) -> &[WorkingFolder] {
        &self.folders
    }

    pub fn add(&mut self, folder: WorkingFolder) {
        self.folders.push(folder);
    }

    /// The closest (deepest server item) mapping covering a server item.
    fn closest_for_server_item(&self, server_item: &str) -> Option<&WorkingFolder> {
        self.folders
            .iter()
            .filter(|f| f.covers_server_item(server_item))
            .max_by_key(|f| f.server_item.chars().count())
    }

    /// The closest mapping covering a local item.
    fn closest_for_local_item(&self, local_item: &str) -> Option<&WorkingFolder> {
        self.folders
            .iter()
            .filter(|f| f.covers_local_item(local_item))
            .max_by_key(|f| {
                f.local_item
                    .as_deref()
                    .map(|l| l.chars().count())
                    .unwrap_or(0)
            })
    }

    /// Translates a local item to its server item. Fails with
    /// `ItemNotMapped` when no mapping covers it or the covering server
    /// subtree is cloaked.
    pub fn translate_local_to_server(&self, local_item: &str) -> Result<String> {
        let folder = self
            .closest_for_local_item(local_item)
            .ok_or_else(|| WorkspaceTrackerError::item_not_mapped(local_item))?;

        let root = folder
            .local_item
            .as_deref()
            .ok_or_else(|| WorkspaceTrackerError::item_not_mapped(local_item))?;

        let server_item = if local_path::equals(root, local_item) {
            folder.server_item.clone()
        } else {
            let relative = relative_below(root, local_item);
            server_path::combine(&folder.server_item, &relative.replace(std::path::MAIN_SEPARATOR, "/"))
        };

        // The nearest mapping in server space decides cloaking.
        match self.closest_for_server_item(&server_item) {
            Some(f) if f.cloaked => Err(WorkspaceTrackerError::item_not_mapped(local_item)),
            _ => Ok(server_item),
        }
    }

    /// Translates a server item to its local item; `None` when unmapped or
    /// cloaked.
    pub fn translate_server_to_local(&self, server_item: &str) -> Option<String> {
        let folder = self.closest_for_server_item(server_item)?;
        if folder.cloaked {
            return None;
        }
        let root = folder.local_item.as_deref()?;

        if server_path::equals(&folder.server_item, server_item) {
            return Some(root.to_string());
        }

        let relative = server_relative_below(&folder.server_item, server_item);
        let mut local = root.to_string();
        for part in relative.split(server_path::SEPARATOR).filter(|p| !p.is_empty()) {
            local = local_path::combine(&local, part);
        }
        Some(local)
    }

    pub fn is_local_item_mapped(&self, local_item: &str) -> bool {
        self.translate_local_to_server(local_item).is_ok()
    }

    /// Distinct non-cloaked local roots, reduced so none is a descendant
    /// of another. These are the enumeration and watch roots.
    pub fn local_roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .folders
            .iter()
            .filter(|f| !f.cloaked)
            .filter_map(|f| f.local_item.clone())
            .collect();
        roots.sort_by(|a, b| local_path::compare_top_down(a, b));
        roots.dedup_by(|next, kept| local_path::is_child(kept, next));
        roots
    }

    /// The root that contains the given local item, if any.
    pub fn root_containing(&self, local_item: &str) -> Option<String> {
        self.local_roots()
            .into_iter()
            .find(|root| local_path::is_child(root, local_item))
    }
}

fn relative_below(ancestor: &str, item: &str) -> String {
    let skip = ancestor.trim_end_matches(std::path::MAIN_SEPARATOR).chars().count();
    item.chars().skip(skip + 1).collect()
}

fn server_relative_below(ancestor: &str, item: &str) -> String {
    let skip = ancestor.trim_end_matches(server_path::SEPARATOR).chars().count();
    item.chars().skip(skip + 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> WorkingFolderSet {
        WorkingFolderSet::new(vec![
            WorkingFolder::map("$/proj", "/work/proj"),
            WorkingFolder::map("$/proj/deep", "/elsewhere/deep"),
            WorkingFolder::cloak("$/proj/secret"),
        ])
    }

    #[test]
    fn test_translate_local_to_server() {
        let s = set();
        assert_eq!(
            s.translate_local_to_server("/work/proj/src/main.rs").unwrap(),
            "$/proj/src/main.rs"
        );
        assert_eq!(s.translate_local_to_server("/work/proj").unwrap(), "$/proj");
    }

    #[test]
    fn test_closest_mapping_wins() {
        let s = set();
        assert_eq!(
            s.translate_local_to_server("/elsewhere/deep/a").unwrap(),
            "$/proj/deep/a"
        );
        assert_eq!(
            s.translate_server_to_local("$/proj/deep/a").unwrap(),
            "/elsewhere/deep/a"
        );
    }

    #[test]
    fn test_cloaked_subtree_is_unmapped() {
        let s = set();
        assert!(s.translate_local_to_server("/work/proj/secret/x").is_err());
        assert!(s.translate_server_to_local("$/proj/secret/x").is_none());
    }

    #[test]
    fn test_unmapped_local_item() {
        let s = set();
        assert!(s.translate_local_to_server("/tmp/other").is_err());
        assert!(!s.is_local_item_mapped("/tmp/other"));
    }

    #[test]
    fn test_local_roots_deduplicated() {
        let mut s = set();
        s.add(WorkingFolder::map("$/proj/sub", "/work/proj/sub"));
        assert_eq!(
            s.local_roots(),
            vec!["/elsewhere/deep".to_string(), "/work/proj".to_string()]
        );
    }

    #[test]
    fn test_one_level_mapping_depth() {
        let mut folder = WorkingFolder::map("$/p", "/w");
        folder.depth = MappingDepth::OneLevel;
        let s = WorkingFolderSet::new(vec![folder]);

        assert!(s.translate_local_to_server("/w/a").is_ok());
        assert!(s.translate_local_to_server("/w/a/b").is_err());
    }

    #[test]
    fn test_root_containing() {
        let s = set();
        assert_eq!(
            s.root_containing("/work/proj/x/y").unwrap(),
            "/work/proj"
        );
        assert!(s.root_containing("/tmp/x").is_none());
    }
}
