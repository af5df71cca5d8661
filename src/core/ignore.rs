//! Ignore-rule parsing and evaluation.
//!
//! Rules come from per-directory ignore files (`.tfignore`) and from an
//! optional global rule list. Each rule is scoped to the directory of the
//! file that declared it; the rule set closest to the item wins, and within
//! one rule set the first rule that produces a verdict wins.
//!
//! # Public API
//! - [`IgnoreEntry`]: one parsed rule line
//! - [`IgnoreFile`]: the ordered rule set of one directory
//! - [`ExclusionEvaluator`]: stack-based evaluator over ancestor rule sets
//!
//! # Rule Syntax
//! - `#` starts a comment line; blank lines are skipped
//! - `!` prefix turns the rule into an inclusion (re-admits items)
//! - a leading separator anchors the rule to its own directory only
//! - a trailing separator restricts the rule to folders
//! - `\` and `/` are interchangeable; `*` and `?` wildcards apply per
//!   path component

use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::local_path;
use crate::core::wildcard;
use log::{debug, trace};
use std::fs;
use std::path::Path;

/// Default file name of the per-directory ignore file.
pub const DEFAULT_IGNORE_FILE_NAME: &str = ".tfignore";

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// No wildcards at all.
    Literal,
    /// A single trailing `*` (`X*`).
    Prefix,
    /// A single leading `*` (`*X`).
    Suffix,
    /// Anything else containing wildcards.
    Complex,
}

/// One parsed rule line from an ignore file.
#[derive(Debug, Clone)]
pub struct IgnoreEntry {
    /// True for `!` inclusion rules.
    pub inclusion: bool,
    /// True when the rule only applies to folders (trailing separator).
    pub folders_only: bool,
    /// True when the rule applies at any depth beneath its scope.
    pub recursive: bool,
    /// The directory beneath which this rule applies.
    start_path: String,
    /// Path components between the scope and the final pattern.
    segments: Vec<String>,
    kind: EntryKind,
}

impl IgnoreEntry {
    /// Parses one rule line scoped to `directory`. Returns `None` for
    /// comments, blank lines, and lines that reduce to nothing.
    pub fn parse(directory: &str, line: &str) -> Option<IgnoreEntry> {
        let mut text = line.strip_prefix(UTF8_BOM).unwrap_or(line).trim();

        if text.is_empty() || text.starts_with('#') {
            return None;
        }

        let mut inclusion = false;
        if let Some(rest) = text.strip_prefix('!') {
            inclusion = true;
            text = rest.trim();
        }

        let mut recursive = true;
        if text.starts_with('/') || text.starts_with('\\') {
            recursive = false;
            text = text[1..].trim_start();
        }

        let mut folders_only = false;
        if text.ends_with('/') || text.ends_with('\\') {
            folders_only = true;
            text = text[..text.len() - 1].trim_end();
        }

        if text.is_empty() {
            return None;
        }

        let segments: Vec<String> = text
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        if segments.is_empty() {
            return None;
        }

        let pattern = segments.last().map(String::as_str)?;
        let kind = classify(pattern);

        // Intermediate segments anchor the rule beneath a fixed sub-folder
        // of the scope directory.
        let mut start_path = directory.to_string();
        for seg in &segments[..segments.len() - 1] {
            start_path = local_path::combine(&start_path, seg);
        }

        Some(IgnoreEntry {
            inclusion,
            folders_only,
            recursive,
            start_path,
            segments,
            kind,
        })
    }

    /// The final (pattern) component of the rule.
    pub fn pattern(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Tests this rule against a path already known to live beneath the
    /// owning ignore file's directory. Returns `Some(excluded)` when the
    /// rule produces a verdict.
    fn is_match(&self, local_item: &str, is_folder: bool) -> Option<bool> {
        if !local_path::is_child(&self.start_path, local_item)
            || local_path::equals(&self.start_path, local_item)
        {
            return None;
        }

        // Walk the item's components beneath the scope, testing the pattern
        // at each permissible depth.
        let components: Vec<&str> = components_below(&self.start_path, local_item);

        for (i, component) in components.iter().enumerate() {
            let final_component = i + 1 == components.len();
            let component_is_folder = !final_component || is_folder;

            // Non-recursive rules only match directly beneath their scope.
            if !self.recursive && i != 0 {
                break;
            }

            // Inclusions only re-admit the item itself, never via an
            // ancestor folder.
            if self.inclusion && !final_component {
                continue;
            }

            if self.folders_only && !component_is_folder {
                continue;
            }

            if self.matches_component(component) {
                return Some(!self.inclusion);
            }
        }

        None
    }

    fn matches_component(&self, component: &str) -> bool {
        match self.kind {
            EntryKind::Literal => {
                if local_path::CASE_SENSITIVE {
                    component == self.pattern()
                } else {
                    component.eq_ignore_ascii_case(self.pattern())
                }
            }
            EntryKind::Prefix => {
                let stem = &self.pattern()[..self.pattern().len() - 1];
                starts_with_fold(component, stem)
            }
            EntryKind::Suffix => {
                let stem = &self.pattern()[1..];
                ends_with_fold(component, stem)
            }
            EntryKind::Complex => wildcard::matches_wildcard_file(component, self.pattern()),
        }
    }
}

fn classify(pattern: &str) -> EntryKind {
    if !wildcard::is_wildcard(pattern) {
        return EntryKind::Literal;
    }
    let stars = pattern.matches('*').count();
    let questions = pattern.matches('?').count();
    if stars == 1 && questions == 0 {
        if pattern.ends_with('*') {
            return EntryKind::Prefix;
        }
        if pattern.starts_with('*') {
            return EntryKind::Suffix;
        }
    }
    EntryKind::Complex
}

fn starts_with_fold(s: &str, prefix: &str) -> bool {
    if local_path::CASE_SENSITIVE {
        s.starts_with(prefix)
    } else {
        s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

fn ends_with_fold(s: &str, suffix: &str) -> bool {
    if local_path::CASE_SENSITIVE {
        s.ends_with(suffix)
    } else {
        s.len() >= suffix.len() && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    }
}

/// Splits off the path components of `item` strictly below `ancestor`.
fn components_below<'a>(ancestor: &str, item: &'a str) -> Vec<&'a str> {
    item.split(local_path::is_separator)
        .filter(|s| !s.is_empty())
        .skip(local_path::get_folder_depth(ancestor))
        .collect()
}

/// The ordered rule set declared by one directory's ignore file.
#[derive(Debug, Clone)]
pub struct IgnoreFile {
    /// The directory the ignore file lives in.
    pub directory: String,
    entries: Vec<IgnoreEntry>,
}

impl IgnoreFile {
    /// Loads the ignore file from `directory`, returning `None` when the
    /// file does not exist or cannot be read.
    pub fn load(directory: &str, ignore_file_name: &str) -> Option<IgnoreFile> {
        let path = Path::new(directory).join(ignore_file_name);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return None,
        };

        trace!("loaded ignore file: {}", path.display());
        Some(Self::from_contents(directory, &contents))
    }

    /// Builds a rule set from already-read contents, scoped to `directory`.
    pub fn from_contents(directory: &str, contents: &str) -> IgnoreFile {
        let entries = contents
            .lines()
            .filter_map(|line| IgnoreEntry::parse(directory, line))
            .collect();

        IgnoreFile {
            directory: directory.to_string(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluates this rule set against a local item. `start_path` bounds
    /// the evaluation to components at or beneath the given ancestor.
    ///
    /// The first rule producing a verdict wins. Returns `None` when no
    /// rule applies.
    pub fn is_excluded(&self, local_item: &str, is_folder: bool, start_path: &str) -> Option<bool> {
        if !local_path::is_child(&self.directory, start_path) {
            return None;
        }

        for entry in &self.entries {
            if let Some(excluded) = entry.is_match(local_item, is_folder) {
                return Some(excluded);
            }
        }

        None
    }
}

/// Stack-based ignore evaluator for one scan.
///
/// Frames run from the workspace root (bottom) down to the directory
/// containing the current item (top), with the global rule set beneath
/// all of them. The evaluator is fed items in directory-traversal order
/// and incrementally pushes and pops frames as the traversal descends
/// and ascends.
pub struct ExclusionEvaluator {
    /// The workspace root this evaluator is anchored at.
    root: String,
    /// Name of the per-directory ignore file.
    ignore_file_name: String,
    /// `frames[0]` is the root directory; deeper directories follow in
    /// order. A `None` rule set marks a directory without an ignore file.
    frames: Vec<Frame>,
    /// Global rules evaluated after every per-directory rule set.
    global: Option<IgnoreFile>,
}

#[derive(Debug)]
struct Frame {
    directory: String,
    rules: Option<IgnoreFile>,
}

impl Frame {
    fn load(directory: String, ignore_file_name: &str) -> Frame {
        let rules = IgnoreFile::load(&directory, ignore_file_name);
        Frame { directory, rules }
    }
}

impl ExclusionEvaluator {
    /// Creates an evaluator anchored at `root`, loading ignore files for
    /// the root directory eagerly.
    pub fn new(root: impl Into<String>) -> ExclusionEvaluator {
        Self::with_ignore_file_name(root, DEFAULT_IGNORE_FILE_NAME)
    }

    pub fn with_ignore_file_name(
        root: impl Into<String>,
        ignore_file_name: impl Into<String>,
    ) -> ExclusionEvaluator {
        let root = root.into();
        let ignore_file_name = ignore_file_name.into();
        let frames = vec![Frame::load(root.clone(), &ignore_file_name)];

        ExclusionEvaluator {
            root,
            ignore_file_name,
            frames,
            global: None,
        }
    }

    /// Installs a global rule set, evaluated when no per-directory rule
    /// produces a verdict.
    pub fn set_global_rules(&mut self, patterns: &[String]) {
        let contents = patterns.join("\n");
        let file = IgnoreFile::from_contents(&self.root, &contents);
        self.global = (!file.is_empty()).then_some(file);
    }

    /// Tests whether a local item is excluded. The item must live at or
    /// beneath the evaluator's root.
    pub fn is_excluded(&mut self, local_item: &str, is_folder: bool) -> Result<bool> {
        if !local_path::is_child(&self.root, local_item) {
            return Err(WorkspaceTrackerError::item_not_mapped(local_item));
        }

        self.prepare_stack_for_local_item(local_item);

        // Nearest rule set wins; the global set is consulted last.
        let start_path = local_path::get_parent(local_item).unwrap_or_else(|| self.root.clone());
        for frame in self.frames.iter().rev() {
            if let Some(rules) = &frame.rules {
                if let Some(excluded) = rules.is_excluded(local_item, is_folder, &start_path) {
                    trace!(
                        "ignore verdict for {}: {} (rules from {})",
                        local_item,
                        excluded,
                        rules.directory
                    );
                    return Ok(excluded);
                }
            }
        }

        if let Some(global) = &self.global {
            if let Some(excluded) = global.is_excluded(local_item, is_folder, &start_path) {
                return Ok(excluded);
            }
        }

        Ok(false)
    }

    /// Pops frames for directories the traversal has left and pushes
    /// frames for directories it has entered, so that the top frame is
    /// the item's containing directory.
    fn prepare_stack_for_local_item(&mut self, local_item: &str) {
        let containing = local_path::get_parent(local_item).unwrap_or_else(|| self.root.clone());

        let root_depth = local_path::get_folder_depth(&self.root);
        let target_depth = local_path::get_folder_depth(&containing);

        let current_top = self
            .frames
            .last()
            .map(|f| f.directory.clone())
            .unwrap_or_else(|| self.root.clone());
        let common = local_path::get_common_path_prefix(&current_top, &containing)
            .unwrap_or_else(|| self.root.clone());
        let common_depth = local_path::get_folder_depth(&common);

        // Frames above the common ancestor no longer apply.
        let keep = common_depth.saturating_sub(root_depth) + 1;
        while self.frames.len() > keep {
            self.frames.pop();
        }

        // Descend from the common ancestor to the item's directory.
        if target_depth > common_depth {
            let mut dir = common.clone();
            for part in components_below(&common, &containing) {
                dir = local_path::combine(&dir, part);
                self.frames
                    .push(Frame::load(dir.clone(), &self.ignore_file_name));
            }
        }

        debug!(
            "ignore stack depth {} for {}",
            self.frames.len(),
            local_item
        );
    }
}
