//! Merging tool-reported and scanned files into the project tree.
//!
//! A merge never rebuilds the tree from scratch: the new file list is
//! compared against the previous tree with a sorted merge and only the
//! differences are applied. Manual edits made by the host between two
//! cycles live in a [`ManualEdits`] overlay that every merge re-applies.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use cms_core::types::file::sort_and_dedup;
use cms_core::FileNode;

use crate::tree::ProjectTree;

/// Outcome of [`compare_sorted_lists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedDiff<'a, T> {
    /// Elements only in the old list.
    pub removed: Vec<&'a T>,
    /// Elements only in the new list.
    pub added: Vec<&'a T>,
    /// Pairs of equal-keyed elements, old first.
    pub unchanged: Vec<(&'a T, &'a T)>,
}

/// Compares two lists sorted by `cmp` in one pass.
///
/// # Examples
///
/// ```
/// use cms_engine::reconcile::compare_sorted_lists;
///
/// let diff = compare_sorted_lists(&[1, 2, 4], &[2, 3, 4], Ord::cmp);
/// assert_eq!(diff.removed, [&1]);
/// assert_eq!(diff.added, [&3]);
/// assert_eq!(diff.unchanged.len(), 2);
/// ```
pub fn compare_sorted_lists<'a, T, F>(old: &'a [T], new: &'a [T], mut cmp: F) -> SortedDiff<'a, T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut diff = SortedDiff {
        removed: Vec::new(),
        added: Vec::new(),
        unchanged: Vec::new(),
    };
    let (mut old_iter, mut new_iter) = (old.iter().peekable(), new.iter().peekable());
    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (Some(o), Some(n)) => match cmp(o, n) {
                Ordering::Less => diff.removed.extend(old_iter.next()),
                Ordering::Greater => diff.added.extend(new_iter.next()),
                Ordering::Equal => {
                    if let (Some(o), Some(n)) = (old_iter.next(), new_iter.next()) {
                        diff.unchanged.push((o, n));
                    }
                }
            },
            (Some(_), None) => diff.removed.extend(old_iter.by_ref()),
            (None, Some(_)) => diff.added.extend(new_iter.by_ref()),
            (None, None) => break,
        }
    }
    diff
}

// ============================================================================
// Manual edits
// ============================================================================

/// File operations made by the host between two full cycles.
///
/// Re-applying the overlay is idempotent: an added file appears once, an
/// erased file stays gone. Entries settle out once the underlying file
/// lists reflect them on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualEdits {
    added: BTreeMap<Utf8PathBuf, FileNode>,
    erased: BTreeSet<Utf8PathBuf>,
}

impl ManualEdits {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records files added to the project.
    pub fn add_files(&mut self, nodes: impl IntoIterator<Item = FileNode>) {
        for node in nodes {
            self.erased.remove(&node.path);
            self.added.insert(node.path.clone(), node);
        }
    }

    /// Records files removed from the project.
    pub fn erase_files<P: AsRef<Utf8Path>>(&mut self, paths: impl IntoIterator<Item = P>) {
        for path in paths {
            let path = path.as_ref();
            self.added.remove(path);
            self.erased.insert(path.to_owned());
        }
    }

    /// Records a rename. The new path is classified from its name.
    pub fn rename_file(&mut self, from: &Utf8Path, to: &Utf8Path) {
        self.erase_files([from]);
        self.add_files([FileNode::classified(to)]);
    }

    /// Applies the overlay to a list sorted by path.
    ///
    /// Files already present keep their own classification.
    pub fn apply(&self, files: &mut Vec<FileNode>) {
        if self.is_empty() {
            return;
        }
        files.retain(|f| !self.erased.contains(&f.path));
        files.extend(self.added.values().cloned());
        sort_and_dedup(files);
    }

    /// Drops entries that `base`, sorted by path, already reflects.
    pub fn settle(&mut self, base: &[FileNode]) {
        let has = |path: &Utf8Path| base.binary_search_by(|f| f.path.as_path().cmp(path)).is_ok();
        self.added.retain(|path, _| !has(path));
        self.erased.retain(|path| has(path));
    }

    /// Returns `true` if no edit is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.erased.is_empty()
    }

    /// Returns the number of pending edits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.erased.len()
    }

    /// Drops every pending edit.
    pub fn clear(&mut self) {
        self.added.clear();
        self.erased.clear();
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Outcome of [`merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// The updated tree.
    pub tree: ProjectTree,
    /// Paths new since the previous tree.
    pub added: Vec<Utf8PathBuf>,
    /// Paths gone since the previous tree.
    pub removed: Vec<Utf8PathBuf>,
}

/// Combines the tool's files with the scanned files and updates `previous`.
///
/// On a path reported by both, the tool's node wins. A `previous` tree with
/// a different root is ignored.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use cms_core::{FileNode, FileType};
/// use cms_engine::reconcile::{ManualEdits, merge};
///
/// let tool = [FileNode::new("/p/a.cpp", FileType::Source).with_generated(true)];
/// let scanned = [FileNode::classified("/p/a.cpp"), FileNode::classified("/p/b.h")];
/// let result = merge(Utf8Path::new("/p"), &tool, &scanned, None, &ManualEdits::new());
/// assert_eq!(result.tree.len(), 2);
/// assert!(result.tree.get(Utf8Path::new("/p/a.cpp")).unwrap().is_generated);
/// ```
#[must_use]
pub fn merge(
    root: &Utf8Path,
    tool_files: &[FileNode],
    scanner_files: &[FileNode],
    previous: Option<&ProjectTree>,
    edits: &ManualEdits,
) -> MergeResult {
    let mut files = Vec::with_capacity(tool_files.len() + scanner_files.len());
    files.extend_from_slice(tool_files);
    files.extend_from_slice(scanner_files);
    sort_and_dedup(&mut files);
    edits.apply(&mut files);

    let mut tree = previous
        .filter(|t| t.root_path() == root)
        .cloned()
        .unwrap_or_else(|| ProjectTree::new(root));
    let old = tree.files();
    let diff = compare_sorted_lists(&old, &files, FileNode::cmp_path);

    let removed: Vec<Utf8PathBuf> = diff.removed.iter().map(|f| f.path.clone()).collect();
    let added: Vec<Utf8PathBuf> = diff.added.iter().map(|f| f.path.clone()).collect();
    for path in &removed {
        tree.remove(path);
    }
    for node in diff.added {
        tree.insert(node.clone());
    }
    for (before, after) in diff.unchanged {
        if before != after {
            tree.insert(after.clone());
        }
    }

    tracing::debug!(
        files = tree.len(),
        added = added.len(),
        removed = removed.len(),
        "Merged project tree"
    );
    MergeResult {
        tree,
        added,
        removed,
    }
}

// ============================================================================
// Generated companions
// ============================================================================

/// Returns the files the build generates from `source`.
///
/// Forms produce `ui_<name>.h` and state charts produce `<name>.h` and
/// `<name>.cpp`. They land in the build directory mirroring the nearest
/// source directory that holds a `CMakeLists.txt`.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use cms_engine::reconcile::generated_files_for;
///
/// let files = generated_files_for(
///     Utf8Path::new("/nowhere/src/dlg.ui"),
///     Utf8Path::new("/nowhere"),
///     Utf8Path::new("/build"),
/// );
/// assert_eq!(files, ["/build/ui_dlg.h"]);
/// ```
#[must_use]
pub fn generated_files_for(
    source: &Utf8Path,
    source_dir: &Utf8Path,
    build_dir: &Utf8Path,
) -> Vec<Utf8PathBuf> {
    let (Some(stem), Some(ext)) = (source.file_stem(), source.extension()) else {
        return Vec::new();
    };
    let names = match ext {
        "ui" => vec![format!("ui_{stem}.h")],
        "scxml" => vec![format!("{stem}.h"), format!("{stem}.cpp")],
        _ => return Vec::new(),
    };

    let lists_dir = source
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(source_dir))
        .find(|dir| dir.join("CMakeLists.txt").is_file())
        .unwrap_or(source_dir);
    let relative = lists_dir.strip_prefix(source_dir).unwrap_or(Utf8Path::new(""));
    let generated_dir = build_dir.join(relative);
    names.into_iter().map(|name| generated_dir.join(name)).collect()
}
