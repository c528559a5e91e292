//! Entry tree - arena storage plus the root entry.
//!
//! `EntryTree` owns every entry and the name pool, and provides the child-array
//! operations the enumerator, the refresh walk and the loader build on:
//! inserting and removing children, keeping the (device, inode) order,
//! building the by-name view, lookups, and correlating two directories.

mod path;

use std::cmp::Ordering;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use thin_vec::ThinVec;

use crate::digest::ContentDigest;
use crate::error::{Result, TreeStateError};
use crate::storage::{
    ChangeMask, Entry, EntryArena, EntryFlags, EntryIndex, EntryMetadata, NamePool,
    OptionEntryIndex,
};

pub use path::PathResolver;

/// Result of matching two directories' children by name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Children only present in the first directory.
    pub only_first: Vec<EntryIndex>,
    /// Pairs of same-named children (first, second).
    pub both: Vec<(EntryIndex, EntryIndex)>,
    /// Children only present in the second directory.
    pub only_second: Vec<EntryIndex>,
}

/// Tree of entries backed by an [`EntryArena`].
#[derive(Debug)]
pub struct EntryTree {
    arena: EntryArena,
    names: NamePool,
    root: EntryIndex,
}

impl EntryTree {
    /// Creates a tree holding only a root entry.
    ///
    /// The root's name is the path prefix every resolved path starts with,
    /// usually an absolute directory path.
    pub fn new(root_name: &[u8], meta: EntryMetadata) -> Result<Self> {
        let mut arena = EntryArena::new();
        let mut names = NamePool::new();
        let (root, _) = arena.allocate(1)?;
        let entry = arena.try_get_mut(root)?;
        entry.name = names.intern(root_name);
        entry.meta = meta;
        Ok(Self { arena, names, root })
    }

    #[inline]
    pub fn root(&self) -> EntryIndex {
        self.root
    }

    /// Path of the tree root, as stored in the root entry's name.
    pub fn root_path(&self) -> &Path {
        Path::new(std::ffi::OsStr::from_bytes(self.name(self.root)))
    }

    #[inline]
    pub fn arena(&self) -> &EntryArena {
        &self.arena
    }

    #[inline]
    pub fn names(&self) -> &NamePool {
        &self.names
    }

    #[inline]
    pub(crate) fn names_mut(&mut self) -> &mut NamePool {
        &mut self.names
    }

    #[inline]
    pub(crate) fn arena_mut(&mut self) -> &mut EntryArena {
        &mut self.arena
    }

    /// Number of live entries, including detached ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[inline]
    pub fn entry(&self, index: EntryIndex) -> Option<&Entry> {
        self.arena.get(index)
    }

    #[inline]
    pub fn entry_mut(&mut self, index: EntryIndex) -> Option<&mut Entry> {
        self.arena.get_mut(index)
    }

    #[inline]
    pub fn try_entry(&self, index: EntryIndex) -> Result<&Entry> {
        self.arena.try_get(index)
    }

    #[inline]
    pub fn try_entry_mut(&mut self, index: EntryIndex) -> Result<&mut Entry> {
        self.arena.try_get_mut(index)
    }

    /// Leaf name of an entry; empty for unknown indices.
    pub fn name(&self, index: EntryIndex) -> &[u8] {
        self.arena
            .get(index)
            .map_or(&[][..], |entry| self.names.get(entry.name))
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    /// Allocates an entry that is not linked into the tree.
    pub fn allocate_detached(&mut self, name: &[u8], meta: EntryMetadata) -> Result<EntryIndex> {
        let (index, _) = self.arena.allocate(1)?;
        let name = self.names.intern(name);
        let entry = self.arena.try_get_mut(index)?;
        entry.name = name;
        entry.meta = meta;
        Ok(index)
    }

    /// Creates a new child of `parent`.
    pub fn insert_child(
        &mut self,
        parent: EntryIndex,
        name: &[u8],
        meta: EntryMetadata,
    ) -> Result<EntryIndex> {
        let child = self.allocate_detached(name, meta)?;
        if let Err(err) = self.add_children(parent, &[child]) {
            self.arena.free(child)?;
            return Err(err);
        }
        Ok(child)
    }

    /// Links `children` under `parent`, keeping the (device, inode) order.
    ///
    /// The by-name view of `parent` is invalidated.
    pub fn add_children(&mut self, parent: EntryIndex, children: &[EntryIndex]) -> Result<()> {
        if !self.arena.try_get(parent)?.is_dir() {
            return Err(TreeStateError::Structural(format!(
                "cannot add children to non-directory {}",
                String::from_utf8_lossy(self.name(parent))
            )));
        }
        for &child in children {
            self.arena.try_get_mut(child)?.parent = OptionEntryIndex::some(parent);
        }
        let entry = self.arena.try_get_mut(parent)?;
        entry.by_inode.extend(children.iter().copied());
        entry.children_changed();
        self.sort_by_inode(parent)
    }

    /// Appends a child without re-sorting; the caller sorts once at the end.
    pub(crate) fn push_child_unsorted(
        &mut self,
        parent: EntryIndex,
        child: EntryIndex,
    ) -> Result<()> {
        self.arena.try_get_mut(child)?.parent = OptionEntryIndex::some(parent);
        let entry = self.arena.try_get_mut(parent)?;
        entry.by_inode.push(child);
        entry.children_changed();
        Ok(())
    }

    /// Replaces the child list of `dir` with entries that already point at it.
    pub(crate) fn set_children(
        &mut self,
        dir: EntryIndex,
        children: ThinVec<EntryIndex>,
    ) -> Result<()> {
        let entry = self.arena.try_get_mut(dir)?;
        entry.by_inode = children;
        entry.children_changed();
        Ok(())
    }

    /// Stable-sorts the children of `dir` by (device, inode).
    pub fn sort_by_inode(&mut self, dir: EntryIndex) -> Result<()> {
        let mut children = mem::take(&mut self.arena.try_get_mut(dir)?.by_inode);
        let arena = &self.arena;
        children.sort_by_key(|&child| {
            arena
                .get(child)
                .map_or((u64::MAX, u64::MAX), |entry| (entry.meta.dev, entry.meta.ino))
        });
        self.arena.try_get_mut(dir)?.by_inode = children;
        Ok(())
    }

    /// Builds the by-name view of `dir` if it is stale.
    pub fn build_by_name(&mut self, dir: EntryIndex) -> Result<()> {
        let entry = self.arena.try_get(dir)?;
        if entry.by_name_valid {
            return Ok(());
        }
        let mut by_name: ThinVec<EntryIndex> = entry.by_inode.iter().copied().collect();
        by_name.sort_by(|&a, &b| self.name(a).cmp(self.name(b)));

        let entry = self.arena.try_get_mut(dir)?;
        entry.by_name = by_name;
        entry.by_name_valid = true;
        Ok(())
    }

    /// Records the content digest of a file or symlink.
    pub fn set_digest(&mut self, index: EntryIndex, digest: Option<ContentDigest>) -> Result<()> {
        let entry = self.arena.try_get_mut(index)?;
        if digest.is_some() && !entry.kind().has_content() {
            return Err(TreeStateError::Structural(format!(
                "entry {} of kind {:?} cannot carry a content digest",
                index.get(),
                entry.kind()
            )));
        }
        entry.digest = digest;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Finds the child of `dir` called `name`.
    ///
    /// Ignorable children are skipped unless `include_ignorable` is set.
    pub fn find_child_by_name(
        &mut self,
        dir: EntryIndex,
        name: &[u8],
        include_ignorable: bool,
    ) -> Result<Option<EntryIndex>> {
        self.build_by_name(dir)?;
        let entry = self.arena.try_get(dir)?;
        let found = entry
            .by_name
            .binary_search_by(|&child| self.name(child).cmp(name))
            .ok()
            .map(|position| entry.by_name[position]);
        Ok(found.filter(|&child| {
            include_ignorable || self.arena.get(child).is_some_and(|e| !e.is_ignorable())
        }))
    }

    /// Finds the child of `dir` with the given device and inode.
    pub fn find_child_by_inode(&self, dir: EntryIndex, dev: u64, ino: u64) -> Option<EntryIndex> {
        let children = &self.arena.get(dir)?.by_inode;
        let position = children
            .binary_search_by(|&child| match self.arena.get(child) {
                Some(entry) => (entry.meta.dev, entry.meta.ino).cmp(&(dev, ino)),
                None => Ordering::Greater,
            })
            .ok()?;
        Some(children[position])
    }

    /// Resolves `path` (relative to the root, or absolute under the root path)
    /// to an entry.
    ///
    /// With `create`, missing components are added as placeholder directories
    /// flagged `IS_NEW`; without it a missing component is `NotFound`.
    pub fn traverse(&mut self, path: &Path, create: bool) -> Result<EntryIndex> {
        let root_path = self.root_path().to_path_buf();
        let relative = if path.is_absolute() {
            path.strip_prefix(&root_path)
                .map_err(|_| TreeStateError::NotFound(path.to_path_buf()))?
        } else {
            path
        };

        let mut current = self.root;
        for component in relative.components() {
            let name = match component {
                Component::CurDir => continue,
                Component::Normal(name) => name.as_bytes(),
                _ => {
                    return Err(TreeStateError::Structural(format!(
                        "unsupported path component in {}",
                        path.display()
                    )))
                }
            };
            current = match self.find_child_by_name(current, name, true)? {
                Some(child) => child,
                None if create => {
                    let child = self.insert_child(current, name, EntryMetadata::placeholder_dir())?;
                    let entry = self.arena.try_get_mut(child)?;
                    entry.flags |= EntryFlags::IS_NEW;
                    entry.status = ChangeMask::NEW;
                    child
                }
                None => return Err(TreeStateError::NotFound(path.to_path_buf())),
            };
        }
        Ok(current)
    }

    /// Matches the children of two directories by name.
    pub fn correlate(&mut self, first: EntryIndex, second: EntryIndex) -> Result<Correlation> {
        self.build_by_name(first)?;
        self.build_by_name(second)?;
        let left = &self.arena.try_get(first)?.by_name;
        let right = &self.arena.try_get(second)?.by_name;

        let mut result = Correlation::default();
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            match self.name(left[i]).cmp(self.name(right[j])) {
                Ordering::Less => {
                    result.only_first.push(left[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    result.only_second.push(right[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    result.both.push((left[i], right[j]));
                    i += 1;
                    j += 1;
                }
            }
        }
        result.only_first.extend_from_slice(&left[i..]);
        result.only_second.extend_from_slice(&right[j..]);
        Ok(result)
    }

    /// Returns all entries below `index`, each parent before its children.
    pub fn descendants(&self, index: EntryIndex) -> Vec<EntryIndex> {
        let mut result = Vec::new();
        let mut stack = Vec::new();
        if let Some(entry) = self.arena.get(index) {
            stack.extend(entry.by_inode.iter().rev().copied());
        }
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(entry) = self.arena.get(current) {
                stack.extend(entry.by_inode.iter().rev().copied());
            }
        }
        result
    }

    /// Full path of `index`, built without a cache.
    pub fn path_of(&self, index: EntryIndex) -> Option<PathBuf> {
        let mut segments = Vec::new();
        let mut current = Some(index);
        while let Some(at) = current {
            let entry = self.arena.get(at)?;
            segments.push(self.names.get(entry.name));
            current = entry.parent();
        }
        Some(
            segments
                .into_iter()
                .rev()
                .map(std::ffi::OsStr::from_bytes)
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Unlinks `child` from `parent` without freeing it.
    pub fn detach_child(&mut self, parent: EntryIndex, child: EntryIndex) -> Result<()> {
        let entry = self.arena.try_get_mut(parent)?;
        let position = entry
            .by_inode
            .iter()
            .position(|&existing| existing == child)
            .ok_or_else(|| {
                TreeStateError::Structural(format!(
                    "entry {} is not a child of {}",
                    child.get(),
                    parent.get()
                ))
            })?;
        entry.by_inode.remove(position);
        entry.children_changed();
        self.arena.try_get_mut(child)?.parent = OptionEntryIndex::none();
        Ok(())
    }

    /// Unlinks and frees `child` with its subtree. Returns the entries freed.
    pub fn remove_child(&mut self, parent: EntryIndex, child: EntryIndex) -> Result<usize> {
        self.detach_child(parent, child)?;
        self.arena.free(child)
    }

    /// Frees a detached entry with its subtree.
    pub fn free_detached(&mut self, index: EntryIndex) -> Result<usize> {
        if self.arena.try_get(index)?.parent().is_some() {
            return Err(TreeStateError::Structural(format!(
                "entry {} is still linked",
                index.get()
            )));
        }
        self.arena.free(index)
    }

    /// Frees every child of `dir` whose status intersects `mask`.
    ///
    /// Returns the number of entries freed, including their subtrees.
    pub fn free_marked(&mut self, dir: EntryIndex, mask: ChangeMask) -> Result<usize> {
        let children = mem::take(&mut self.arena.try_get_mut(dir)?.by_inode);
        let (marked, kept): (ThinVec<_>, ThinVec<_>) = children.into_iter().partition(|&child| {
            self.arena
                .get(child)
                .is_some_and(|entry| entry.status.intersects(mask))
        });
        self.set_children(dir, kept)?;

        let mut freed = 0;
        for child in marked {
            self.arena.try_get_mut(child)?.parent = OptionEntryIndex::none();
            freed += self.arena.free(child)?;
        }
        Ok(freed)
    }

    /// Sets `status` on `index` and everything below it.
    pub fn mark_subtree(&mut self, index: EntryIndex, status: ChangeMask) -> Result<()> {
        self.arena.try_get_mut(index)?.status = status;
        for child in self.descendants(index) {
            self.arena.try_get_mut(child)?.status = status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind_bits: u32, dev: u64, ino: u64) -> EntryMetadata {
        EntryMetadata {
            mode: kind_bits | 0o644,
            dev,
            ino,
            ..EntryMetadata::default()
        }
    }

    const DIR: u32 = 0o040000;
    const FILE: u32 = 0o100000;

    fn sample_tree() -> (EntryTree, EntryIndex, EntryIndex, EntryIndex) {
        let mut tree = EntryTree::new(b"/srv/data", meta(DIR, 1, 1)).expect("tree should build");
        let root = tree.root();
        let src = tree.insert_child(root, b"src", meta(DIR, 1, 30)).unwrap();
        let readme = tree.insert_child(root, b"README", meta(FILE, 1, 20)).unwrap();
        (tree, root, src, readme)
    }

    #[test]
    fn children_stay_in_inode_order() {
        let (mut tree, root, src, readme) = sample_tree();
        let extra = tree.insert_child(root, b"aaa", meta(FILE, 1, 25)).unwrap();
        assert_eq!(tree.try_entry(root).unwrap().children(), &[readme, extra, src]);
        assert_eq!(tree.find_child_by_inode(root, 1, 25), Some(extra));
        assert_eq!(tree.find_child_by_inode(root, 2, 25), None);
    }

    #[test]
    fn find_by_name_builds_view() {
        let (mut tree, root, src, readme) = sample_tree();
        assert_eq!(tree.find_child_by_name(root, b"src", false).unwrap(), Some(src));
        assert_eq!(
            tree.try_entry(root).unwrap().children_by_name(),
            Some(&[readme, src][..])
        );
        tree.insert_child(root, b"zzz", meta(FILE, 1, 5)).unwrap();
        assert!(tree.try_entry(root).unwrap().children_by_name().is_none());
    }

    #[test]
    fn find_by_name_skips_ignorable() {
        let (mut tree, root, _, readme) = sample_tree();
        tree.try_entry_mut(readme).unwrap().flags |= EntryFlags::IGNORABLE;
        assert_eq!(tree.find_child_by_name(root, b"README", false).unwrap(), None);
        assert_eq!(tree.find_child_by_name(root, b"README", true).unwrap(), Some(readme));
    }

    #[test]
    fn traverse_creates_placeholders() {
        let (mut tree, root, src, _) = sample_tree();
        let deep = tree
            .traverse(Path::new("src/lib/mod.rs"), true)
            .expect("traverse should create");
        let lib = tree.try_entry(deep).unwrap().parent().unwrap();
        assert_eq!(tree.try_entry(lib).unwrap().parent(), Some(src));
        assert!(tree.try_entry(lib).unwrap().flags.contains(EntryFlags::IS_NEW));
        assert_eq!(tree.try_entry(deep).unwrap().meta.permissions(), 0o700);
        assert_eq!(tree.path_of(deep), Some(PathBuf::from("/srv/data/src/lib/mod.rs")));

        assert_eq!(tree.traverse(Path::new("/srv/data/src"), false).unwrap(), src);
        assert_eq!(tree.traverse(Path::new("."), false).unwrap(), root);
        assert!(matches!(
            tree.traverse(Path::new("nope"), false),
            Err(TreeStateError::NotFound(_))
        ));
    }

    #[test]
    fn correlate_splits_three_ways() {
        let mut tree = EntryTree::new(b"/", meta(DIR, 1, 1)).unwrap();
        let root = tree.root();
        let first = tree.insert_child(root, b"first", meta(DIR, 1, 2)).unwrap();
        let second = tree.insert_child(root, b"second", meta(DIR, 1, 3)).unwrap();
        let a = tree.insert_child(first, b"a", meta(FILE, 1, 10)).unwrap();
        let b1 = tree.insert_child(first, b"b", meta(FILE, 1, 11)).unwrap();
        let b2 = tree.insert_child(second, b"b", meta(FILE, 1, 12)).unwrap();
        let c = tree.insert_child(second, b"c", meta(FILE, 1, 13)).unwrap();

        let correlation = tree.correlate(first, second).unwrap();
        assert_eq!(correlation.only_first, vec![a]);
        assert_eq!(correlation.both, vec![(b1, b2)]);
        assert_eq!(correlation.only_second, vec![c]);
    }

    #[test]
    fn free_marked_releases_subtrees() {
        let (mut tree, root, src, readme) = sample_tree();
        tree.insert_child(src, b"main.rs", meta(FILE, 1, 40)).unwrap();
        tree.mark_subtree(src, ChangeMask::REMOVED).unwrap();

        assert_eq!(tree.free_marked(root, ChangeMask::REMOVED).unwrap(), 2);
        assert_eq!(tree.try_entry(root).unwrap().children(), &[readme]);
        assert!(tree.entry(src).is_none());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn descendants_are_parent_first() {
        let (mut tree, root, src, readme) = sample_tree();
        let main = tree.insert_child(src, b"main.rs", meta(FILE, 1, 40)).unwrap();
        assert_eq!(tree.descendants(root), vec![readme, src, main]);
    }

    #[test]
    fn digest_on_directory_is_structural() {
        let (mut tree, _, src, readme) = sample_tree();
        let digest = ContentDigest::of_bytes(b"x");
        assert!(tree.set_digest(readme, Some(digest)).is_ok());
        assert!(matches!(
            tree.set_digest(src, Some(digest)),
            Err(TreeStateError::Structural(_))
        ));
    }

    #[test]
    fn remove_child_unlinks_and_frees() {
        let (mut tree, root, src, readme) = sample_tree();
        assert_eq!(tree.remove_child(root, readme).unwrap(), 1);
        assert_eq!(tree.try_entry(root).unwrap().children(), &[src]);
        assert!(tree.remove_child(root, readme).is_err());
    }
}
