//! Tracker - one tree plus the caches and helpers that operate on it.
//!
//! `Tracker` is the context value collaborators talk to. It owns the entry
//! tree, the path and owner caches, the directory enumerator, the exclusion
//! policy and the copy detector, and drives the reference tree walk:
//!
//! - `build` enumerates the whole tree below the root,
//! - `record_digests` fills in content digests,
//! - `refresh` compares the tree with the filesystem and sets each entry's
//!   change status, keeping the recorded state of changed entries in a shadow
//!   entry so copy detection can still match against it,
//! - `accept_changes` makes the current state the recorded one.

use std::collections::BTreeMap;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::classify::classify;
use crate::config::TrackerConfig;
use crate::detect::{CandidateList, CopyDetector};
use crate::digest::ContentDigest;
use crate::enumerate::DirectoryEnumerator;
use crate::error::{Result, TreeStateError};
use crate::owners::OwnerNames;
use crate::persist;
use crate::policy::{ExclusionPolicy, NoExclusions};
use crate::storage::{
    ChangeMask, Entry, EntryFlags, EntryIndex, EntryKind, EntryMetadata, OptionEntryIndex,
};
use crate::tree::{EntryTree, PathResolver};

/// Owns a tree of entries and everything needed to keep it current.
pub struct Tracker {
    config: TrackerConfig,
    tree: EntryTree,
    paths: PathResolver,
    owners: OwnerNames,
    enumerator: DirectoryEnumerator,
    policy: Box<dyn ExclusionPolicy>,
    /// Registered lazily; dropped whenever the tree shape changes.
    detector: Option<CopyDetector>,
    copy_sources: BTreeMap<EntryIndex, EntryIndex>,
}

impl Tracker {
    /// Starts tracking the directory at `root`, with no children yet.
    pub fn open(root: &Path, config: TrackerConfig) -> Result<Self> {
        let metadata =
            std::fs::symlink_metadata(root).map_err(|err| TreeStateError::at(root, err))?;
        let meta = EntryMetadata::from_fs_metadata(&metadata);
        if !meta.is_dir() {
            return Err(TreeStateError::Structural(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let tree = EntryTree::new(root.as_os_str().as_bytes(), meta)?;
        Self::from_tree(tree, config)
    }

    /// Wraps an existing tree, e.g. one read back from an entry list.
    pub fn from_tree(tree: EntryTree, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            paths: PathResolver::new(config.path_cache_slots),
            owners: OwnerNames::new(&config),
            enumerator: DirectoryEnumerator::new().with_by_name(config.build_by_name),
            policy: Box::new(NoExclusions),
            detector: None,
            copy_sources: BTreeMap::new(),
            tree,
            config,
        })
    }

    /// Reads back the entry list at `list` and tracks that tree.
    pub fn load(list: &Path, config: TrackerConfig) -> Result<Self> {
        Self::from_tree(persist::load_entry_list(list)?, config)
    }

    /// Writes the tree as an entry list to `list`. Returns the records written.
    pub fn save(&self, list: &Path) -> Result<usize> {
        persist::write_entry_list(&self.tree, list)
    }

    pub fn with_policy(mut self, policy: impl ExclusionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self.detector = None;
        self
    }

    #[inline]
    pub fn tree(&self) -> &EntryTree {
        &self.tree
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Looks up the entry at `path`, relative to the root or absolute.
    pub fn lookup(&mut self, path: &Path) -> Result<EntryIndex> {
        self.tree.traverse(path, false)
    }

    /// Full path of `entry`; valid until the next call on the tracker.
    pub fn resolve_path(&mut self, entry: EntryIndex) -> Result<&Path> {
        self.paths.resolve(&mut self.tree, entry)
    }

    pub fn user_name(&mut self, uid: u32) -> Result<Option<&[u8]>> {
        self.owners.user_name(uid)
    }

    pub fn group_name(&mut self, gid: u32) -> Result<Option<&[u8]>> {
        self.owners.group_name(gid)
    }

    /// Reads the children of directory `dir` from disk into the tree.
    pub fn enumerate(&mut self, dir: EntryIndex) -> Result<&[EntryIndex]> {
        let path = self.paths.resolve_owned(&mut self.tree, dir)?;
        self.detector = None;
        self.enumerator.enumerate(&mut self.tree, dir, &path, 0)?;
        Ok(self.tree.try_entry(dir)?.children())
    }

    /// How `fresh` differs from the recorded metadata of `entry`.
    pub fn classify(&self, entry: EntryIndex, fresh: &EntryMetadata) -> Result<ChangeMask> {
        Ok(classify(&self.tree.try_entry(entry)?.meta, fresh))
    }

    // -----------------------------------------------------------------------
    // Tree walk
    // -----------------------------------------------------------------------

    /// Enumerates every directory below the root that has no children yet.
    ///
    /// Directories that vanish during the walk are flagged `IGNORABLE`.
    /// Returns the number of entries in the tree afterwards.
    pub fn build(&mut self) -> Result<usize> {
        self.walk_new(self.tree.root(), ChangeMask::empty())?;
        log::debug!(
            "built tree for {} ({} entries)",
            self.tree.root_path().display(),
            self.tree.len()
        );
        Ok(self.tree.len())
    }

    /// Enumerates the subtree at `start`, setting `status` on every entry
    /// below it.
    fn walk_new(&mut self, start: EntryIndex, status: ChangeMask) -> Result<()> {
        self.detector = None;
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            let entry = self.tree.try_entry(index)?;
            if entry.is_dir() && !entry.is_ignorable() && entry.child_count() == 0 {
                let path = self.paths.resolve_owned(&mut self.tree, index)?;
                match self.enumerator.enumerate(&mut self.tree, index, &path, 0) {
                    Ok(_) => {}
                    Err(err) if err.is_vanished() => {
                        log::debug!("directory vanished during walk: {err}");
                        self.tree.try_entry_mut(index)?.flags |= EntryFlags::IGNORABLE;
                    }
                    Err(err) => return Err(err),
                }
            }
            let children = self.tree.try_entry(index)?.children().to_vec();
            for &child in &children {
                self.tree.try_entry_mut(child)?.status = status;
            }
            stack.extend(children);
        }
        Ok(())
    }

    /// Computes the digest of every file and symlink that has none.
    ///
    /// Returns the number of digests computed.
    pub fn record_digests(&mut self) -> Result<usize> {
        let mut computed = 0;
        for index in self.tree.descendants(self.tree.root()) {
            let entry = self.tree.try_entry(index)?;
            if entry.digest().is_some() || entry.is_ignorable() {
                continue;
            }
            if let Some(digest) = self.compute_digest(index)? {
                self.tree.set_digest(index, Some(digest))?;
                computed += 1;
            }
        }
        if computed > 0 {
            self.detector = None;
        }
        log::debug!("recorded {computed} content digests");
        Ok(computed)
    }

    /// Digest of the object behind `index` as it is on disk now.
    ///
    /// A vanished object flags the entry `IGNORABLE` and yields `None`.
    fn compute_digest(&mut self, index: EntryIndex) -> Result<Option<ContentDigest>> {
        let kind = self.tree.try_entry(index)?.kind();
        if !kind.has_content() {
            return Ok(None);
        }
        let path = self.paths.resolve_owned(&mut self.tree, index)?;
        match ContentDigest::of_path(&path, kind) {
            Ok(digest) => Ok(Some(digest)),
            Err(err) if err.is_vanished() => {
                log::debug!("entry vanished before digesting: {err}");
                self.tree.try_entry_mut(index)?.flags |= EntryFlags::IGNORABLE;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Compares the tree with the filesystem.
    ///
    /// Afterwards every entry's status says how it changed since it was
    /// recorded: entries no longer on disk are `REMOVED` (and stay in the
    /// tree), entries found on disk for the first time are `NEW`, and
    /// directories with changes below them carry `CHILD_CHANGED`. Statuses
    /// from an earlier refresh are overwritten, so call
    /// [`accept_changes`](Self::accept_changes) in between. Returns the number
    /// of entries with a non-empty status.
    pub fn refresh(&mut self) -> Result<usize> {
        self.detector = None;
        let root = self.tree.root();
        for index in self.tree.descendants(root) {
            self.tree.try_entry_mut(index)?.status = ChangeMask::empty();
        }

        let root_path = self.tree.root_path().to_path_buf();
        let metadata = std::fs::symlink_metadata(&root_path)
            .map_err(|err| TreeStateError::at(&root_path, err))?;
        let fresh = EntryMetadata::from_fs_metadata(&metadata);
        let mut status = classify(&self.tree.try_entry(root)?.meta, &fresh);
        if status.is_replaced() {
            return Err(TreeStateError::Structural(format!(
                "{} is no longer a directory",
                root_path.display()
            )));
        }
        self.tree.try_entry_mut(root)?.meta = fresh;
        if self.refresh_dir(root)? {
            status |= ChangeMask::CHILD_CHANGED;
        }
        self.tree.try_entry_mut(root)?.status = status;

        let mut changed = usize::from(!status.is_empty());
        for index in self.tree.descendants(root) {
            changed += usize::from(!self.tree.try_entry(index)?.status.is_empty());
        }
        log::debug!("refresh of {} found {changed} changed entries", root_path.display());
        Ok(changed)
    }

    /// Refreshes the children of `dir`. Returns true if any of them changed.
    fn refresh_dir(&mut self, dir: EntryIndex) -> Result<bool> {
        let path = self.paths.resolve_owned(&mut self.tree, dir)?;
        let entry = self.tree.try_entry(dir)?;
        let previous = entry.child_count();
        let meta = entry.meta;
        let scratch = self.tree.allocate_detached(b"", meta)?;

        match self.enumerator.enumerate(&mut self.tree, scratch, &path, previous) {
            Ok(_) => {}
            Err(err) if err.is_vanished() => {
                self.tree.free_detached(scratch)?;
                log::debug!("directory vanished during refresh: {err}");
                let children = self.tree.try_entry(dir)?.children().to_vec();
                for &child in &children {
                    self.tree.mark_subtree(child, ChangeMask::REMOVED)?;
                }
                return Ok(!children.is_empty());
            }
            Err(err) => {
                self.tree.free_detached(scratch)?;
                return Err(err);
            }
        }

        let correlation = self.tree.correlate(dir, scratch)?;
        let mut changed = false;

        for known in correlation.only_first {
            if self.tree.try_entry(known)?.is_ignorable() {
                continue;
            }
            self.tree.mark_subtree(known, ChangeMask::REMOVED)?;
            changed = true;
        }

        for (known, fresh) in correlation.both {
            if self.tree.try_entry(fresh)?.is_ignorable() {
                // Listed, but gone before it could be examined.
                self.tree.mark_subtree(known, ChangeMask::REMOVED)?;
                changed = true;
                continue;
            }
            self.tree.detach_child(scratch, fresh)?;
            changed |= self.refresh_pair(known, fresh)?;
        }

        for added in correlation.only_second {
            if self.tree.try_entry(added)?.is_ignorable() {
                continue;
            }
            self.tree.detach_child(scratch, added)?;
            self.tree.add_children(dir, &[added])?;
            self.tree.try_entry_mut(added)?.status = ChangeMask::NEW;
            self.walk_new(added, ChangeMask::NEW)?;
            changed = true;
        }

        self.tree.free_detached(scratch)?;
        // Refreshed entries may carry a new (device, inode).
        self.tree.sort_by_inode(dir)?;
        Ok(changed)
    }

    /// Moves the fresh observation `fresh` into `known`. If `known` changed,
    /// its recorded state is kept in `fresh` as the shadow entry; otherwise
    /// `fresh` is freed. Returns true if `known` changed.
    fn refresh_pair(&mut self, known: EntryIndex, fresh: EntryIndex) -> Result<bool> {
        if let Some(shadow) = self.tree.try_entry(known)?.old() {
            self.tree.try_entry_mut(known)?.old = OptionEntryIndex::none();
            self.tree.free_detached(shadow)?;
        }

        let entry = self.tree.try_entry_mut(known)?;
        let never_examined = is_gone(entry);
        let recorded = entry.meta;
        let recorded_digest = entry.digest.take();
        let observed = self.tree.try_entry(fresh)?.meta;
        let mut status = if never_examined {
            ChangeMask::NEW
        } else {
            classify(&recorded, &observed)
        };

        {
            let shadow = self.tree.try_entry_mut(fresh)?;
            shadow.meta = recorded;
            shadow.digest = recorded_digest;
        }
        let entry = self.tree.try_entry_mut(known)?;
        entry.meta = observed;
        entry.old = OptionEntryIndex::some(fresh);
        // Seen on disk now, whatever an earlier run could not examine.
        entry.flags -= EntryFlags::IGNORABLE;

        if status.is_replaced() {
            // The old children belong to the object that is gone.
            let children = mem::take(&mut entry.by_inode);
            entry.children_changed();
            for &child in &children {
                self.tree.try_entry_mut(child)?.parent = OptionEntryIndex::some(fresh);
                self.tree.mark_subtree(child, ChangeMask::REMOVED)?;
            }
            self.tree.set_children(fresh, children)?;
            self.walk_new(known, ChangeMask::NEW)?;
        } else if observed.kind().has_content() {
            if status.contains(ChangeMask::LIKELY)
                && self.config.verify_likely_with_digest
                && recorded_digest.is_some()
            {
                let current = self.compute_digest(known)?;
                if current.is_some() {
                    status = status.resolve_with_digest(current == recorded_digest);
                    self.tree.set_digest(known, current)?;
                }
            }
            if !status.intersects(ChangeMask::CHANGED | ChangeMask::LIKELY) {
                self.tree.set_digest(known, recorded_digest)?;
            }
        }

        if status.is_empty() || never_examined {
            self.tree.try_entry_mut(known)?.old = OptionEntryIndex::none();
            self.tree.free_detached(fresh)?;
        }
        if !status.is_replaced() && observed.is_dir() && self.refresh_dir(known)? {
            status |= ChangeMask::CHILD_CHANGED;
        }

        self.tree.try_entry_mut(known)?.status = status;
        Ok(!status.is_empty())
    }

    /// Makes the current state the recorded one.
    ///
    /// Removed entries are freed, and so are ignorable entries that were never
    /// examined. Shadow entries are dropped, and every status and per-run flag
    /// is cleared. Returns the number of entries freed.
    pub fn accept_changes(&mut self) -> Result<usize> {
        self.detector = None;
        self.copy_sources.clear();
        let root = self.tree.root();
        let mut freed = 0;

        let mut dirs = vec![root];
        dirs.extend(self.tree.descendants(root));
        for dir in dirs {
            let Some(entry) = self.tree.entry(dir) else {
                continue;
            };
            let removed: Vec<EntryIndex> = entry
                .children()
                .iter()
                .copied()
                .filter(|&child| self.tree.entry(child).is_some_and(is_gone))
                .collect();
            for child in removed {
                freed += self.tree.remove_child(dir, child)?;
            }
        }

        let mut all = vec![root];
        all.extend(self.tree.descendants(root));
        for index in all {
            if let Some(shadow) = self.tree.try_entry(index)?.old() {
                self.tree.try_entry_mut(index)?.old = OptionEntryIndex::none();
                freed += self.tree.free_detached(shadow)?;
            }
            let entry = self.tree.try_entry_mut(index)?;
            entry.status = ChangeMask::empty();
            entry.flags -= EntryFlags::IS_NEW | EntryFlags::IGNORABLE;
        }
        log::debug!("accepted changes, freed {freed} entries");
        Ok(freed)
    }

    // -----------------------------------------------------------------------
    // Copy detection
    // -----------------------------------------------------------------------

    /// The registered detector, taken out of `self` while it is queried.
    fn take_detector(&mut self) -> Result<CopyDetector> {
        if let Some(detector) = self.detector.take() {
            return Ok(detector);
        }
        let mut detector = CopyDetector::new(&self.config);
        detector.register(&mut self.tree, self.policy.as_ref(), &mut self.paths)?;
        Ok(detector)
    }

    /// Ranked copy source candidates for the new entry `entry`.
    ///
    /// The entry's digest is computed first if digest matching is enabled and
    /// it has none.
    pub fn find_copy_sources(&mut self, entry: EntryIndex) -> Result<CandidateList> {
        self.ensure_digest(entry)?;
        let detector = self.take_detector()?;
        let found = detector.find_sources(&self.tree, entry);
        self.detector = Some(detector);
        found
    }

    /// Candidates for every new entry, keyed by the new entry.
    pub fn detect_copies(&mut self) -> Result<BTreeMap<EntryIndex, CandidateList>> {
        for index in self.tree.descendants(self.tree.root()) {
            let entry = self.tree.try_entry(index)?;
            if entry.status.is_new() && !entry.is_ignorable() {
                self.ensure_digest(index)?;
            }
        }
        let detector = self.take_detector()?;
        let found = detector.detect_all(&self.tree);
        self.detector = Some(detector);
        found
    }

    fn ensure_digest(&mut self, entry: EntryIndex) -> Result<()> {
        if !self.config.digest_matching || self.tree.try_entry(entry)?.digest().is_some() {
            return Ok(());
        }
        if let Some(digest) = self.compute_digest(entry)? {
            self.tree.set_digest(entry, Some(digest))?;
        }
        Ok(())
    }

    /// Records `source` as the origin of the new entry `dest`.
    ///
    /// `dest` is flagged `COPY_BASE`, everything below it `COPY_SUB`.
    pub fn mark_copy(&mut self, dest: EntryIndex, source: EntryIndex) -> Result<()> {
        if !self.tree.try_entry(dest)?.status.is_new() {
            return Err(TreeStateError::Structural(format!(
                "entry {} is not new and cannot be a copy",
                dest.get()
            )));
        }
        if self.tree.try_entry(source)?.status.is_new() {
            return Err(TreeStateError::Structural(format!(
                "entry {} is new and cannot be a copy source",
                source.get()
            )));
        }
        self.tree.try_entry_mut(dest)?.flags |= EntryFlags::COPY_BASE;
        for below in self.tree.descendants(dest) {
            self.tree.try_entry_mut(below)?.flags |= EntryFlags::COPY_SUB;
        }
        self.copy_sources.insert(dest, source);
        Ok(())
    }

    /// Origin recorded for `dest` by [`mark_copy`](Self::mark_copy).
    pub fn copy_source(&self, dest: EntryIndex) -> Option<EntryIndex> {
        self.copy_sources.get(&dest).copied()
    }
}

/// Removed, or listed once but never successfully examined.
fn is_gone(entry: &Entry) -> bool {
    entry.status.is_removed() || (entry.is_ignorable() && entry.kind() == EntryKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MatchCriteria;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Tracker) {
        let dir = TempDir::new().expect("tempdir should be created");
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("notes.md"), b"# notes").unwrap();
        fs::create_dir_all(dir.path().join("deep/er")).unwrap();
        fs::write(dir.path().join("deep/er/leaf"), b"leaf").unwrap();

        let mut tracker =
            Tracker::open(dir.path(), TrackerConfig::default()).expect("open should succeed");
        assert_eq!(tracker.build().expect("build should succeed"), 7);
        assert_eq!(tracker.record_digests().expect("digests should succeed"), 3);
        (dir, tracker)
    }

    fn status(tracker: &mut Tracker, path: &str) -> ChangeMask {
        let index = tracker.lookup(Path::new(path)).expect("entry should exist");
        tracker.tree().try_entry(index).unwrap().status
    }

    fn backdate(path: &Path) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000))
            .unwrap();
    }

    #[test]
    fn rename_is_detected_as_copy() {
        let (dir, mut tracker) = setup();
        fs::rename(dir.path().join("sub/a.txt"), dir.path().join("sub/b.txt")).unwrap();

        assert!(tracker.refresh().expect("refresh should succeed") >= 2);
        assert!(status(&mut tracker, "sub/a.txt").is_removed());
        assert!(status(&mut tracker, "sub/b.txt").is_new());
        assert!(status(&mut tracker, "sub").contains(ChangeMask::CHILD_CHANGED));
        assert!(status(&mut tracker, ".").contains(ChangeMask::CHILD_CHANGED));

        let a = tracker.lookup(Path::new("sub/a.txt")).unwrap();
        let b = tracker.lookup(Path::new("sub/b.txt")).unwrap();
        let list = tracker.find_copy_sources(b).expect("detection should succeed");
        let best = list.best().expect("a candidate");
        assert_eq!(best.entry, a);
        assert!(best.criteria.contains(MatchCriteria::DIGEST));

        let all = tracker.detect_copies().unwrap();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn unchanged_tree_refreshes_clean() {
        let (_dir, mut tracker) = setup();
        assert_eq!(tracker.refresh().unwrap(), 0);
        let notes = tracker.lookup(Path::new("notes.md")).unwrap();
        let entry = tracker.tree().try_entry(notes).unwrap();
        assert_eq!(entry.digest(), Some(&ContentDigest::of_bytes(b"# notes")));
        assert!(entry.old().is_none());
    }

    #[test]
    fn clean_refresh_keeps_no_shadows() {
        let dir = TempDir::new().unwrap();
        for i in 0..100 {
            fs::write(dir.path().join(format!("f{i:03}")), b"same").unwrap();
        }
        let mut tracker = Tracker::open(dir.path(), TrackerConfig::default()).unwrap();
        tracker.build().unwrap();
        let live = tracker.tree().len();
        assert_eq!(live, 101);

        assert_eq!(tracker.refresh().unwrap(), 0);
        assert_eq!(tracker.tree().len(), live);
        assert_eq!(tracker.refresh().unwrap(), 0);
        assert_eq!(tracker.tree().len(), live);

        fs::write(dir.path().join("f007"), b"different").unwrap();
        assert_eq!(tracker.refresh().unwrap(), 2);
        // Only the changed file keeps its recorded state.
        assert_eq!(tracker.tree().len(), live + 1);
        tracker.accept_changes().unwrap();
        assert_eq!(tracker.tree().len(), live);
    }

    #[test]
    fn unexamined_entries_recover_or_go() {
        let (dir, mut tracker) = setup();
        let state = TempDir::new().unwrap();
        let list = state.path().join("entries");
        let root = tracker.tree().root();

        // As left by a listing whose lstat came too late.
        let notes = tracker.lookup(Path::new("notes.md")).unwrap();
        {
            let entry = tracker.tree.try_entry_mut(notes).unwrap();
            entry.meta = EntryMetadata {
                ino: entry.meta.ino,
                ..EntryMetadata::default()
            };
            entry.digest = None;
            entry.flags |= EntryFlags::IGNORABLE;
        }
        let ghost = tracker
            .tree
            .insert_child(root, b"ghost", EntryMetadata::default())
            .unwrap();
        tracker.tree.try_entry_mut(ghost).unwrap().flags |= EntryFlags::IGNORABLE;
        assert_eq!(tracker.save(&list).unwrap(), 6);

        for round in 0..3 {
            tracker.refresh().unwrap();
            let entry = tracker.tree().try_entry(notes).unwrap();
            assert!(!entry.is_ignorable(), "round {round}");
            assert_eq!(entry.kind(), EntryKind::File, "round {round}");
            tracker.accept_changes().unwrap();
        }
        assert!(tracker.lookup(Path::new("ghost")).is_err());
        assert_eq!(tracker.tree().try_entry(root).unwrap().child_count(), 3);
        assert_eq!(tracker.save(&list).unwrap(), 7);
        assert_eq!(tracker.refresh().unwrap(), 0);
    }

    #[test]
    fn digests_recorded_after_refresh_are_matched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("orig.bin"), b"payload").unwrap();
        let mut tracker = Tracker::open(dir.path(), TrackerConfig::default()).unwrap();
        tracker.build().unwrap();
        tracker.accept_changes().unwrap();

        fs::copy(dir.path().join("orig.bin"), dir.path().join("copy.bin")).unwrap();
        tracker.refresh().unwrap();
        let copy = tracker.lookup(Path::new("copy.bin")).unwrap();
        let orig = tracker.lookup(Path::new("orig.bin")).unwrap();
        // Without a recorded digest only the content-free criteria apply.
        assert!(tracker.find_copy_sources(copy).unwrap().is_empty());

        assert!(tracker.record_digests().unwrap() >= 1);
        let list = tracker.find_copy_sources(copy).unwrap();
        let best = list.best().expect("orig.bin should match by content");
        assert_eq!(best.entry, orig);
        assert!(best.criteria.contains(MatchCriteria::DIGEST));
    }

    #[test]
    fn touched_file_settles_by_digest() {
        let (dir, mut tracker) = setup();
        backdate(&dir.path().join("notes.md"));
        fs::write(dir.path().join("sub/a.txt"), b"jello").unwrap();
        backdate(&dir.path().join("sub/a.txt"));

        tracker.refresh().unwrap();
        assert_eq!(status(&mut tracker, "notes.md"), ChangeMask::META_MTIME);
        assert_eq!(
            status(&mut tracker, "sub/a.txt"),
            ChangeMask::META_MTIME | ChangeMask::CHANGED
        );
    }

    #[test]
    fn likely_kept_without_verification() {
        let (dir, _) = setup();
        let mut tracker = Tracker::open(
            dir.path(),
            TrackerConfig::default().with_verify_likely(false),
        )
        .unwrap();
        tracker.build().unwrap();
        tracker.record_digests().unwrap();
        backdate(&dir.path().join("notes.md"));

        tracker.refresh().unwrap();
        assert_eq!(
            status(&mut tracker, "notes.md"),
            ChangeMask::META_MTIME | ChangeMask::LIKELY
        );
    }

    #[test]
    fn grown_file_is_changed() {
        let (dir, mut tracker) = setup();
        fs::write(dir.path().join("notes.md"), b"# notes, now longer").unwrap();
        tracker.refresh().unwrap();
        assert!(status(&mut tracker, "notes.md").contains(ChangeMask::CHANGED));
    }

    #[test]
    fn removed_directory_marks_subtree() {
        let (dir, mut tracker) = setup();
        fs::remove_dir_all(dir.path().join("deep")).unwrap();
        tracker.refresh().unwrap();
        for path in ["deep", "deep/er", "deep/er/leaf"] {
            assert_eq!(status(&mut tracker, path), ChangeMask::REMOVED, "{path}");
        }

        assert!(tracker.accept_changes().unwrap() >= 3);
        assert!(tracker.lookup(Path::new("deep")).is_err());
        assert_eq!(tracker.refresh().unwrap(), 0);
    }

    #[test]
    fn file_replaced_by_directory() {
        let (dir, mut tracker) = setup();
        let notes = dir.path().join("notes.md");
        fs::remove_file(&notes).unwrap();
        fs::create_dir(&notes).unwrap();
        fs::write(notes.join("inside"), b"x").unwrap();

        tracker.refresh().unwrap();
        assert!(status(&mut tracker, "notes.md").is_replaced());
        assert!(status(&mut tracker, "notes.md/inside").is_new());
        let index = tracker.lookup(Path::new("notes.md")).unwrap();
        let shadow = tracker.tree().try_entry(index).unwrap().old().unwrap();
        assert_eq!(
            tracker.tree().try_entry(shadow).unwrap().digest(),
            Some(&ContentDigest::of_bytes(b"# notes"))
        );
    }

    #[test]
    fn new_directory_subtree_is_new() {
        let (dir, mut tracker) = setup();
        fs::create_dir_all(dir.path().join("fresh/inner")).unwrap();
        fs::write(dir.path().join("fresh/inner/file"), b"leaf").unwrap();

        tracker.refresh().unwrap();
        for path in ["fresh", "fresh/inner", "fresh/inner/file"] {
            assert!(status(&mut tracker, path).is_new(), "{path}");
        }

        let file = tracker.lookup(Path::new("fresh/inner/file")).unwrap();
        let leaf = tracker.lookup(Path::new("deep/er/leaf")).unwrap();
        let best = *tracker.find_copy_sources(file).unwrap().best().unwrap();
        assert_eq!(best.entry, leaf);

        let fresh = tracker.lookup(Path::new("fresh")).unwrap();
        let deep = tracker.lookup(Path::new("deep")).unwrap();
        tracker.mark_copy(fresh, deep).unwrap();
        assert!(tracker.tree().try_entry(fresh).unwrap().flags.contains(EntryFlags::COPY_BASE));
        assert!(tracker.tree().try_entry(file).unwrap().flags.contains(EntryFlags::COPY_SUB));
        assert!(tracker.copy_source(fresh).is_some());
        assert!(tracker.mark_copy(leaf, file).is_err());
    }

    #[test]
    fn saved_list_reloads_and_refreshes_clean() {
        let (dir, tracker) = setup();
        let state = TempDir::new().unwrap();
        let list = state.path().join("entries");
        assert_eq!(tracker.save(&list).expect("save should succeed"), 7);

        let mut loaded =
            Tracker::load(&list, TrackerConfig::default()).expect("load should succeed");
        assert_eq!(loaded.tree().root_path(), dir.path());
        assert_eq!(loaded.refresh().unwrap(), 0);
        let leaf = loaded.lookup(Path::new("deep/er/leaf")).unwrap();
        assert_eq!(loaded.resolve_path(leaf).unwrap(), dir.path().join("deep/er/leaf"));
    }

    #[test]
    fn open_rejects_files_and_bad_config() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            Tracker::open(&file, TrackerConfig::default()),
            Err(TreeStateError::Structural(_))
        ));
        assert!(matches!(
            Tracker::open(dir.path(), TrackerConfig::default().with_path_cache_slots(0)),
            Err(TreeStateError::Config(_))
        ));
    }

    #[test]
    fn enumerate_and_classify_directly() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one"), b"1").unwrap();
        fs::write(dir.path().join("two"), b"22").unwrap();
        let mut tracker = Tracker::open(dir.path(), TrackerConfig::default()).unwrap();
        let root = tracker.tree().root();
        let children = tracker.enumerate(root).unwrap().to_vec();
        assert_eq!(children.len(), 2);

        let one = tracker.lookup(Path::new("one")).unwrap();
        let mut fresh = tracker.tree().try_entry(one).unwrap().meta;
        fresh.size += 1;
        assert!(tracker.classify(one, &fresh).unwrap().contains(ChangeMask::CHANGED));
    }
}
