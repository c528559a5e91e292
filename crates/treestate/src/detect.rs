//! Copy and rename source detection.
//!
//! Every previously known entry is registered in a set of match tables keyed
//! by content digest, (device, inode) and leaf name. A new entry is then
//! looked up in the tables for its class; hits are merged into one ranked
//! list. New directories additionally get "similar directory" candidates,
//! scored by how many child names they share with a known directory.
//!
//! Nothing is decided here. The caller picks (or ignores) a candidate.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::hash::Hash;

use bitflags::bitflags;
use fnv::FnvHashMap;

use crate::cache::CacheSlot;
use crate::config::TrackerConfig;
use crate::digest::ContentDigest;
use crate::error::Result;
use crate::policy::ExclusionPolicy;
use crate::storage::{ChangeMask, Entry, EntryFlags, EntryIndex, EntryKind, NameId};
use crate::tree::{EntryTree, PathResolver};

/// Score of a content digest match.
pub const DIGEST_SCORE: u32 = 1000;
/// Score of a (device, inode) match.
pub const INODE_SCORE: u32 = 900;
/// Score of a leaf name match.
pub const NAME_SCORE: u32 = 300;
/// Scale of directory similarity scores.
pub const MAX_SCORE: u32 = 1000;

bitflags! {
    /// Which criteria produced a candidate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MatchCriteria: u32 {
        const DIGEST = 1;
        const INODE = 2;
        const NAME = 4;
        const DIR_LIST = 8;
    }
}

/// One proposed source entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub entry: EntryIndex,
    pub criteria: MatchCriteria,
    /// Best score of all criteria that matched, 0..=1000.
    pub score: u32,
}

/// Ranked candidates for one new entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    pub candidates: Vec<MatchCandidate>,
    /// Some bucket or the similar-directory scan hit its bound, so the list
    /// may be missing candidates.
    pub overflowed: bool,
}

impl CandidateList {
    #[inline]
    pub fn best(&self) -> Option<&MatchCandidate> {
        self.candidates.first()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

// ---------------------------------------------------------------------------
// Match tables
// ---------------------------------------------------------------------------

/// Bounded list of entry indices, packed little-endian into a cache slot.
#[derive(Debug, Clone)]
struct Bucket {
    slot: CacheSlot,
    overflow: u32,
}

impl Bucket {
    fn new() -> Self {
        Self {
            slot: CacheSlot::new(),
            overflow: 0,
        }
    }

    fn count(&self) -> usize {
        self.slot.len() / 4
    }

    fn push(&mut self, index: EntryIndex, max: usize) -> Result<()> {
        if self.count() >= max {
            self.overflow += 1;
            return Ok(());
        }
        self.slot.extend(&(index.get() as u32).to_le_bytes())
    }

    fn iter(&self) -> impl Iterator<Item = EntryIndex> + '_ {
        self.slot
            .as_bytes()
            .chunks_exact(4)
            .map(|raw| {
                EntryIndex::new(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
            })
    }
}

#[derive(Debug)]
struct MatchTable<K> {
    buckets: FnvHashMap<K, Bucket>,
    max: usize,
}

impl<K: Hash + Eq> MatchTable<K> {
    fn new(max: usize) -> Self {
        Self {
            buckets: FnvHashMap::default(),
            max: max.max(1),
        }
    }

    fn insert(&mut self, key: K, index: EntryIndex) -> Result<()> {
        let max = self.max;
        self.buckets
            .entry(key)
            .or_insert_with(Bucket::new)
            .push(index, max)
    }

    fn get(&self, key: &K) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

fn is_file_class(kind: EntryKind) -> bool {
    kind.has_content()
}

/// True for entries that must not be proposed as sources.
fn is_unknown(entry: &Entry) -> bool {
    entry.status.is_new()
        || entry
            .flags
            .intersects(EntryFlags::IS_NEW | EntryFlags::IGNORABLE)
}

// ---------------------------------------------------------------------------
// CopyDetector
// ---------------------------------------------------------------------------

/// Match tables over the previously known entries of a tree.
#[derive(Debug)]
pub struct CopyDetector {
    digests: MatchTable<ContentDigest>,
    file_inodes: MatchTable<(u64, u64)>,
    dir_inodes: MatchTable<(u64, u64)>,
    file_names: MatchTable<NameId>,
    dir_names: MatchTable<NameId>,
    digest_matching: bool,
    similar_dir_scan_max: usize,
    similar_dir_keep: usize,
}

impl Default for CopyDetector {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl CopyDetector {
    pub fn new(config: &TrackerConfig) -> Self {
        let max = config.candidate_bucket_max;
        Self {
            digests: MatchTable::new(max),
            file_inodes: MatchTable::new(max),
            dir_inodes: MatchTable::new(max),
            file_names: MatchTable::new(max),
            dir_names: MatchTable::new(max),
            digest_matching: config.digest_matching,
            similar_dir_scan_max: config.similar_dir_scan_max.max(1),
            similar_dir_keep: config.similar_dir_keep,
        }
    }

    /// Registers every previously known entry of `tree`.
    ///
    /// Entries flagged new or ignorable, and entries `policy` excludes, are
    /// skipped. Entries found removed still count as known. An entry that was
    /// refreshed is registered with its recorded (shadow) state; a digest only
    /// known on the live entry is used if the content did not change. Returns
    /// the number of entries registered.
    pub fn register(
        &mut self,
        tree: &mut EntryTree,
        policy: &dyn ExclusionPolicy,
        paths: &mut PathResolver,
    ) -> Result<usize> {
        self.clear();
        let mut registered = 0;
        for index in tree.descendants(tree.root()) {
            let entry = tree.try_entry(index)?;
            if is_unknown(entry) {
                continue;
            }
            let recorded = entry.old().and_then(|old| tree.entry(old)).unwrap_or(entry);
            let kind = recorded.kind();
            if kind != EntryKind::Dir && !is_file_class(kind) {
                continue;
            }
            let meta = recorded.meta;
            // A digest recorded after the refresh is still the recorded
            // content unless the entry changed.
            let digest = recorded.digest().copied().or_else(|| {
                let settled = !entry.status.is_replaced()
                    && !entry.status.intersects(ChangeMask::CHANGED | ChangeMask::LIKELY);
                entry.digest().copied().filter(|_| settled)
            });
            let name = entry.name_id();

            if policy.is_excluded(paths.resolve(tree, index)?, kind == EntryKind::Dir) {
                continue;
            }

            let key = (meta.dev, meta.ino);
            if kind == EntryKind::Dir {
                self.dir_inodes.insert(key, index)?;
                self.dir_names.insert(name, index)?;
            } else {
                self.file_inodes.insert(key, index)?;
                self.file_names.insert(name, index)?;
                if let Some(digest) = digest.filter(|_| self.digest_matching) {
                    self.digests.insert(digest, index)?;
                }
            }
            registered += 1;
        }
        log::debug!("registered {registered} known entries for copy detection");
        Ok(registered)
    }

    /// Drops all registrations.
    pub fn clear(&mut self) {
        self.digests.clear();
        self.file_inodes.clear();
        self.dir_inodes.clear();
        self.file_names.clear();
        self.dir_names.clear();
    }

    /// Ranked copy source candidates for the new entry `new`.
    pub fn find_sources(&self, tree: &EntryTree, new: EntryIndex) -> Result<CandidateList> {
        let entry = tree.try_entry(new)?;
        let mut merged = Merged::default();
        let key = (entry.meta.dev, entry.meta.ino);
        let kind = entry.kind();

        if is_file_class(kind) {
            if self.digest_matching {
                if let Some(digest) = entry.digest() {
                    merged.add_bucket(
                        self.digests.get(digest),
                        MatchCriteria::DIGEST,
                        DIGEST_SCORE,
                    );
                }
            }
            merged.add_bucket(self.file_inodes.get(&key), MatchCriteria::INODE, INODE_SCORE);
            merged.add_bucket(
                self.file_names.get(&entry.name_id()),
                MatchCriteria::NAME,
                NAME_SCORE,
            );
        } else if kind == EntryKind::Dir {
            merged.add_bucket(self.dir_inodes.get(&key), MatchCriteria::INODE, INODE_SCORE);
            merged.add_bucket(
                self.dir_names.get(&entry.name_id()),
                MatchCriteria::NAME,
                NAME_SCORE,
            );
            self.similar_dirs(tree, new, &mut merged)?;
        }

        merged.by_entry.remove(&new);
        Ok(merged.into_ranked(tree))
    }

    /// Candidates for every new entry of `tree`, keyed by the new entry.
    ///
    /// New entries without any candidate are left out.
    pub fn detect_all(&self, tree: &EntryTree) -> Result<BTreeMap<EntryIndex, CandidateList>> {
        let mut found = BTreeMap::new();
        for index in tree.descendants(tree.root()) {
            let entry = tree.try_entry(index)?;
            if !entry.status.is_new() || entry.is_ignorable() {
                continue;
            }
            let candidates = self.find_sources(tree, index)?;
            if !candidates.is_empty() {
                found.insert(index, candidates);
            }
        }
        Ok(found)
    }

    /// Counts, per known directory, the children of `dir` it has a
    /// same-named child for. At most `similar_dir_scan_max` directories are
    /// counted.
    fn parent_scan(&self, tree: &EntryTree, dir: EntryIndex) -> Result<ParentScan> {
        let mut scan = ParentScan::default();
        for &child in tree.try_entry(dir)?.children() {
            let Some(entry) = tree.entry(child) else {
                continue;
            };
            let table = if entry.is_dir() {
                &self.dir_names
            } else {
                &self.file_names
            };
            let Some(bucket) = table.get(&entry.name_id()) else {
                continue;
            };
            scan.buckets_overflowed |= bucket.overflow > 0;
            for known in bucket.iter() {
                let Some(parent) = tree.entry(known).and_then(Entry::parent) else {
                    continue;
                };
                if parent == dir {
                    continue;
                }
                if let Some(count) = scan.parents.get_mut(&parent) {
                    *count += 1;
                } else if scan.parents.len() < self.similar_dir_scan_max {
                    scan.parents.insert(parent, 1);
                } else {
                    scan.stopped = true;
                }
            }
        }
        Ok(scan)
    }

    /// Adds known directories sharing child names with the new directory
    /// `dir`, scored by name-set overlap.
    fn similar_dirs(&self, tree: &EntryTree, dir: EntryIndex, merged: &mut Merged) -> Result<()> {
        let scan = self.parent_scan(tree, dir)?;
        merged.overflowed |= scan.buckets_overflowed || scan.stopped;
        if scan.parents.is_empty() {
            return Ok(());
        }
        if scan.stopped {
            log::debug!(
                "similar directory scan for entry {} stopped at {} candidates",
                dir.get(),
                scan.parents.len()
            );
        }
        let seen = scan.parents;

        let ours = child_names(tree, dir, false);
        let mut scored: Vec<(u32, EntryIndex)> = seen
            .into_keys()
            .map(|candidate| {
                let theirs = child_names(tree, candidate, true);
                (overlap_score(&ours, &theirs), candidate)
            })
            .filter(|&(score, _)| score > 0)
            .collect();
        scored.sort_by_key(|&(score, candidate)| (Reverse(score), candidate));
        scored.truncate(self.similar_dir_keep);

        for (score, candidate) in scored {
            merged.add(candidate, MatchCriteria::DIR_LIST, score);
        }
        Ok(())
    }
}

#[derive(Default)]
struct ParentScan {
    parents: FnvHashMap<EntryIndex, u32>,
    /// A name bucket consulted had dropped entries.
    buckets_overflowed: bool,
    /// More parents than `similar_dir_scan_max` were found.
    stopped: bool,
}

/// Sorted, deduplicated child names of `dir`. With `known_only`, children
/// added since the last synchronization are left out.
fn child_names(tree: &EntryTree, dir: EntryIndex, known_only: bool) -> Vec<NameId> {
    let Some(entry) = tree.entry(dir) else {
        return Vec::new();
    };
    let mut names: Vec<NameId> = entry
        .children()
        .iter()
        .filter_map(|&child| tree.entry(child))
        .filter(|child| !child.is_ignorable() && !(known_only && is_unknown(child)))
        .map(Entry::name_id)
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Shared names over all names, scaled to 0..=1000 and rounded half up.
fn overlap_score(a: &[NameId], b: &[NameId]) -> u32 {
    let (mut i, mut j, mut common) = (0, 0, 0u64);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                common += 1;
                i += 1;
                j += 1;
            }
        }
    }
    let union = (a.len() + b.len()) as u64 - common;
    if union == 0 {
        return 0;
    }
    ((u64::from(MAX_SCORE) * common + union / 2) / union) as u32
}

#[derive(Default)]
struct Merged {
    by_entry: FnvHashMap<EntryIndex, MatchCandidate>,
    overflowed: bool,
}

impl Merged {
    fn add(&mut self, entry: EntryIndex, criterion: MatchCriteria, score: u32) {
        let candidate = self.by_entry.entry(entry).or_insert(MatchCandidate {
            entry,
            criteria: MatchCriteria::empty(),
            score: 0,
        });
        candidate.criteria |= criterion;
        candidate.score = candidate.score.max(score);
    }

    fn add_bucket(&mut self, bucket: Option<&Bucket>, criterion: MatchCriteria, score: u32) {
        let Some(bucket) = bucket else {
            return;
        };
        self.overflowed |= bucket.overflow > 0;
        for entry in bucket.iter() {
            self.add(entry, criterion, score);
        }
    }

    fn into_ranked(self, tree: &EntryTree) -> CandidateList {
        // Entries freed since registration are dropped.
        let mut candidates: Vec<MatchCandidate> = self
            .by_entry
            .into_values()
            .filter(|candidate| tree.entry(candidate.entry).is_some())
            .collect();
        candidates.sort_by_key(|candidate| {
            (
                Reverse(candidate.score),
                Reverse(candidate.criteria.bits().count_ones()),
                candidate.entry,
            )
        });
        CandidateList {
            candidates,
            overflowed: self.overflowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{patterns, NoExclusions};
    use crate::storage::{EntryMetadata, OptionEntryIndex};

    fn meta(kind: EntryKind, ino: u64) -> EntryMetadata {
        EntryMetadata {
            mode: kind.mode_bits() | 0o644,
            dev: 7,
            ino,
            ..EntryMetadata::default()
        }
    }

    struct Fixture {
        tree: EntryTree,
        next_ino: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tree: EntryTree::new(b"/work", meta(EntryKind::Dir, 1)).expect("tree should build"),
                next_ino: 100,
            }
        }

        fn add(&mut self, parent: EntryIndex, name: &str, kind: EntryKind) -> EntryIndex {
            self.next_ino += 1;
            self.tree
                .insert_child(parent, name.as_bytes(), meta(kind, self.next_ino))
                .expect("insert should succeed")
        }

        fn add_new(&mut self, parent: EntryIndex, name: &str, kind: EntryKind) -> EntryIndex {
            let index = self.add(parent, name, kind);
            self.tree.try_entry_mut(index).unwrap().status = ChangeMask::NEW;
            index
        }

        fn detector(&mut self, config: &TrackerConfig) -> CopyDetector {
            let mut detector = CopyDetector::new(config);
            detector
                .register(&mut self.tree, &NoExclusions, &mut PathResolver::default())
                .expect("register should succeed");
            detector
        }
    }

    #[test]
    fn digest_match_ranks_first() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let original = fx.add(root, "report.txt", EntryKind::File);
        let same_name = fx.add(root, "copy.txt", EntryKind::File);
        let sub = fx.add(root, "sub", EntryKind::Dir);
        let copy = fx.add_new(sub, "copy.txt", EntryKind::File);
        let digest = ContentDigest::of_bytes(b"quarterly numbers");
        fx.tree.set_digest(original, Some(digest)).unwrap();
        fx.tree.set_digest(copy, Some(digest)).unwrap();

        let detector = fx.detector(&TrackerConfig::default());
        let list = detector.find_sources(&fx.tree, copy).expect("query should succeed");
        assert_eq!(
            list.candidates,
            vec![
                MatchCandidate {
                    entry: original,
                    criteria: MatchCriteria::DIGEST,
                    score: DIGEST_SCORE
                },
                MatchCandidate {
                    entry: same_name,
                    criteria: MatchCriteria::NAME,
                    score: NAME_SCORE
                },
            ]
        );
        assert!(!list.overflowed);
    }

    #[test]
    fn digest_matching_can_be_disabled() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let original = fx.add(root, "a", EntryKind::File);
        let copy = fx.add_new(root, "b", EntryKind::File);
        let digest = ContentDigest::of_bytes(b"same");
        fx.tree.set_digest(original, Some(digest)).unwrap();
        fx.tree.set_digest(copy, Some(digest)).unwrap();

        let detector = fx.detector(&TrackerConfig::default().with_digest_matching(false));
        assert!(detector.find_sources(&fx.tree, copy).unwrap().is_empty());
    }

    #[test]
    fn live_digest_stands_in_for_unchanged_content() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let known = fx.add(root, "kept.bin", EntryKind::File);
        let recorded = fx.tree.try_entry(known).unwrap().meta;
        let shadow = fx.tree.allocate_detached(b"kept.bin", recorded).unwrap();
        fx.tree.try_entry_mut(known).unwrap().old = OptionEntryIndex::some(shadow);
        let digest = ContentDigest::of_bytes(b"kept content");
        fx.tree.set_digest(known, Some(digest)).unwrap();
        fx.tree.try_entry_mut(known).unwrap().status = ChangeMask::META_OWNER;
        let copy = fx.add_new(root, "elsewhere.bin", EntryKind::File);
        fx.tree.set_digest(copy, Some(digest)).unwrap();

        let detector = fx.detector(&TrackerConfig::default());
        let best = *detector.find_sources(&fx.tree, copy).unwrap().best().unwrap();
        assert_eq!(best.entry, known);
        assert_eq!(best.criteria, MatchCriteria::DIGEST);

        // The live digest may describe new content once the entry changed.
        fx.tree.try_entry_mut(known).unwrap().status = ChangeMask::META_MTIME | ChangeMask::LIKELY;
        let detector = fx.detector(&TrackerConfig::default());
        assert!(detector.find_sources(&fx.tree, copy).unwrap().is_empty());
    }

    #[test]
    fn inode_match_for_moved_file() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let moved = fx.add(root, "old-name", EntryKind::File);
        fx.tree.try_entry_mut(moved).unwrap().status = ChangeMask::REMOVED;
        let ino = fx.tree.try_entry(moved).unwrap().meta.ino;
        let arrived = fx
            .tree
            .insert_child(root, b"new-name", meta(EntryKind::File, ino))
            .unwrap();
        fx.tree.try_entry_mut(arrived).unwrap().status = ChangeMask::NEW;

        let detector = fx.detector(&TrackerConfig::default());
        let best = *detector.find_sources(&fx.tree, arrived).unwrap().best().unwrap();
        assert_eq!(best.entry, moved);
        assert_eq!(best.criteria, MatchCriteria::INODE);
        assert_eq!(best.score, INODE_SCORE);
    }

    #[test]
    fn more_criteria_break_score_ties() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let a = fx.add(root, "a", EntryKind::Dir);
        let b = fx.add(root, "b", EntryKind::Dir);
        let digest = ContentDigest::of_bytes(b"x");
        let plain = fx.add(a, "other", EntryKind::File);
        let named = fx.add(b, "data", EntryKind::File);
        let c = fx.add(root, "c", EntryKind::Dir);
        let new = fx.add_new(c, "data", EntryKind::File);
        for index in [plain, named, new] {
            fx.tree.set_digest(index, Some(digest)).unwrap();
        }

        let detector = fx.detector(&TrackerConfig::default());
        let list = detector.find_sources(&fx.tree, new).unwrap();
        let order: Vec<_> = list.candidates.iter().map(|c| c.entry).collect();
        assert_eq!(order, vec![named, plain]);
        assert_eq!(list.candidates[0].criteria, MatchCriteria::DIGEST | MatchCriteria::NAME);
    }

    #[test]
    fn similar_directory_overlap() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        let known = fx.add(root, "project", EntryKind::Dir);
        for name in ["a", "b", "c", "d", "e"] {
            fx.add(known, name, EntryKind::File);
        }
        let copy = fx.add_new(root, "project-copy", EntryKind::Dir);
        for name in ["a", "b", "c", "x"] {
            fx.add_new(copy, name, EntryKind::File);
        }

        let detector = fx.detector(&TrackerConfig::default());
        let list = detector.find_sources(&fx.tree, copy).unwrap();
        assert_eq!(
            list.best(),
            Some(&MatchCandidate {
                entry: known,
                criteria: MatchCriteria::DIR_LIST,
                score: 500
            })
        );

        let all = detector.detect_all(&fx.tree).expect("detect should succeed");
        assert!(all.contains_key(&copy));
        // `x` has no known counterpart.
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn overlap_rounds_half_up() {
        let ids: Vec<NameId> = {
            let mut pool = crate::storage::NamePool::new();
            ["a", "b", "c"].iter().map(|n| pool.intern(n.as_bytes())).collect()
        };
        assert_eq!(overlap_score(&ids[..2], &ids[1..2]), 500);
        // 1 shared of 3 names in total: 333.33 -> 333.
        assert_eq!(overlap_score(&ids[..1], &ids[..3]), 333);
        // 2 of 3: 666.67 -> 667.
        assert_eq!(overlap_score(&ids[..2], &ids[..3]), 667);
        assert_eq!(overlap_score(&[], &[]), 0);
    }

    #[test]
    fn full_buckets_report_overflow() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        for dir in ["d1", "d2", "d3"] {
            let dir = fx.add(root, dir, EntryKind::Dir);
            fx.add(dir, "Makefile", EntryKind::File);
        }
        let new = fx.add_new(root, "Makefile", EntryKind::File);

        let detector = fx.detector(&TrackerConfig::default().with_candidate_bucket_max(2));
        let list = detector.find_sources(&fx.tree, new).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.overflowed);
    }

    #[test]
    fn parent_scan_separates_cap_from_bucket_overflow() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        for dir in ["d1", "d2", "d3"] {
            let dir = fx.add(root, dir, EntryKind::Dir);
            fx.add(dir, "Makefile", EntryKind::File);
        }
        let new = fx.add_new(root, "n", EntryKind::Dir);
        fx.add_new(new, "Makefile", EntryKind::File);

        let detector = fx.detector(&TrackerConfig::default().with_candidate_bucket_max(2));
        let scan = detector.parent_scan(&fx.tree, new).unwrap();
        assert_eq!(scan.parents.len(), 2);
        assert!(scan.buckets_overflowed);
        assert!(!scan.stopped);

        let config = TrackerConfig {
            similar_dir_scan_max: 1,
            ..TrackerConfig::default()
        };
        let detector = fx.detector(&config);
        let scan = detector.parent_scan(&fx.tree, new).unwrap();
        assert_eq!(scan.parents.len(), 1);
        assert!(!scan.buckets_overflowed);
        assert!(scan.stopped);

        let list = detector.find_sources(&fx.tree, new).unwrap();
        assert!(list.overflowed);
        assert_eq!(
            list.candidates
                .iter()
                .filter(|candidate| candidate.criteria.contains(MatchCriteria::DIR_LIST))
                .count(),
            1
        );
    }

    #[test]
    fn excluded_and_unknown_entries_are_not_sources() {
        let mut fx = Fixture::new();
        let root = fx.tree.root();
        fx.add(root, "scratch.tmp", EntryKind::File);
        let ignorable = fx.add(root, "cache", EntryKind::File);
        fx.tree.try_entry_mut(ignorable).unwrap().flags |= EntryFlags::IGNORABLE;
        let tmp = fx.add_new(root, "sub", EntryKind::Dir);
        let new_tmp = fx.add_new(tmp, "scratch.tmp", EntryKind::File);
        let new_cache = fx.add_new(tmp, "cache", EntryKind::File);

        let policy = patterns(std::path::Path::new("/work"), &["*.tmp"]).unwrap();
        let mut detector = CopyDetector::default();
        let registered = detector
            .register(&mut fx.tree, &policy, &mut PathResolver::default())
            .unwrap();
        assert_eq!(registered, 0);
        assert!(detector.find_sources(&fx.tree, new_tmp).unwrap().is_empty());
        assert!(detector.find_sources(&fx.tree, new_cache).unwrap().is_empty());
    }
}
