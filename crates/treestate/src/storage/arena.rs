//! Pooled allocator for entry records.
//!
//! Entries live in one growable vector and are addressed by `EntryIndex`. An
//! index stays valid until its entry is freed; freed slots are kept as a list
//! of runs (consecutive vacant slots) so that bulk requests can be served
//! from a single run and neighbouring frees coalesce.
//!
//! Each slot carries a generation counter that is bumped on free, so callers
//! that use indices as opaque cache keys can tell a reused slot from the
//! entry that used to live there.

use std::mem;
use std::ops::{Index, IndexMut};

use super::entry::Entry;
use super::index_types::EntryIndex;
use crate::error::{Result, TreeStateError};

/// Size of one growth step, in bytes of entry records.
const BATCH_BYTES: usize = 8192;

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Vacant,
    Occupied(Entry),
}

/// A run of consecutive vacant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRun {
    start: usize,
    len: usize,
}

impl FreeRun {
    #[inline]
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Arena of `Entry` records with a run-coalescing free list.
#[derive(Debug, Default)]
pub struct EntryArena {
    slots: Vec<Slot>,
    generations: Vec<u32>,
    /// Free runs; the head of the list is the last element.
    free: Vec<FreeRun>,
    live: usize,
}

impl EntryArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries handed out per growth step.
    pub fn batch_size() -> usize {
        (BATCH_BYTES / mem::size_of::<Entry>()).max(1)
    }

    /// Allocates up to `count` consecutive zero-filled entries.
    ///
    /// Returns the first index and how many entries were handed out, which is
    /// between 1 and `count`. The head free run is used whole if it is no
    /// larger than `count`; otherwise its low end is split off.
    pub fn allocate(&mut self, count: usize) -> Result<(EntryIndex, usize)> {
        let count = count.max(1);
        if self.free.is_empty() {
            self.grow(count)?;
        }
        let head = self
            .free
            .last_mut()
            .ok_or_else(|| TreeStateError::OutOfMemory("arena free list empty".into()))?;

        let (start, got) = if head.len <= count {
            let run = *head;
            self.free.pop();
            (run.start, run.len)
        } else {
            let start = head.start;
            head.start += count;
            head.len -= count;
            (start, count)
        };

        for slot in &mut self.slots[start..start + got] {
            *slot = Slot::Occupied(Entry::default());
        }
        self.live += got;
        Ok((EntryIndex::new(start), got))
    }

    /// Appends one batch of vacant slots (at least `count`) as a new head run.
    fn grow(&mut self, count: usize) -> Result<()> {
        let batch = Self::batch_size().max(count);
        let start = self.slots.len();
        if start + batch >= EntryIndex::MAX_SLOTS {
            return Err(TreeStateError::OutOfMemory(format!(
                "arena cannot address {} entries",
                start + batch
            )));
        }
        self.slots.try_reserve_exact(batch)?;
        self.generations.try_reserve_exact(batch)?;
        self.slots.resize_with(start + batch, Slot::default);
        self.generations.resize(start + batch, 0);
        self.free.push(FreeRun { start, len: batch });
        log::trace!("entry arena grew by {batch} slots to {}", self.slots.len());
        Ok(())
    }

    /// Frees `index`, its children and its shadow entry, recursively.
    ///
    /// The caller is responsible for unlinking `index` from its parent first.
    /// Returns the number of entries freed.
    pub fn free(&mut self, index: EntryIndex) -> Result<usize> {
        let mut pending = vec![index];
        let mut freed = 0;
        while let Some(current) = pending.pop() {
            let slot = self
                .slots
                .get_mut(current.get())
                .ok_or_else(|| vacant_error(current))?;
            let Slot::Occupied(entry) = mem::take(slot) else {
                return Err(vacant_error(current));
            };
            pending.extend(entry.by_inode.iter().copied());
            pending.extend(entry.old.to_option());

            let generation = &mut self.generations[current.get()];
            *generation = generation.wrapping_add(1);
            self.release(current.get());
            self.live -= 1;
            freed += 1;
        }
        Ok(freed)
    }

    /// Returns one slot to the free list, merging it with an adjacent run.
    fn release(&mut self, index: usize) {
        let neighbour = self
            .free
            .iter()
            .rposition(|run| run.end() == index || run.start == index + 1);
        let run = match neighbour {
            Some(position) => {
                let mut run = self.free.remove(position);
                if run.end() == index {
                    run.len += 1;
                } else {
                    run.start = index;
                    run.len += 1;
                }
                run
            }
            None => FreeRun {
                start: index,
                len: 1,
            },
        };
        self.free.push(run);
    }

    /// Generation counter of a slot, bumped every time it is freed.
    #[inline]
    pub fn generation(&self, index: EntryIndex) -> u32 {
        self.generations.get(index.get()).copied().unwrap_or(0)
    }

    pub fn get(&self, index: EntryIndex) -> Option<&Entry> {
        match self.slots.get(index.get()) {
            Some(Slot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: EntryIndex) -> Option<&mut Entry> {
        match self.slots.get_mut(index.get()) {
            Some(Slot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Like `get_mut`, but reports a vacant slot as a structural error.
    pub fn try_get_mut(&mut self, index: EntryIndex) -> Result<&mut Entry> {
        self.get_mut(index).ok_or_else(|| vacant_error(index))
    }

    /// Like `get`, but reports a vacant slot as a structural error.
    pub fn try_get(&self, index: EntryIndex) -> Result<&Entry> {
        self.get(index).ok_or_else(|| vacant_error(index))
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total slots, live or vacant.
    #[inline]
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of runs on the free list.
    #[inline]
    pub fn free_runs(&self) -> usize {
        self.free.len()
    }

    /// Iterates over live entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryIndex, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(entry) => Some((EntryIndex::new(index), entry)),
                Slot::Vacant => None,
            })
    }
}

fn vacant_error(index: EntryIndex) -> TreeStateError {
    TreeStateError::Structural(format!("entry {} is not allocated", index.get()))
}

impl Index<EntryIndex> for EntryArena {
    type Output = Entry;

    fn index(&self, index: EntryIndex) -> &Self::Output {
        self.get(index).expect("invalid entry index")
    }
}

impl IndexMut<EntryIndex> for EntryArena {
    fn index_mut(&mut self, index: EntryIndex) -> &mut Self::Output {
        self.get_mut(index).expect("invalid entry index")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OptionEntryIndex;

    #[test]
    fn allocate_free_allocate_reuses_index() {
        let mut arena = EntryArena::new();
        let (first, got) = arena.allocate(1).expect("allocate should succeed");
        assert_eq!(got, 1);
        arena.free(first).expect("free should succeed");
        let (again, _) = arena.allocate(1).expect("allocate should succeed");
        assert_eq!(again, first);
    }

    #[test]
    fn fresh_entries_are_zero_filled() {
        let mut arena = EntryArena::new();
        let (first, _) = arena.allocate(1).unwrap();
        arena[first].cache_slot = 9;
        arena[first].path_len = 40;
        arena.free(first).unwrap();

        let (again, _) = arena.allocate(1).unwrap();
        assert_eq!(arena[again].cache_slot(), 0);
        assert_eq!(arena[again].path_len, 0);
    }

    #[test]
    fn bulk_allocation_may_return_fewer() {
        let mut arena = EntryArena::new();
        let batch = EntryArena::batch_size();
        let (first, got) = arena.allocate(3).unwrap();
        assert_eq!((first.get(), got), (0, 3));
        assert_eq!(arena.slots(), batch);

        // Ask for more than what is left of the first batch.
        let (next, got) = arena.allocate(batch).unwrap();
        assert_eq!(next.get(), 3);
        assert_eq!(got, batch - 3);
        assert_eq!(arena.len(), batch);
    }

    #[test]
    fn request_larger_than_batch_is_served_whole() {
        let mut arena = EntryArena::new();
        let want = EntryArena::batch_size() * 3;
        let (_, got) = arena.allocate(want).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn free_is_recursive_over_children_and_shadow() {
        let mut arena = EntryArena::new();
        let (base, _) = arena.allocate(4).unwrap();
        let (dir, child_a, child_b, shadow) =
            (base, base.offset(1), base.offset(2), base.offset(3));
        arena[dir].by_inode.push(child_a);
        arena[dir].by_inode.push(child_b);
        arena[child_a].old = OptionEntryIndex::some(shadow);

        assert_eq!(arena.free(dir).unwrap(), 4);
        assert!(arena.is_empty());
        assert!(arena.get(shadow).is_none());
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let mut arena = EntryArena::new();
        let (base, _) = arena.allocate(EntryArena::batch_size()).unwrap();
        assert_eq!(arena.free_runs(), 0);

        arena.free(base.offset(5)).unwrap();
        arena.free(base.offset(6)).unwrap();
        arena.free(base.offset(4)).unwrap();
        assert_eq!(arena.free_runs(), 1);

        let (first, got) = arena.allocate(3).unwrap();
        assert_eq!((first, got), (base.offset(4), 3));
    }

    #[test]
    fn double_free_is_structural() {
        let mut arena = EntryArena::new();
        let (idx, _) = arena.allocate(1).unwrap();
        arena.free(idx).unwrap();
        assert!(matches!(
            arena.free(idx),
            Err(TreeStateError::Structural(_))
        ));
    }

    #[test]
    fn generation_changes_on_free() {
        let mut arena = EntryArena::new();
        let (idx, _) = arena.allocate(1).unwrap();
        let before = arena.generation(idx);
        arena.free(idx).unwrap();
        arena.allocate(1).unwrap();
        assert_ne!(arena.generation(idx), before);
    }
}
