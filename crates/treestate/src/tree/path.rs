//! Cached full-path reconstruction.
//!
//! Entries only store their leaf name. `PathResolver` joins the names up to
//! the root on demand and keeps recent results in a [`BoundedCache`]. Each
//! entry remembers which slot its path was put in (`cache_slot`, 1-based); the
//! slot's id is checked before use because the slot may have been taken over
//! by another entry since.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::EntryTree;
use crate::cache::BoundedCache;
use crate::error::{Result, TreeStateError};
use crate::storage::EntryIndex;

/// Default number of cached paths.
pub const PATH_CACHE_SLOTS: usize = 48;

/// Builds and caches full paths for tree entries.
#[derive(Debug)]
pub struct PathResolver {
    cache: BoundedCache,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(PATH_CACHE_SLOTS)
    }
}

impl PathResolver {
    pub fn new(slots: usize) -> Self {
        Self {
            cache: BoundedCache::new(slots),
        }
    }

    /// Cache tag for an entry; the generation keeps reused slots apart.
    fn tag(tree: &EntryTree, index: EntryIndex) -> u64 {
        (u64::from(tree.arena().generation(index)) << 32) | index.get() as u64
    }

    /// Returns the full path of `index`.
    ///
    /// The path stays borrowed from the resolver, so it is only valid until
    /// the next call.
    pub fn resolve(&mut self, tree: &mut EntryTree, index: EntryIndex) -> Result<&Path> {
        let tag = Self::tag(tree, index);
        let remembered = tree.try_entry(index)?.cache_slot;

        let hit = remembered
            .checked_sub(1)
            .map(|slot| slot as usize)
            .filter(|&slot| {
                self.cache
                    .slot(slot)
                    .is_some_and(|cached| cached.id() == tag && !cached.is_empty())
            });

        let slot = match hit {
            Some(slot) => self.cache.set_active(slot),
            None => {
                let len = path_len(tree, index)?;
                let buffer = self.cache.entry_set(tag, None, len, false)?;
                fill_path(tree, index, &mut buffer[..len])?;
                self.cache.lru()
            }
        };
        tree.try_entry_mut(index)?.cache_slot = slot as u32 + 1;

        let bytes = self
            .cache
            .slot(slot)
            .map(|cached| cached.as_bytes())
            .unwrap_or_default();
        Ok(Path::new(OsStr::from_bytes(bytes)))
    }

    /// Like [`resolve`](Self::resolve), but returns an owned path.
    pub fn resolve_owned(&mut self, tree: &mut EntryTree, index: EntryIndex) -> Result<PathBuf> {
        self.resolve(tree, index).map(Path::to_path_buf)
    }

    /// Number of paths currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// True if a child of `index` needs a `/` between the parent path and its
/// name. Only a root named like `/` already ends in one.
fn needs_separator(tree: &EntryTree, index: EntryIndex) -> bool {
    !tree.name(index).ends_with(b"/")
}

/// Length of the full path of `index`, caching it on every entry on the way.
fn path_len(tree: &mut EntryTree, index: EntryIndex) -> Result<usize> {
    // Walk up until an ancestor with a known length (or the root).
    let mut chain = Vec::new();
    let mut current = Some(index);
    let mut base = 0usize;
    while let Some(at) = current {
        let entry = tree.try_entry(at)?;
        if entry.path_len != 0 {
            base = entry.path_len as usize;
            break;
        }
        chain.push(at);
        current = entry.parent();
    }

    let mut len = base;
    let mut parent = current;
    for &at in chain.iter().rev() {
        let name_len = tree.name(at).len();
        len = match parent {
            Some(parent) if needs_separator(tree, parent) => len + 1 + name_len,
            Some(_) => len + name_len,
            None => name_len,
        };
        let stored = u32::try_from(len).map_err(|_| {
            TreeStateError::Structural(format!("path of entry {} is too long", at.get()))
        })?;
        tree.try_entry_mut(at)?.path_len = stored;
        parent = Some(at);
    }
    Ok(len)
}

/// Writes the path of `index` into `buffer`, from the end backwards.
fn fill_path(tree: &EntryTree, index: EntryIndex, buffer: &mut [u8]) -> Result<()> {
    let mut end = buffer.len();
    let mut current = index;
    loop {
        let name = tree.name(current);
        let start = end.checked_sub(name.len()).ok_or_else(|| mismatch(index))?;
        buffer[start..end].copy_from_slice(name);
        end = start;

        let Some(parent) = tree.try_entry(current)?.parent() else {
            break;
        };
        if needs_separator(tree, parent) {
            end = end.checked_sub(1).ok_or_else(|| mismatch(index))?;
            buffer[end] = b'/';
        }
        current = parent;
    }
    if end != 0 {
        return Err(mismatch(index));
    }
    Ok(())
}

fn mismatch(index: EntryIndex) -> TreeStateError {
    TreeStateError::Structural(format!("cached path length of entry {} is stale", index.get()))
}
