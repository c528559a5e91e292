//! Interning pool for entry leaf names.
//!
//! Names are raw bytes (filesystem names need not be UTF-8). Each distinct
//! name is stored once in a shared buffer and referred to by a `NameId`, so
//! the thousands of `Makefile`s and `.gitignore`s in a large tree cost one
//! copy each, and name equality is an integer comparison.

use std::hash::Hasher;

use fnv::{FnvHashMap, FnvHasher};
use thin_vec::ThinVec;

/// Handle to an interned name. `NameId::default()` is the empty name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct NameId(u32);

impl NameId {
    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Owned pool of interned names.
#[derive(Debug)]
pub struct NamePool {
    bytes: Vec<u8>,
    /// (start, len) of each name in `bytes`.
    spans: Vec<(u32, u32)>,
    /// Name hash to the ids sharing it.
    lookup: FnvHashMap<u64, ThinVec<NameId>>,
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NamePool {
    /// Creates a pool holding only the empty name.
    pub fn new() -> Self {
        let mut pool = Self {
            bytes: Vec::new(),
            spans: Vec::new(),
            lookup: FnvHashMap::default(),
        };
        pool.spans.push((0, 0));
        pool.lookup
            .insert(hash_name(b""), ThinVec::from_iter([NameId(0)]));
        pool
    }

    /// Interns `name`, returning the id of the existing copy if there is one.
    pub fn intern(&mut self, name: &[u8]) -> NameId {
        let hash = hash_name(name);
        if let Some(ids) = self.lookup.get(&hash) {
            if let Some(&id) = ids.iter().find(|&&id| self.get(id) == name) {
                return id;
            }
        }

        let id = NameId(self.spans.len() as u32);
        self.spans.push((self.bytes.len() as u32, name.len() as u32));
        self.bytes.extend_from_slice(name);
        self.lookup.entry(hash).or_default().push(id);
        id
    }

    /// Looks up `name` without interning it.
    pub fn find(&self, name: &[u8]) -> Option<NameId> {
        self.lookup
            .get(&hash_name(name))?
            .iter()
            .copied()
            .find(|&id| self.get(id) == name)
    }

    /// Returns the bytes of an interned name.
    ///
    /// Unknown ids resolve to the empty name.
    pub fn get(&self, id: NameId) -> &[u8] {
        match self.spans.get(id.get()) {
            Some(&(start, len)) => &self.bytes[start as usize..(start + len) as usize],
            None => &[],
        }
    }

    /// Number of distinct names, including the empty one.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.len() <= 1
    }
}

fn hash_name(name: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_basic() {
        let mut pool = NamePool::new();
        let id = pool.intern(b"hello");
        assert_eq!(pool.get(id), b"hello");
    }

    #[test]
    fn intern_deduplication() {
        let mut pool = NamePool::new();
        let first = pool.intern(b"Makefile");
        let second = pool.intern(b"Makefile");
        assert_eq!(first, second);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn empty_name_is_default_id() {
        let mut pool = NamePool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.intern(b""), NameId::default());
        assert_eq!(pool.get(NameId::default()), b"");
    }

    #[test]
    fn non_utf8_names_survive() {
        let mut pool = NamePool::new();
        let id = pool.intern(&[0xff, 0xfe, b'a']);
        assert_eq!(pool.get(id), &[0xff, 0xfe, b'a']);
        assert_eq!(pool.find(&[0xff, 0xfe, b'a']), Some(id));
        assert_eq!(pool.find(b"missing"), None);
    }
}
