//! Small fixed-slot LRU cache of byte buffers.
//!
//! A `BoundedCache` hands out buffers addressed by an opaque 64-bit id. A
//! buffer stays available until enough other ids have been touched to push it
//! out; the ring never grows beyond its configured slot count. Lookups are a
//! linear scan, which is faster than hashing for the 4 to 64 slots the callers
//! use.
//!
//! Slots are kept in recency order around `lru` (the most recently used
//! index); `lru + 1` (wrapping) is always the eviction victim once the ring is
//! full.

use crate::error::{Result, TreeStateError};

/// Default slot count for small lookup caches.
pub const DEFAULT_SLOTS: usize = 4;

/// Extra bytes added when a slot buffer is reallocated.
const SLOT_SLACK: usize = 96;

/// A slot buffer that shrinks by more than this many bytes is reallocated.
const SHRINK_THRESHOLD: usize = 1024;

// ---------------------------------------------------------------------------
// CacheSlot
// ---------------------------------------------------------------------------

/// One cache buffer with its identity tag and an auxiliary value.
///
/// The backing allocation is reused across `set` calls unless it is too small
/// or would waste more than [`SHRINK_THRESHOLD`] bytes. The byte after the
/// logical data is always a NUL terminator.
#[derive(Debug, Clone, Default)]
pub struct CacheSlot {
    id: u64,
    hash_data: u64,
    len: usize,
    data: Vec<u8>,
}

impl CacheSlot {
    /// Creates an empty, unallocated slot.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Auxiliary value stored next to the buffer (used by the hash view).
    #[inline]
    pub fn hash_data(&self) -> u64 {
        self.hash_data
    }

    #[inline]
    pub fn set_hash_data(&mut self, value: u64) {
        self.hash_data = value;
    }

    /// Logical data length, not counting the terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes currently allocated for this slot.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.data.len()
    }

    /// The logical data.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The logical data followed by its NUL terminator.
    #[inline]
    pub fn with_terminator(&self) -> &[u8] {
        if self.data.is_empty() {
            return &[];
        }
        &self.data[..=self.len]
    }

    /// Resizes the slot to `len` bytes and optionally copies `data` in.
    ///
    /// With `keep_old`, the previous contents survive a reallocation (up to the
    /// new length). Returns the writable buffer including the terminator byte.
    pub fn set(&mut self, data: Option<&[u8]>, len: usize, keep_old: bool) -> Result<&mut [u8]> {
        let needed = len
            .checked_add(1)
            .ok_or_else(|| TreeStateError::OutOfMemory(format!("slot of {len} bytes")))?;
        let allocated = self.data.len();

        if allocated < needed || allocated - needed > SHRINK_THRESHOLD {
            let size = round_allocation(needed);
            let mut fresh = Vec::new();
            fresh.try_reserve_exact(size)?;
            if keep_old {
                let keep = self.len.min(len);
                fresh.extend_from_slice(&self.data[..keep]);
            }
            fresh.resize(size, 0);
            self.data = fresh;
        }

        if let Some(bytes) = data {
            let copy = bytes.len().min(len);
            self.data[..copy].copy_from_slice(&bytes[..copy]);
        }
        self.data[len] = 0;
        self.len = len;
        Ok(&mut self.data[..needed])
    }

    /// Appends bytes, keeping the current contents.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.len;
        let buffer = self.set(None, start + bytes.len(), true)?;
        buffer[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Forgets the logical contents but keeps the allocation.
    pub fn truncate(&mut self) {
        self.len = 0;
        if let Some(first) = self.data.first_mut() {
            *first = 0;
        }
    }
}

fn round_allocation(needed: usize) -> usize {
    (needed + SLOT_SLACK + 31) & !31
}

// ---------------------------------------------------------------------------
// BoundedCache
// ---------------------------------------------------------------------------

/// Fixed-capacity LRU ring of [`CacheSlot`]s.
#[derive(Debug, Clone)]
pub struct BoundedCache {
    slots: Vec<CacheSlot>,
    max: usize,
    lru: usize,
}

impl Default for BoundedCache {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl BoundedCache {
    /// Creates a cache with `max` slots (at least one).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            slots: Vec::with_capacity(max),
            max,
            lru: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the most recently used slot.
    #[inline]
    pub fn lru(&self) -> usize {
        self.lru
    }

    /// Returns the slot at `index`, if it has been used.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&CacheSlot> {
        self.slots.get(index)
    }

    /// Picks the slot index for a new entry and makes it most recently used.
    fn take_slot(&mut self, id: u64) -> usize {
        let index = if self.slots.len() < self.max {
            self.slots.push(CacheSlot::new());
            self.slots.len() - 1
        } else {
            (self.lru + 1) % self.max
        };
        self.lru = index;
        let slot = &mut self.slots[index];
        slot.id = id;
        slot.hash_data = 0;
        index
    }

    /// Inserts `data` under `id` as most recently used, evicting the oldest
    /// slot when the ring is full.
    ///
    /// Returns the stored bytes plus their NUL terminator.
    pub fn add(&mut self, id: u64, data: &[u8]) -> Result<&mut [u8]> {
        let index = self.take_slot(id);
        self.slots[index].set(Some(data), data.len(), false)
    }

    /// Returns the slot index holding `id`.
    pub fn position(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    /// Looks up `id`; the returned slice includes the terminator byte.
    ///
    /// This does not change the recency order; use [`set_active`] for that.
    ///
    /// [`set_active`]: BoundedCache::set_active
    pub fn find(&self, id: u64) -> Option<&[u8]> {
        self.position(id).map(|index| self.slots[index].with_terminator())
    }

    /// Makes the slot at `index` the most recently used one.
    ///
    /// Slots between the old and new position shift by one so the ring stays in
    /// recency order. Returns the new index of the promoted slot.
    pub fn set_active(&mut self, index: usize) -> usize {
        if index >= self.slots.len() || index == self.lru {
            return self.lru;
        }
        if index < self.lru {
            self.slots[index..=self.lru].rotate_left(1);
        } else {
            self.lru += 1;
            self.slots[self.lru..=index].rotate_right(1);
        }
        self.lru
    }

    /// Stores `len` bytes under `id`, reusing the slot that already has this id.
    ///
    /// The slot becomes most recently used. When `data` is `None` the buffer is
    /// only resized; `keep_old` preserves the previous bytes across a resize.
    pub fn entry_set(
        &mut self,
        id: u64,
        data: Option<&[u8]>,
        len: usize,
        keep_old: bool,
    ) -> Result<&mut [u8]> {
        let index = match self.position(id) {
            Some(index) => self.set_active(index),
            None => self.take_slot(id),
        };
        self.slots[index].set(data, len, keep_old)
    }

    /// Drops every slot.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.lru = 0;
    }

    // -----------------------------------------------------------------------
    // String-keyed view
    // -----------------------------------------------------------------------

    /// Looks up the value stored for `key` by [`hash_add`].
    ///
    /// [`hash_add`]: BoundedCache::hash_add
    pub fn hash_find(&self, key: &[u8]) -> Option<u64> {
        let id = string_key(key);
        self.slots
            .iter()
            .find(|slot| slot.id == id && slot.as_bytes() == key)
            .map(|slot| slot.hash_data)
    }

    /// Associates `value` with `key`, replacing an earlier value for the same
    /// key.
    pub fn hash_add(&mut self, key: &[u8], value: u64) -> Result<()> {
        let id = string_key(key);
        let existing = self
            .slots
            .iter()
            .position(|slot| slot.id == id && slot.as_bytes() == key);
        let index = match existing {
            Some(index) => self.set_active(index),
            None => {
                let index = self.take_slot(id);
                self.slots[index].set(Some(key), key.len(), false)?;
                index
            }
        };
        self.slots[index].hash_data = value;
        Ok(())
    }
}

/// Packs the first six bytes of `key` into 5-bit groups.
///
/// Keys sharing the same prefix collide; lookups compare the full key.
pub fn string_key(key: &[u8]) -> u64 {
    key.iter()
        .take(6)
        .fold(0u64, |acc, &byte| (acc << 5) | u64::from(byte.wrapping_sub(0x20) & 0x1f))
}
