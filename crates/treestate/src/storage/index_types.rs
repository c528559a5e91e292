//! Arena index types.

/// A compact 32-bit index into the entry arena.
///
/// The u32::MAX value is reserved for `OptionEntryIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntryIndex(u32);

impl EntryIndex {
    /// Largest number of slots an arena can address.
    pub const MAX_SLOTS: usize = u32::MAX as usize;

    /// Creates a new EntryIndex from a usize.
    ///
    /// # Panics
    /// Panics if `index >= u32::MAX` (reserved for the None sentinel).
    #[inline]
    pub fn new(index: usize) -> Self {
        assert!(
            index < Self::MAX_SLOTS,
            "entry index must be less than u32::MAX"
        );
        Self(index as u32)
    }

    /// Returns the index as a usize.
    #[inline]
    pub fn get(&self) -> usize {
        self.0 as usize
    }

    /// Returns the index `offset` slots further on.
    #[inline]
    pub fn offset(self, offset: usize) -> Self {
        Self::new(self.get() + offset)
    }
}

/// An optional entry index using u32::MAX as the None sentinel.
///
/// Fits in 4 bytes instead of the 8 an `Option<EntryIndex>` would take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct OptionEntryIndex(u32);

impl OptionEntryIndex {
    #[inline]
    pub fn none() -> Self {
        Self(u32::MAX)
    }

    #[inline]
    pub fn some(index: EntryIndex) -> Self {
        Self(index.0)
    }

    #[inline]
    pub fn from_option(index: Option<EntryIndex>) -> Self {
        index.map_or(Self::none(), Self::some)
    }

    #[inline]
    pub fn to_option(self) -> Option<EntryIndex> {
        if self.0 == u32::MAX {
            None
        } else {
            Some(EntryIndex(self.0))
        }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for OptionEntryIndex {
    fn default() -> Self {
        Self::none()
    }
}
