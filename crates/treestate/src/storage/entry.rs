//! Per-object entry record.

use bitflags::bitflags;
use thin_vec::ThinVec;

use super::index_types::{EntryIndex, OptionEntryIndex};
use super::metadata::{EntryKind, EntryMetadata};
use super::namepool::NameId;
use crate::digest::ContentDigest;

bitflags! {
    /// How an entry differs from its recorded state in the current run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeMask: u32 {
        const NEW = 1 << 0;
        const REMOVED = 1 << 1;
        const CHANGED = 1 << 2;
        const LIKELY = 1 << 3;
        const PROPERTIES = 1 << 4;
        const META_MTIME = 1 << 5;
        const META_OWNER = 1 << 6;
        const META_GROUP = 1 << 7;
        const META_UMODE = 1 << 8;
        const CHILD_CHANGED = 1 << 9;

        /// Object was replaced by one of another type.
        const REPLACED = Self::NEW.bits() | Self::REMOVED.bits();
        const META = Self::META_MTIME.bits()
            | Self::META_OWNER.bits()
            | Self::META_GROUP.bits()
            | Self::META_UMODE.bits();
    }
}

impl ChangeMask {
    /// True if the object was replaced by one of a different type.
    #[inline]
    pub fn is_replaced(self) -> bool {
        self.contains(Self::REPLACED)
    }

    /// True for a new entry that did not replace anything.
    #[inline]
    pub fn is_new(self) -> bool {
        self.contains(Self::NEW) && !self.contains(Self::REMOVED)
    }

    /// True for a removed entry that was not replaced.
    #[inline]
    pub fn is_removed(self) -> bool {
        self.contains(Self::REMOVED) && !self.contains(Self::NEW)
    }

    /// Settles a `LIKELY` verdict once content digests have been compared.
    pub fn resolve_with_digest(self, digests_equal: bool) -> Self {
        if !self.contains(Self::LIKELY) {
            return self;
        }
        let settled = self - Self::LIKELY;
        if digests_equal {
            settled
        } else {
            settled | Self::CHANGED
        }
    }
}

bitflags! {
    /// Per-entry flags. The low bits are persisted; the high bits only live
    /// for one run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        const UNVERSION = 1 << 0;
        const ADD = 1 << 1;
        const CHECK = 1 << 2;
        const PUSH_PROPS = 1 << 3;
        const COPY_BASE = 1 << 4;
        const COPY_SUB = 1 << 5;
        const CONFLICT = 1 << 6;

        /// Created on demand; not yet seen on disk.
        const IS_NEW = 1 << 19;
        const PRINT = 1 << 20;
        /// Vanished between listing and `lstat`.
        const IGNORABLE = 1 << 21;

        const PERSISTED = (1 << 7) - 1;
    }
}

/// One filesystem object known to the tracker.
///
/// `Default` yields the zero-filled state the arena hands out: no parent, no
/// children, `cache_slot == 0` (never cached) and `path_len == 0` (unknown).
#[derive(Debug, Default)]
pub struct Entry {
    pub(crate) name: NameId,
    pub(crate) parent: OptionEntryIndex,
    /// Recorded (or freshly observed) metadata.
    pub meta: EntryMetadata,
    /// Content digest; only valid for regular files and symlinks.
    pub(crate) digest: Option<ContentDigest>,
    pub status: ChangeMask,
    pub flags: EntryFlags,
    /// Children ordered by (device, inode).
    pub(crate) by_inode: ThinVec<EntryIndex>,
    /// Children ordered by name bytes; only meaningful while `by_name_valid`.
    pub(crate) by_name: ThinVec<EntryIndex>,
    pub(crate) by_name_valid: bool,
    /// 1-based path cache slot, 0 if never cached.
    pub(crate) cache_slot: u32,
    pub(crate) path_len: u32,
    /// Shadow entry holding the previous recorded state.
    pub(crate) old: OptionEntryIndex,
    pub repos_rev: Option<u64>,
    pub url_ref: u32,
}

impl Entry {
    #[inline]
    pub fn name_id(&self) -> NameId {
        self.name
    }

    #[inline]
    pub fn parent(&self) -> Option<EntryIndex> {
        self.parent.to_option()
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.meta.kind()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.meta.is_dir()
    }

    /// Children in (device, inode) order.
    #[inline]
    pub fn children(&self) -> &[EntryIndex] {
        &self.by_inode
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.by_inode.len()
    }

    /// Children in name order, if that view is current.
    pub fn children_by_name(&self) -> Option<&[EntryIndex]> {
        self.by_name_valid.then_some(&self.by_name[..])
    }

    #[inline]
    pub fn digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    #[inline]
    pub fn cache_slot(&self) -> u32 {
        self.cache_slot
    }

    #[inline]
    pub fn old(&self) -> Option<EntryIndex> {
        self.old.to_option()
    }

    #[inline]
    pub fn is_ignorable(&self) -> bool {
        self.flags.contains(EntryFlags::IGNORABLE)
    }

    /// Invalidates the name view after the child set changed.
    #[inline]
    pub(crate) fn children_changed(&mut self) {
        self.by_name_valid = false;
        self.by_name.clear();
    }
}
