//! Change classification of one entry.
//!
//! Compares a recorded metadata snapshot with a freshly observed one and
//! reports the difference as a [`ChangeMask`]. Content is never read here; a
//! file whose size is unchanged but whose timestamps moved is only `LIKELY`
//! changed and the caller decides whether a digest comparison is worth it.

use crate::storage::{ChangeMask, EntryKind, EntryMetadata};

/// Classifies how `fresh` differs from `recorded`.
pub fn classify(recorded: &EntryMetadata, fresh: &EntryMetadata) -> ChangeMask {
    let mut mask = ChangeMask::empty();

    if recorded.mtime != fresh.mtime {
        mask |= ChangeMask::META_MTIME;
    }
    if recorded.uid != fresh.uid {
        mask |= ChangeMask::META_OWNER;
    }
    if recorded.gid != fresh.gid {
        mask |= ChangeMask::META_GROUP;
    }
    if recorded.permissions() != fresh.permissions() {
        mask |= ChangeMask::META_UMODE;
    }

    let kind = recorded.kind();
    if kind != fresh.kind() {
        return mask | ChangeMask::REPLACED;
    }

    let timestamps_moved = recorded.mtime != fresh.mtime || recorded.ctime != fresh.ctime;
    match kind {
        EntryKind::CharDevice | EntryKind::BlockDevice => {
            if recorded.rdev != fresh.rdev {
                mask |= ChangeMask::REPLACED;
            }
        }
        EntryKind::File | EntryKind::Symlink => {
            if recorded.size != fresh.size {
                mask |= ChangeMask::CHANGED;
            } else if timestamps_moved {
                mask |= ChangeMask::LIKELY;
            }
        }
        EntryKind::Dir => {
            if timestamps_moved {
                mask |= ChangeMask::LIKELY;
            }
        }
        EntryKind::Fifo | EntryKind::Socket | EntryKind::Unknown => {}
    }
    mask
}
