//! Storage layer for tracked entries.
//!
//! This module provides the low-level data storage primitives:
//! - Index-based arena allocator with run-coalescing free list
//! - Per-entry record with recorded metadata and child arrays
//! - Name interning pool for leaf names

mod arena;
mod entry;
mod index_types;
mod metadata;
mod namepool;

pub use arena::EntryArena;
pub use entry::{ChangeMask, Entry, EntryFlags};
pub use index_types::{EntryIndex, OptionEntryIndex};
pub use metadata::{dev_major, dev_minor, make_dev, EntryKind, EntryMetadata};
pub use namepool::{NameId, NamePool};
