//! Local state tracking for a versioned file tree.
//!
//! This crate provides the pieces a synchronization client needs to find
//! what changed in a large directory tree since it was last recorded:
//! - Arena storage for per-entry records with run-coalescing free list
//! - Bulk directory enumeration with few system calls
//! - A small bounded LRU cache, used for paths and owner names
//! - Change classification and copy/rename source detection
//! - Entry-list persistence

pub mod cache;
pub mod classify;
pub mod config;
pub mod detect;
pub mod digest;
pub mod enumerate;
pub mod error;
pub mod owners;
pub mod persist;
pub mod policy;
pub mod storage;
pub mod tracker;
pub mod tree;

// Re-export main types
pub use cache::{BoundedCache, CacheSlot};
pub use classify::classify;
pub use config::TrackerConfig;
pub use detect::{CandidateList, CopyDetector, MatchCandidate, MatchCriteria};
pub use digest::ContentDigest;
pub use enumerate::DirectoryEnumerator;
pub use error::{Result, TreeStateError};
pub use policy::{ExclusionPolicy, NoExclusions};
pub use storage::{
    ChangeMask, Entry, EntryArena, EntryFlags, EntryIndex, EntryKind, EntryMetadata,
};
pub use tracker::Tracker;
pub use tree::{Correlation, EntryTree, PathResolver};
