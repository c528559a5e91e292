//! Tracker configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeStateError};

/// Tunables for caches, enumeration and copy detection.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Slots in the path-building cache.
    pub path_cache_slots: usize,
    /// Slots in each uid/gid to name cache.
    pub owner_cache_slots: usize,
    /// Slots in each name to uid/gid cache.
    pub owner_hash_slots: usize,
    /// Most candidates kept per match-table key; the rest only count toward
    /// overflow.
    pub candidate_bucket_max: usize,
    /// Most distinct directories considered for directory similarity.
    pub similar_dir_scan_max: usize,
    /// Most similar directories reported per new directory.
    pub similar_dir_keep: usize,
    /// Match new files by content digest.
    pub digest_matching: bool,
    /// Build the by-name child view during enumeration.
    pub build_by_name: bool,
    /// Settle "likely changed" files by comparing content digests on refresh.
    pub verify_likely_with_digest: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path_cache_slots: 48,
            owner_cache_slots: 8,
            owner_hash_slots: 64,
            candidate_bucket_max: 9,
            similar_dir_scan_max: 256,
            similar_dir_keep: 8,
            digest_matching: true,
            build_by_name: false,
            verify_likely_with_digest: true,
        }
    }
}

impl TrackerConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| TreeStateError::Config(format!("invalid tracker config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects sizes that would make a cache or table useless.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("path_cache_slots", self.path_cache_slots),
            ("owner_cache_slots", self.owner_cache_slots),
            ("owner_hash_slots", self.owner_hash_slots),
            ("candidate_bucket_max", self.candidate_bucket_max),
            ("similar_dir_scan_max", self.similar_dir_scan_max),
        ];
        match sizes.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(TreeStateError::Config(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }

    pub fn with_path_cache_slots(mut self, slots: usize) -> Self {
        self.path_cache_slots = slots;
        self
    }

    pub fn with_candidate_bucket_max(mut self, max: usize) -> Self {
        self.candidate_bucket_max = max;
        self
    }

    pub fn with_similar_dir_keep(mut self, keep: usize) -> Self {
        self.similar_dir_keep = keep;
        self
    }

    pub fn with_digest_matching(mut self, enabled: bool) -> Self {
        self.digest_matching = enabled;
        self
    }

    pub fn with_build_by_name(mut self, enabled: bool) -> Self {
        self.build_by_name = enabled;
        self
    }

    pub fn with_verify_likely(mut self, enabled: bool) -> Self {
        self.verify_likely_with_digest = enabled;
        self
    }
}
