// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::error::Result;

/// Number of bits of an [`crate::id_allocator::ObjectId`] reserved for its
/// refcount. See `meta_word` layout in `id_allocator.rs`.
pub const REFCOUNT_BITS: u32 = 12;

/// Options for an arbtrie store.
///
/// Mirrors the teacher's `Config` builder: a chainable struct with
/// `#[must_use]` setters and sensible defaults, with an explicit `.open()`
/// that performs (or skips, on a fresh store) recovery.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) path: PathBuf,

    /// Size of a single segment in bytes. Default 256 MiB (`2^28`).
    pub(crate) segment_size: u32,

    /// Maximum number of segments the free-segment ring can track.
    pub(crate) max_segment_count: u32,

    /// Number of concurrent read/write sessions (slots for read pointers).
    pub(crate) max_session_count: u16,

    /// Largest representable refcount before `retain` reports an error.
    pub(crate) max_ref_count: u32,

    /// Branch count at which a `setlist` inner node refactors into a `full` node.
    pub(crate) full_node_threshold: u16,

    /// Initial allocation size, in bytes, of a fresh binary bucket.
    pub(crate) binary_node_initial_size: u32,

    /// Initial spare entry capacity of a fresh binary bucket.
    pub(crate) binary_node_initial_branch_cap: u16,

    /// Number of slots in the top-root registry.
    pub(crate) num_top_roots: u16,

    /// Maximum key length in bytes. Default ~1 KiB, per spec.
    pub(crate) max_key_size: u32,

    /// Minimum empty ratio (free_bytes / segment_size) a segment must reach
    /// before the compactor will consider evacuating it.
    pub(crate) compaction_min_emptiness: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".arbtrie.data"),
            segment_size: 1 << 28,
            max_segment_count: 1 << 16,
            max_session_count: 64,
            max_ref_count: (1 << REFCOUNT_BITS) - 1,
            full_node_threshold: 129,
            binary_node_initial_size: 4096,
            binary_node_initial_branch_cap: 16,
            num_top_roots: 64,
            max_key_size: 1024,
            compaction_min_emptiness: 0.25,
        }
    }
}

impl Config {
    /// Creates a config rooted at `path`, using all other defaults.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Sets the segment size in bytes.
    ///
    /// Defaults to 256 MiB. Must be a multiple of 8 and large enough to hold
    /// at least one maximally sized node.
    #[must_use]
    pub fn segment_size(mut self, bytes: u32) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Sets the maximum number of segments the free-segment ring can track.
    #[must_use]
    pub fn max_segment_count(mut self, count: u32) -> Self {
        self.max_segment_count = count;
        self
    }

    /// Sets the number of concurrent session slots.
    ///
    /// Defaults to 64. Exceeding this limit at runtime surfaces
    /// [`crate::Error::SessionsExhausted`].
    #[must_use]
    pub fn max_session_count(mut self, count: u16) -> Self {
        self.max_session_count = count;
        self
    }

    /// Sets the branch count at which a setlist refactors into a full node.
    #[must_use]
    pub fn full_node_threshold(mut self, threshold: u16) -> Self {
        self.full_node_threshold = threshold;
        self
    }

    /// Sets the number of top-root registry slots.
    #[must_use]
    pub fn num_top_roots(mut self, count: u16) -> Self {
        self.num_top_roots = count;
        self
    }

    /// Sets the maximum accepted key length in bytes.
    #[must_use]
    pub fn max_key_size(mut self, bytes: u32) -> Self {
        self.max_key_size = bytes;
        self
    }

    /// Sets the emptiness ratio above which the compactor will pick a segment.
    #[must_use]
    pub fn compaction_min_emptiness(mut self, ratio: f32) -> Self {
        self.compaction_min_emptiness = ratio;
        self
    }

    /// Opens (creating if necessary) the store described by this config.
    pub fn open(self) -> Result<Database> {
        Database::open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn new_applies_defaults_to_every_field_but_path() {
        let config = Config::new("/tmp/wherever");
        let default = Config::default();
        assert_eq!(config.segment_size, default.segment_size);
        assert_eq!(config.max_segment_count, default.max_segment_count);
        assert_eq!(config.num_top_roots, default.num_top_roots);
    }

    #[test]
    fn builder_methods_override_only_the_field_they_name() {
        let config = Config::new("/tmp/wherever").segment_size(8192).max_key_size(64);
        assert_eq!(config.segment_size, 8192);
        assert_eq!(config.max_key_size, 64);
        assert_eq!(config.max_session_count, Config::default().max_session_count);
    }

    #[test]
    fn open_creates_a_fresh_store_at_the_configured_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Config::new(dir.path()).segment_size(1 << 20).open().expect("open");
        assert_eq!(db.last_recovery().roots_validated, 0);
        assert!(dir.path().join("db").exists());
    }
}
