// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The segment allocator (spec §4.B): fixed-size segments carved from the
//! [`crate::mapping::Mapping`], a per-writer append pointer per segment, and
//! a free-segment ring that readers bound via their session's read pointer.

#![allow(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::mapping::Mapping;

/// Header-reserved bytes at the start of every segment (object headers never
/// start before this offset).
pub const SEGMENT_HEADER_SIZE: u32 = 16;

/// Per-segment metadata (spec's `segment_meta`): how much of the segment is
/// free, how many objects were freed, and the writer's current append
/// position.
///
/// `alloc_pos` always reflects the real extent of written data, finalized or
/// not — finalization is tracked by the separate `full` flag rather than by
/// overwriting `alloc_pos` with a sentinel, so the compactor's header scan
/// always knows exactly where to stop.
pub struct SegmentMeta {
    alloc_pos: AtomicU32,
    full: AtomicBool,
    age: AtomicU32,
    num_objects: AtomicU32,
    free_bytes: AtomicU32,
    free_objects: AtomicU32,
    last_sync_pos: AtomicU32,
}

impl SegmentMeta {
    fn fresh(age: u32) -> Self {
        Self {
            alloc_pos: AtomicU32::new(SEGMENT_HEADER_SIZE),
            full: AtomicBool::new(false),
            age: AtomicU32::new(age),
            num_objects: AtomicU32::new(0),
            free_bytes: AtomicU32::new(0),
            free_objects: AtomicU32::new(0),
            last_sync_pos: AtomicU32::new(0),
        }
    }

    fn reset(&self, age: u32) {
        self.alloc_pos.store(SEGMENT_HEADER_SIZE, Ordering::Release);
        self.full.store(false, Ordering::Release);
        self.age.store(age, Ordering::Relaxed);
        self.num_objects.store(0, Ordering::Relaxed);
        self.free_bytes.store(0, Ordering::Relaxed);
        self.free_objects.store(0, Ordering::Relaxed);
        self.last_sync_pos.store(0, Ordering::Relaxed);
    }

    /// Free bytes currently recorded for this segment.
    pub fn free_bytes(&self) -> u32 {
        self.free_bytes.load(Ordering::Acquire)
    }

    /// Whether the writer has finalized this segment.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// The segment's allocation generation, used to order segments oldest
    /// first during crash recovery.
    pub fn age(&self) -> u32 {
        self.age.load(Ordering::Relaxed)
    }

    /// The extent of written data in this segment, finalized or not.
    pub fn alloc_pos(&self) -> u32 {
        self.alloc_pos.load(Ordering::Acquire)
    }
}

/// A free-segment entry tagged with the release epoch it was posted at.
struct FreeSegment {
    segment_no: u32,
    released_at: u64,
}

/// Allocates segments and tracks their reuse (spec §4.B).
pub struct SegmentAllocator {
    mapping: Arc<Mapping>,
    segment_size: u32,
    max_segment_count: u32,
    metas: RwLock<Vec<Box<SegmentMeta>>>,
    free_queue: Mutex<VecDeque<FreeSegment>>,
    /// `E`: monotonically increasing counter of segment releases.
    release_epoch: AtomicU64,
    next_age: AtomicU32,
}

impl SegmentAllocator {
    pub(crate) fn new(mapping: Arc<Mapping>, segment_size: u32, max_segment_count: u32) -> Self {
        let existing = mapping.segment_count();
        let mut metas = Vec::with_capacity(existing as usize);
        for age in 0..existing {
            // Pre-existing segments are sealed: on reopen, writers always
            // resume onto a fresh segment rather than a partially filled one
            // from a prior process, so there is no "active writer" segment to
            // special-case here. `alloc_pos` starts at the header-only
            // default; recovery corrects it for every existing segment once
            // it scans each one's headers to find where real data ends.
            let meta = SegmentMeta::fresh(age);
            meta.full.store(true, Ordering::Relaxed);
            metas.push(Box::new(meta));
        }
        Self {
            mapping,
            segment_size,
            max_segment_count,
            metas: RwLock::new(metas),
            free_queue: Mutex::new(VecDeque::new()),
            release_epoch: AtomicU64::new(0),
            next_age: AtomicU32::new(existing),
        }
    }

    /// Current value of the release-epoch counter (`E`), captured by a
    /// session acquiring its read lock (spec §4.D).
    pub fn current_epoch(&self) -> u64 {
        self.release_epoch.load(Ordering::Acquire)
    }

    fn meta(&self, segment_no: u32) -> &SegmentMeta {
        let metas = self.metas.read().expect("segment allocator lock poisoned");
        let meta_ref: &SegmentMeta = &metas[segment_no as usize];
        // SAFETY: metas are boxed and never removed or replaced, so their
        // address is stable even if the outer `Vec` reallocates.
        unsafe { &*(std::ptr::from_ref(meta_ref)) }
    }

    /// Returns `meta`'s handle for diagnostics / testing (spec invariants §8).
    pub fn segment_meta(&self, segment_no: u32) -> &SegmentMeta {
        self.meta(segment_no)
    }

    pub fn segment_count(&self) -> u32 {
        self.metas.read().expect("segment allocator lock poisoned").len() as u32
    }

    /// Returns a segment number ready for a writer to append into: a
    /// recycled segment if one's release epoch is older than every active
    /// session's read pointer, otherwise a freshly mapped segment.
    pub fn get_new_segment(&self, min_active_epoch: u64) -> Result<u32> {
        {
            let mut queue = self.free_queue.lock().expect("segment allocator lock poisoned");
            if let Some(front) = queue.front() {
                if front.released_at < min_active_epoch {
                    let entry = queue.pop_front().expect("front already checked");
                    let age = self.next_age.fetch_add(1, Ordering::Relaxed);
                    self.meta(entry.segment_no).reset(age);
                    return Ok(entry.segment_no);
                }
            }
        }

        if self.segment_count() >= self.max_segment_count {
            return Err(Error::MappingExhausted);
        }
        let segment_no = self.mapping.grow()?;
        let age = self.next_age.fetch_add(1, Ordering::Relaxed);
        let mut metas = self.metas.write().expect("segment allocator lock poisoned");
        debug_assert_eq!(segment_no as usize, metas.len());
        metas.push(Box::new(SegmentMeta::fresh(age)));
        Ok(segment_no)
    }

    /// Reserves `size` bytes (already rounded to 8-byte alignment) in
    /// `segment_no`'s append region. Returns `None` if the segment doesn't
    /// have room; the caller must then [`Self::finalize`] it and request a
    /// new one.
    pub fn try_alloc(&self, segment_no: u32, size: u32) -> Option<u32> {
        debug_assert_eq!(size % 8, 0);
        let meta = self.meta(segment_no);
        if meta.is_full() {
            return None;
        }
        let mut current = meta.alloc_pos.load(Ordering::Relaxed);
        loop {
            let new_pos = current.checked_add(size)?;
            if new_pos > self.segment_size {
                return None;
            }
            match meta.alloc_pos.compare_exchange_weak(
                current,
                new_pos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    meta.num_objects.fetch_add(1, Ordering::Relaxed);
                    return Some(current);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks `segment_no` as no longer eligible for further appends. Called
    /// once its remaining space is smaller than the minimum object header.
    pub fn finalize(&self, segment_no: u32) {
        self.meta(segment_no).full.store(true, Ordering::Release);
    }

    /// Posts `segment_no` to the free-segment ring (called by the compactor
    /// after evacuation completes).
    pub fn release(&self, segment_no: u32) {
        let epoch = self.release_epoch.fetch_add(1, Ordering::AcqRel);
        self.free_queue
            .lock()
            .expect("segment allocator lock poisoned")
            .push_back(FreeSegment { segment_no, released_at: epoch });
        self.mapping.advise_dont_need(segment_no);
        log::debug!("segment {segment_no} released at epoch {epoch}");
    }

    /// Records that `size` bytes (one object) were freed from `segment_no`.
    pub fn free_object(&self, segment_no: u32, size: u32) {
        let meta = self.meta(segment_no);
        meta.free_bytes.fetch_add(size, Ordering::Relaxed);
        meta.free_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that `size` bytes were freed from `segment_no` without
    /// attributing it to a whole object (e.g. a relocation's source bytes).
    pub fn free(&self, segment_no: u32, size: u32) {
        self.meta(segment_no).free_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Re-seats `segment_no`'s write cursor to `pos` and marks it open for
    /// further appends again. Used only by recovery, once a header scan has
    /// found where a segment's persisted data actually ends (spec §6).
    pub(crate) fn restore_alloc_pos(&self, segment_no: u32, pos: u32) {
        self.meta(segment_no).alloc_pos.store(pos, Ordering::Release);
    }

    /// Emptiest segment whose `free_bytes / segment_size` exceeds
    /// `min_emptiness`, excluding `exclude` (typically the writer's own
    /// active segment). Used by the compactor (spec §4.G step 1).
    pub fn emptiest_segment(&self, min_emptiness: f32, exclude: Option<u32>) -> Option<u32> {
        let metas = self.metas.read().expect("segment allocator lock poisoned");
        metas
            .iter()
            .enumerate()
            .filter(|(no, meta)| {
                meta.is_full() && Some(*no as u32) != exclude
            })
            .map(|(no, meta)| (no as u32, meta.free_bytes() as f32 / self.segment_size as f32))
            .filter(|(_, ratio)| *ratio > min_emptiness)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(no, _)| no)
    }
}
