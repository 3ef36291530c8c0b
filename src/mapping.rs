// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! File-backed, byte-addressable region that can grow without invalidating
//! addresses already handed out to readers (spec §4.A).
//!
//! Rather than growing one giant mapping in place (which would require
//! `mremap` and force every holder of an old base pointer to re-validate),
//! the arena is a sequence of independently mapped segment files under
//! `data/`. Growing the arena means mapping one more file; a pointer into an
//! already-mapped segment stays valid for the lifetime of the `Mapping`,
//! because segments are never unmapped or moved while the store is open.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use memmap2::MmapMut;

use crate::error::Result;

fn segment_file_path(data_dir: &Path, segment_no: u32) -> PathBuf {
    data_dir.join(format!("seg-{segment_no:08x}"))
}

/// One memory-mapped segment file.
struct MappedSegment {
    mmap: MmapMut,
}

/// The growable arena backing all segments.
pub struct Mapping {
    data_dir: PathBuf,
    segment_size: u32,
    segments: RwLock<Vec<Arc<MappedSegment>>>,
}

impl Mapping {
    /// Opens (creating `data_dir` if necessary) the arena. Pre-existing
    /// segment files are mapped in ascending order so segment numbers match
    /// their position in the returned `Mapping`.
    pub fn open(data_dir: &Path, segment_size: u32) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let mut existing: Vec<(u32, PathBuf)> = std::fs::read_dir(data_dir)?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let no = u32::from_str_radix(name.strip_prefix("seg-")?, 16).ok()?;
                Some((no, entry.path()))
            })
            .collect();
        existing.sort_by_key(|(no, _)| *no);

        let mapping = Self {
            data_dir: data_dir.to_path_buf(),
            segment_size,
            segments: RwLock::new(Vec::with_capacity(existing.len())),
        };

        for (no, path) in existing {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            mapping.map_existing(no, file)?;
        }

        Ok(mapping)
    }

    fn map_existing(&self, segment_no: u32, file: File) -> Result<()> {
        file.set_len(u64::from(self.segment_size))?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut segments = self.segments.write().expect("mapping lock poisoned");
        let expected = segments.len() as u32;
        debug_assert_eq!(segment_no, expected, "segment files must be contiguous");
        segments.push(Arc::new(MappedSegment { mmap }));
        Ok(())
    }

    /// Number of segments currently mapped.
    pub fn segment_count(&self) -> u32 {
        self.segments.read().expect("mapping lock poisoned").len() as u32
    }

    /// Maps a brand-new segment file, appending it to the arena, and returns
    /// its segment number.
    pub fn grow(&self) -> Result<u32> {
        let segment_no = self.segment_count();
        let path = segment_file_path(&self.data_dir, segment_no);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        self.map_existing(segment_no, file)?;
        log::debug!("mapping: grew arena to {} segments", segment_no + 1);
        Ok(segment_no)
    }

    fn segment(&self, segment_no: u32) -> Arc<MappedSegment> {
        self.segments
            .read()
            .expect("mapping lock poisoned")
            .get(segment_no as usize)
            .cloned()
            .expect("segment number out of range")
    }

    /// Returns an immutable view of a segment's bytes.
    ///
    /// Safe to call concurrently with writers: the only bytes a reader will
    /// ever look at are ones whose existence it learned about through a
    /// meta-word load (acquire), which happens-after the writer's append
    /// (release).
    pub fn segment_bytes(&self, segment_no: u32) -> &'static [u8] {
        let segment = self.segment(segment_no);
        // SAFETY: segments are never unmapped or truncated while the
        // `Mapping` is alive, and `Arc<MappedSegment>` keeps the backing
        // mmap alive independently of `self.segments`'s own storage, so this
        // slice remains valid for the life of the process even though we
        // assert a `'static` lifetime on it.
        unsafe {
            let ptr = segment.mmap.as_ptr();
            let len = segment.mmap.len();
            std::slice::from_raw_parts(ptr, len)
        }
    }

    /// Returns a mutable pointer to the start of a segment's bytes.
    ///
    /// Callers must be the segment's sole owning writer and must only write
    /// to offsets not yet visible to any reader (i.e. beyond the segment's
    /// published `alloc_pos`), per spec §4.B/§4.D.
    pub fn segment_bytes_mut(&self, segment_no: u32) -> *mut u8 {
        let segment = self.segment(segment_no);
        segment.mmap.as_ptr() as *mut u8
    }

    /// Flushes all mapped segments to disk. `async_flush` requests a
    /// best-effort flush that does not block for durability.
    pub fn sync(&self, async_flush: bool) -> Result<()> {
        let segments = self.segments.read().expect("mapping lock poisoned");
        for segment in segments.iter() {
            if async_flush {
                segment.mmap.flush_async()?;
            } else {
                segment.mmap.flush()?;
            }
        }
        Ok(())
    }

    /// Advises the OS that `segment_no` will be scanned sequentially
    /// (compactor) or is no longer needed (post-eviction). No-op unless the
    /// `madvise` feature is enabled.
    #[cfg(feature = "madvise")]
    pub fn advise_sequential(&self, segment_no: u32) {
        let segment = self.segment(segment_no);
        let _ = segment.mmap.advise(memmap2::Advice::Sequential);
    }

    #[cfg(not(feature = "madvise"))]
    pub fn advise_sequential(&self, _segment_no: u32) {}

    #[cfg(feature = "madvise")]
    pub fn advise_dont_need(&self, segment_no: u32) {
        let segment = self.segment(segment_no);
        let _ = segment.mmap.advise(memmap2::Advice::DontNeed);
    }

    #[cfg(not(feature = "madvise"))]
    pub fn advise_dont_need(&self, _segment_no: u32) {}
}

unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}
