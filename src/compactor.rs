// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Background segment compaction (spec §4.G): periodically evacuate the
//! sparsest eligible segment into the arena's normal append path so its
//! space can rejoin the free-segment ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::arena::Arena;
use crate::config::Config;
use crate::error::Result;
use crate::id_allocator::{Location, NodeType};
use crate::node::{ObjectHeader, OBJECT_HEADER_SIZE};
use crate::segment::SEGMENT_HEADER_SIZE;
use crate::session::WriteSession;

/// How long the background thread sleeps between passes when nothing was
/// eligible for compaction.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Runs (or can be asked to run) the background compaction loop described in
/// spec §4.G. `start_compact_thread`/`stop_compact_thread` own the thread;
/// `compact_next_segment` is also exposed standalone for callers that want
/// to drive compaction synchronously (e.g. tests, or a `compact_now` op).
pub struct Compactor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Spawns the background compaction thread.
    pub fn start(arena: Arc<Arena>, config: Config) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                match compact_next_segment(&arena, &config) {
                    Ok(true) => {}
                    Ok(false) => std::thread::sleep(IDLE_BACKOFF),
                    Err(err) => {
                        log::warn!("compaction pass failed: {err}");
                        std::thread::sleep(IDLE_BACKOFF);
                    }
                }
            }
        });
        Self { stop, handle: Some(handle) }
    }

    /// Signals the background thread to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Runs one pass of the algorithm in spec §4.G. Returns `Ok(true)` if a
/// segment was evacuated, `Ok(false)` if none was eligible.
pub fn compact_next_segment(arena: &Arena, config: &Config) -> Result<bool> {
    let Some(segment_no) = arena.segments.emptiest_segment(config.compaction_min_emptiness, None) else {
        return Ok(false);
    };

    arena.mapping.advise_sequential(segment_no);
    let writer = arena.start_write_session()?;

    let bytes = arena.mapping.segment_bytes(segment_no);
    let end = arena.segments.segment_meta(segment_no).alloc_pos();
    let mut offset = SEGMENT_HEADER_SIZE;

    while offset + OBJECT_HEADER_SIZE <= end {
        let start = offset as usize;
        let header = ObjectHeader::read(&bytes[start..start + OBJECT_HEADER_SIZE as usize]);
        if header.size < OBJECT_HEADER_SIZE || header.node_type == NodeType::Undefined {
            break;
        }
        let object_len = header.size;
        evacuate_one(arena, segment_no, offset, object_len, header, &writer);
        offset += object_len;
    }

    arena.segments.release(segment_no);
    Ok(true)
}

/// Attempts to relocate a single object found during the segment's header
/// scan. Gives up quietly if the id is concurrently relocated elsewhere, has
/// already been freed, or the per-id lock is contended — the spec's
/// "another writer will likely relocate the object itself" case.
fn evacuate_one(arena: &Arena, src_segment: u32, offset: u32, size: u32, header: ObjectHeader, writer: &WriteSession) {
    if header.id.is_none() {
        return;
    }
    let meta = arena.ids.get(header.id);
    if !meta.try_lock_for_relocation() {
        return;
    }

    let snapshot = meta.load();
    if snapshot.location.segment_no() != src_segment || snapshot.location.offset() != offset {
        // Already relocated since the scan observed this header; our copy
        // would be stale.
        meta.unlock_after_relocation();
        return;
    }

    let dst = match arena.reserve(size, writer) {
        Ok(dst) => dst,
        Err(_) => {
            meta.unlock_after_relocation();
            return;
        }
    };

    let src_bytes = arena.mapping.segment_bytes(src_segment);
    let dst_ptr = arena.mapping.segment_bytes_mut(dst.0);
    #[allow(unsafe_code)]
    unsafe {
        // SAFETY: `dst` was just reserved exclusively for this writer by
        // `Arena::reserve`, and the source bytes are immutable once written
        // (the append-only invariant).
        std::ptr::copy_nonoverlapping(src_bytes[offset as usize..].as_ptr(), dst_ptr.add(dst.1 as usize), size as usize);
    }

    let new_location = Location::new(dst.0, dst.1);
    if meta.try_set_location(new_location) {
        arena.segments.free(src_segment, size);
    } else {
        // Refcount hit zero mid-copy; abandon it and return the space we
        // just reserved in the destination segment too.
        arena.segments.free(dst.0, size);
    }
    meta.unlock_after_relocation();
}
