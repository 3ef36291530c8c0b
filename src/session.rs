// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Session / read-lock registration (spec §4.D): each session occupies one of
//! a fixed number of slots and publishes a "read pointer" that bounds which
//! released segments the compactor may recycle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::segment::SegmentAllocator;

/// Sentinel read-pointer value meaning "this slot is unused, or its session
/// has released its read lock."
const UNOCCUPIED: u64 = u64::MAX;

/// Sentinel meaning "this writer has no active allocation segment."
const NO_ACTIVE_SEGMENT: u32 = u32::MAX;

struct Slot {
    read_pointer: AtomicU64,
    active_segment: AtomicU32,
}

/// The fixed array of session slots (spec's 64-slot session table).
pub struct SessionTable {
    slots: Vec<Slot>,
    /// Guards the scan-and-claim step of enrollment; the only mutex on the
    /// hot path besides the per-top-root publish step and the compactor's
    /// per-id try-lock.
    enroll: Mutex<()>,
}

impl SessionTable {
    pub(crate) fn new(max_session_count: u16) -> Self {
        let slots = (0..max_session_count)
            .map(|_| Slot {
                read_pointer: AtomicU64::new(UNOCCUPIED),
                active_segment: AtomicU32::new(NO_ACTIVE_SEGMENT),
            })
            .collect();
        Self { slots, enroll: Mutex::new(()) }
    }

    fn claim_slot(&self) -> Result<usize> {
        let _guard = self.enroll.lock().expect("session table lock poisoned");
        self.slots
            .iter()
            .position(|slot| {
                slot.read_pointer
                    .compare_exchange(UNOCCUPIED, UNOCCUPIED, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            })
            .ok_or(Error::SessionsExhausted)
    }

    /// Opens a read session: claims a slot and publishes the allocator's
    /// current release epoch as this session's read pointer.
    pub fn start_read_session(self: &Arc<Self>, segments: &SegmentAllocator) -> Result<ReadSession> {
        let index = self.claim_slot()?;
        let epoch = segments.current_epoch();
        self.slots[index].read_pointer.store(epoch, Ordering::Release);
        Ok(ReadSession { table: Arc::clone(self), index })
    }

    /// Opens a write session: a read session that additionally owns an
    /// active allocation segment pointer.
    pub fn start_write_session(
        self: &Arc<Self>,
        segments: &SegmentAllocator,
    ) -> Result<WriteSession> {
        Ok(WriteSession { read: self.start_read_session(segments)? })
    }

    /// The minimum read pointer across all occupied slots, or `u64::MAX` if
    /// none are occupied. Bounds which released segments may be recycled.
    pub fn min_read_pointer(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.read_pointer.load(Ordering::Acquire))
            .min()
            .unwrap_or(UNOCCUPIED)
    }
}

/// A held read lock (spec §4.D). Dropping it releases the slot.
pub struct ReadSession {
    table: Arc<SessionTable>,
    index: usize,
}

impl Drop for ReadSession {
    fn drop(&mut self) {
        self.table.slots[self.index]
            .read_pointer
            .store(UNOCCUPIED, Ordering::Release);
    }
}

/// A held write lock: a read session plus ownership of an active allocation
/// segment (spec §4.D).
pub struct WriteSession {
    read: ReadSession,
}

impl WriteSession {
    /// The writer's currently active segment, if one has been requested yet.
    pub fn active_segment(&self) -> Option<u32> {
        let raw = self.table().slots[self.read.index]
            .active_segment
            .load(Ordering::Acquire);
        (raw != NO_ACTIVE_SEGMENT).then_some(raw)
    }

    /// Adopts a new active allocation segment, typically after the previous
    /// one was finalized.
    pub fn set_active_segment(&self, segment_no: u32) {
        self.table().slots[self.read.index]
            .active_segment
            .store(segment_no, Ordering::Release);
    }

    fn table(&self) -> &SessionTable {
        &self.read.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapping;
    use std::sync::Arc;
    use test_log::test;

    fn fresh_segments() -> (tempfile::TempDir, SegmentAllocator) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mapping = Arc::new(Mapping::open(dir.path(), 64).expect("open mapping"));
        (dir, SegmentAllocator::new(mapping, 64, 8))
    }

    #[test]
    fn read_session_publishes_current_epoch_and_releases_on_drop() {
        let (_dir, segments) = fresh_segments();
        let table = Arc::new(SessionTable::new(4));

        let first = segments.get_new_segment(0).expect("segment");
        segments.finalize(first);
        segments.release(first);

        let session = table.start_read_session(&segments).expect("claim a slot");
        assert_eq!(table.min_read_pointer(), segments.current_epoch());

        drop(session);
        assert_eq!(table.min_read_pointer(), u64::MAX, "no sessions left occupied");
    }

    #[test]
    fn session_table_is_exhausted_once_every_slot_is_claimed() {
        let (_dir, segments) = fresh_segments();
        let table = Arc::new(SessionTable::new(2));

        let a = table.start_read_session(&segments).expect("first slot");
        let b = table.start_read_session(&segments).expect("second slot");
        assert!(matches!(table.start_read_session(&segments), Err(Error::SessionsExhausted)));

        drop(a);
        let c = table.start_read_session(&segments).expect("slot freed by drop");
        drop(b);
        drop(c);
    }

    #[test]
    fn write_session_tracks_its_active_segment() {
        let (_dir, segments) = fresh_segments();
        let table = Arc::new(SessionTable::new(4));
        let writer = table.start_write_session(&segments).expect("write session");

        assert_eq!(writer.active_segment(), None);
        writer.set_active_segment(3);
        assert_eq!(writer.active_segment(), Some(3));
    }
}
