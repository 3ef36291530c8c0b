// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The object-id allocator (spec §4.C): a dense space of 40-bit identifiers,
//! each owning one 64-bit atomic meta word packing `{refcount, type, location}`.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

const REGION_BITS: u32 = 24;
const INDEX_BITS: u32 = 16;
const INDICES_PER_REGION: u32 = 1 << INDEX_BITS;
const CHUNK_LEN: usize = 1024;

/// Opaque node identifier: a 24-bit region and a 16-bit index. Zero means
/// "none" (spec §3).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The "no node" identifier.
    pub const NONE: Self = Self(0);

    pub(crate) fn new(region: u32, index: u16) -> Self {
        debug_assert!(region < (1 << REGION_BITS));
        Self(((u64::from(region)) << INDEX_BITS) | u64::from(index))
    }

    /// Whether this identifier denotes "no node".
    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The 24-bit region this identifier was allocated in.
    #[must_use]
    pub fn region(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }

    /// The 16-bit index within [`Self::region`].
    #[must_use]
    pub fn index(self) -> u16 {
        (self.0 & u64::from(INDICES_PER_REGION - 1)) as u16
    }
}

/// Packs an identifier into the raw `u64` used by on-disk node payloads
/// (region in the high 24 bits, index in the low 16).
#[must_use]
pub fn id_to_raw(id: ObjectId) -> u64 {
    (u64::from(id.region()) << INDEX_BITS) | u64::from(id.index())
}

/// Inverse of [`id_to_raw`].
#[must_use]
pub fn raw_to_id(raw: u64) -> ObjectId {
    ObjectId::new((raw >> INDEX_BITS) as u32, (raw & u64::from(INDICES_PER_REGION - 1)) as u16)
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "id(none)")
        } else {
            write!(f, "id({}:{})", self.region(), self.index())
        }
    }
}

/// Concrete on-arena node shape (spec §3/§4.E).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum NodeType {
    /// No node is allocated for this identifier (free or not-yet-used).
    Undefined = 0,
    /// Sorted small bucket of (key-suffix, value) entries.
    Binary = 1,
    /// Sparse inner node: common prefix + ordered (branch, child) pairs.
    Setlist = 2,
    /// Dense inner node: common prefix + 256-entry branch table.
    Full = 3,
    /// Terminal value: inline bytes or a subtree root id.
    Value = 4,
}

impl NodeType {
    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => Self::Binary,
            2 => Self::Setlist,
            3 => Self::Full,
            4 => Self::Value,
            _ => Self::Undefined,
        }
    }
}

/// The segment/offset a meta word currently points at.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Location {
    segment_no: u32,
    offset: u32,
}

const LOCATION_OFFSET_BITS: u32 = 25;
const LOCATION_SEGMENT_BITS: u32 = 23;

impl Location {
    /// Builds a location from a segment number and a byte offset into it.
    /// `offset` must be 8-byte aligned, per the object header alignment rule.
    #[must_use]
    pub fn new(segment_no: u32, offset: u32) -> Self {
        debug_assert_eq!(offset % 8, 0, "object headers are 8-byte aligned");
        debug_assert!(segment_no < (1 << LOCATION_SEGMENT_BITS));
        debug_assert!(offset < (1 << (LOCATION_OFFSET_BITS + 3)));
        Self { segment_no, offset }
    }

    /// The segment this location is in.
    #[must_use]
    pub fn segment_no(self) -> u32 {
        self.segment_no
    }

    /// The byte offset within that segment.
    #[must_use]
    pub fn offset(self) -> u32 {
        self.offset
    }

    fn encode(self) -> u64 {
        (u64::from(self.segment_no) << LOCATION_OFFSET_BITS) | u64::from(self.offset / 8)
    }

    fn decode(bits: u64) -> Self {
        let mask = (1u64 << LOCATION_OFFSET_BITS) - 1;
        Self {
            segment_no: (bits >> LOCATION_OFFSET_BITS) as u32,
            offset: ((bits & mask) as u32) * 8,
        }
    }
}

const REFCOUNT_SHIFT: u32 = 0;
const REFCOUNT_BITS: u32 = 12;
const REFCOUNT_MASK: u64 = (1 << REFCOUNT_BITS) - 1;
const TYPE_SHIFT: u32 = REFCOUNT_BITS;
const TYPE_MASK: u64 = 0x7;
const LOCK_SHIFT: u32 = TYPE_SHIFT + 3;
const LOCATION_SHIFT: u32 = LOCK_SHIFT + 1;

/// A decoded snapshot of a meta word.
#[derive(Copy, Clone, Debug)]
pub struct MetaSnapshot {
    /// Current reference count. Zero means the identifier is free.
    pub refcount: u32,
    /// The node's type tag.
    pub node_type: NodeType,
    /// Current physical location, meaningless when `node_type == Undefined`.
    pub location: Location,
    /// Whether a writer currently holds the single-writer mutate-in-place lock.
    pub locked: bool,
}

fn pack(refcount: u32, node_type: NodeType, location: Location, locked: bool) -> u64 {
    (u64::from(refcount) << REFCOUNT_SHIFT)
        | ((node_type as u64) << TYPE_SHIFT)
        | (u64::from(locked) << LOCK_SHIFT)
        | (location.encode() << LOCATION_SHIFT)
}

fn unpack(bits: u64) -> MetaSnapshot {
    MetaSnapshot {
        refcount: ((bits >> REFCOUNT_SHIFT) & REFCOUNT_MASK) as u32,
        node_type: NodeType::from_bits((bits >> TYPE_SHIFT) & TYPE_MASK),
        location: Location::decode(bits >> LOCATION_SHIFT),
        locked: ((bits >> LOCK_SHIFT) & 1) == 1,
    }
}

/// The single atomic cell keyed by identifier (spec §3 "meta word").
pub struct Meta(AtomicU64);

impl Meta {
    fn new(refcount: u32, node_type: NodeType, location: Location) -> Self {
        Self(AtomicU64::new(pack(refcount, node_type, location, false)))
    }

    /// Loads the current snapshot with acquire ordering.
    #[must_use]
    pub fn load(&self) -> MetaSnapshot {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Publishes a new location (used by the compactor and by in-place
    /// mutation) without disturbing refcount or type. Retries under
    /// concurrent refcount changes; fails (returning `false`) if the type
    /// has become `Undefined`, meaning the id was freed mid-relocation.
    pub fn try_set_location(&self, new_location: Location) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            if snapshot.node_type == NodeType::Undefined {
                return false;
            }
            let updated = pack(snapshot.refcount, snapshot.node_type, new_location, snapshot.locked);
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Attempts to take the mutate-in-place lock. Returns `false` if already
    /// locked or the refcount isn't exactly 1.
    pub fn try_lock_for_mutation(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            if snapshot.locked || snapshot.refcount != 1 {
                return false;
            }
            let updated = pack(snapshot.refcount, snapshot.node_type, snapshot.location, true);
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Releases the mutate-in-place lock taken by [`Self::try_lock_for_mutation`].
    pub fn unlock_after_mutation(&self) {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            debug_assert!(snapshot.locked);
            let updated = pack(snapshot.refcount, snapshot.node_type, snapshot.location, false);
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    /// Attempts to take the compactor's try-lock on this id. Unlike
    /// [`Self::try_lock_for_mutation`] this does not require refcount == 1;
    /// the compactor may relocate any still-live object.
    pub(crate) fn try_lock_for_relocation(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            if snapshot.locked || snapshot.node_type == NodeType::Undefined || snapshot.refcount == 0
            {
                return false;
            }
            let updated = pack(snapshot.refcount, snapshot.node_type, snapshot.location, true);
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    pub(crate) fn unlock_after_relocation(&self) {
        self.unlock_after_mutation();
    }

    fn retain(&self, max_ref_count: u32) -> std::result::Result<(), ()> {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            if snapshot.refcount >= max_ref_count {
                return Err(());
            }
            let updated = pack(
                snapshot.refcount + 1,
                snapshot.node_type,
                snapshot.location,
                snapshot.locked,
            );
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Decrements the refcount, returning `true` if it reached zero (the id
    /// should now be freed).
    fn release(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            let snapshot = unpack(current);
            debug_assert!(snapshot.refcount > 0, "release on a freed id");
            let new_refcount = snapshot.refcount - 1;
            let node_type = if new_refcount == 0 {
                NodeType::Undefined
            } else {
                snapshot.node_type
            };
            let updated = pack(new_refcount, node_type, snapshot.location, snapshot.locked);
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return new_refcount == 0,
                Err(_) => continue,
            }
        }
    }
}

/// A growable table of meta words for a single region, allocated in fixed
/// chunks so that existing entries never move.
struct Region {
    chunks: RwLock<Vec<Box<[Meta; CHUNK_LEN]>>>,
    free: Mutex<Vec<u16>>,
    next: AtomicU32,
}

impl Region {
    fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            next: AtomicU32::new(0),
        }
    }

    /// Returns a reference to the meta word at `index`, valid for as long as
    /// this `Region` is alive.
    ///
    /// SAFETY: each chunk is a `Box<[Meta; CHUNK_LEN]>`; pushing a new chunk
    /// onto `self.chunks` may move the `Vec`'s backing array of `Box`
    /// pointers, but never the boxed payload itself, so a `Meta`'s address is
    /// stable from the moment its chunk is created.
    fn meta(&self, index: u16) -> &Meta {
        let chunk_no = index as usize / CHUNK_LEN;
        let offset = index as usize % CHUNK_LEN;
        let chunks = self.chunks.read().expect("region lock poisoned");
        let meta_ref: &Meta = &chunks[chunk_no][offset];
        unsafe { &*(std::ptr::from_ref(meta_ref)) }
    }

    fn ensure_chunk(&self, chunk_no: usize) {
        let mut chunks = self.chunks.write().expect("region lock poisoned");
        while chunks.len() <= chunk_no {
            chunks.push(Box::new(std::array::from_fn(|_| {
                Meta::new(0, NodeType::Undefined, Location::new(0, 0))
            })));
        }
    }

    fn alloc(&self, node_type: NodeType, location: Location) -> u16 {
        let index = {
            let mut free = self.free.lock().expect("region lock poisoned");
            free.pop()
        };
        let index = index.unwrap_or_else(|| {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            assert!(
                raw < u32::from(u16::MAX),
                "region exhausted its 16-bit index space"
            );
            raw as u16
        });
        self.ensure_chunk(index as usize / CHUNK_LEN);
        let meta = self.meta(index);
        meta.0.store(pack(1, node_type, location, false), Ordering::Release);
        index
    }

    fn free_index(&self, index: u16) {
        self.free.lock().expect("region lock poisoned").push(index);
    }

    /// Installs a meta word at exactly `index`, growing chunks and bumping
    /// the allocation counter past it so future `alloc` calls never collide
    /// with it. Used only during recovery, to re-seat a meta word under the
    /// same identifier an object was persisted under (spec §6 recovery).
    fn restore(&self, index: u16, node_type: NodeType, location: Location, refcount: u32) {
        self.ensure_chunk(index as usize / CHUNK_LEN);
        self.meta(index).0.store(pack(refcount, node_type, location, false), Ordering::Release);
        let mut next = self.next.load(Ordering::Relaxed);
        while next <= u32::from(index) {
            match self.next.compare_exchange_weak(next, u32::from(index) + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => next = actual,
            }
        }
    }
}

/// Manages the id space and the parallel meta-word tables (spec §4.C).
pub struct IdAllocator {
    regions: RwLock<Vec<Box<Region>>>,
    max_ref_count: u32,
}

impl IdAllocator {
    pub(crate) fn new(max_ref_count: u32) -> Self {
        Self {
            regions: RwLock::new(vec![Box::new(Region::new())]),
            max_ref_count,
        }
    }

    /// Returns a reference to `region_no`'s table, valid for as long as this
    /// `IdAllocator` is alive (regions are pushed but never removed or
    /// replaced, and are boxed so the outer `Vec`'s own reallocation never
    /// moves them).
    fn region(&self, region_no: u32) -> &Region {
        let regions = self.regions.read().expect("id allocator lock poisoned");
        let region_ref: &Region = &regions[region_no as usize];
        unsafe { &*(std::ptr::from_ref(region_ref)) }
    }

    /// Allocates a fresh region number, used to give an inner node's children
    /// a locality class distinct from the node's own (spec invariant §3.2).
    pub fn new_region(&self) -> u32 {
        let mut regions = self.regions.write().expect("id allocator lock poisoned");
        let region_no = regions.len() as u32;
        regions.push(Box::new(Region::new()));
        region_no
    }

    /// Allocates a fresh identifier within `region`, returning it with
    /// refcount 1 and the given type/location already published.
    pub fn new_id(&self, region: u32, node_type: NodeType, location: Location) -> ObjectId {
        let index = self.region(region).alloc(node_type, location);
        ObjectId::new(region, index)
    }

    /// Returns a reference to `id`'s meta word.
    pub fn get(&self, id: ObjectId) -> &Meta {
        self.region(id.region()).meta(id.index())
    }

    /// Bumps `id`'s refcount. Rolls back and reports an error if that would
    /// exceed `max_ref_count`.
    pub fn retain(&self, id: ObjectId) -> Result<()> {
        self.get(id)
            .retain(self.max_ref_count)
            .map_err(|()| Error::RefcountOverflow { id })
    }

    /// Decrements `id`'s refcount, returning it to the free list if it
    /// reaches zero. Returns whether this call was the one that freed it, so
    /// the caller can reclaim the underlying allocation's bytes exactly once.
    pub fn release(&self, id: ObjectId) -> bool {
        let reached_zero = self.get(id).release();
        if reached_zero {
            self.region(id.region()).free_index(id.index());
        }
        reached_zero
    }

    /// Grows the region table so that `region_no` is addressable, in case
    /// recovery encounters a persisted identifier from a region beyond the
    /// ones opened so far this run.
    pub(crate) fn ensure_region(&self, region_no: u32) {
        let mut regions = self.regions.write().expect("id allocator lock poisoned");
        while regions.len() as u32 <= region_no {
            regions.push(Box::new(Region::new()));
        }
    }

    /// Re-seats `id`'s meta word at its persisted location with `refcount`,
    /// used only while replaying the reachability walk during recovery (spec
    /// §6). Unlike [`Self::new_id`], this does not consult the free list or
    /// allocation counter for a fresh index — it reclaims the identifier's
    /// own index directly.
    pub(crate) fn restore_id(&self, id: ObjectId, node_type: NodeType, location: Location, refcount: u32) {
        self.ensure_region(id.region());
        self.region(id.region()).restore(id.index(), node_type, location, refcount);
    }

    /// Bumps `id`'s refcount during recovery's reachability walk, once its
    /// meta word has already been installed by [`Self::restore_id`].
    pub(crate) fn bump_refcount(&self, id: ObjectId) {
        let _ = self.get(id).retain(self.max_ref_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn object_id_round_trips_through_region_and_index() {
        let id = ObjectId::new(0x00_ABCD, 0x1234);
        assert_eq!(id.region(), 0x00_ABCD);
        assert_eq!(id.index(), 0x1234);
        assert!(!id.is_none());
        assert!(ObjectId::NONE.is_none());
    }

    #[test]
    fn raw_packing_round_trips() {
        let id = ObjectId::new(42, 7);
        assert_eq!(raw_to_id(id_to_raw(id)), id);
    }

    #[test]
    fn location_round_trips_through_meta_word() {
        let location = Location::new(3, 128);
        let meta = Meta::new(1, NodeType::Binary, location);
        let snapshot = meta.load();
        assert_eq!(snapshot.location, location);
        assert_eq!(snapshot.node_type, NodeType::Binary);
        assert_eq!(snapshot.refcount, 1);
        assert!(!snapshot.locked);
    }

    #[test]
    fn try_set_location_updates_without_disturbing_refcount() {
        let meta = Meta::new(2, NodeType::Setlist, Location::new(0, 0));
        let moved = Location::new(1, 64);
        assert!(meta.try_set_location(moved));
        let snapshot = meta.load();
        assert_eq!(snapshot.location, moved);
        assert_eq!(snapshot.refcount, 2);
    }

    #[test]
    fn try_set_location_fails_once_freed() {
        let meta = Meta::new(0, NodeType::Undefined, Location::new(0, 0));
        assert!(!meta.try_set_location(Location::new(5, 0)));
    }

    #[test]
    fn mutation_lock_requires_refcount_one() {
        let meta = Meta::new(2, NodeType::Binary, Location::new(0, 0));
        assert!(!meta.try_lock_for_mutation());
        let solo = Meta::new(1, NodeType::Binary, Location::new(0, 0));
        assert!(solo.try_lock_for_mutation());
        assert!(!solo.try_lock_for_mutation(), "already locked");
        solo.unlock_after_mutation();
        assert!(solo.try_lock_for_mutation());
    }

    #[test]
    fn allocator_retain_and_release_round_trip() {
        let ids = IdAllocator::new(4095);
        let id = ids.new_id(0, NodeType::Value, Location::new(0, 0));
        assert_eq!(ids.get(id).load().refcount, 1);

        ids.retain(id).expect("refcount has headroom");
        assert_eq!(ids.get(id).load().refcount, 2);

        assert!(!ids.release(id), "still one outstanding reference");
        assert!(ids.release(id), "last reference frees the id");
        assert_eq!(ids.get(id).load().node_type, NodeType::Undefined);
    }

    #[test]
    fn allocator_retain_rejects_past_max_ref_count() {
        let ids = IdAllocator::new(1);
        let id = ids.new_id(0, NodeType::Value, Location::new(0, 0));
        assert!(ids.retain(id).is_err());
    }

    #[test]
    fn new_region_allocates_disjoint_index_spaces() {
        let ids = IdAllocator::new(4095);
        let region_a = ids.new_region();
        let region_b = ids.new_region();
        assert_ne!(region_a, region_b);

        let a = ids.new_id(region_a, NodeType::Binary, Location::new(0, 0));
        let b = ids.new_id(region_b, NodeType::Binary, Location::new(0, 0));
        assert_eq!(a.region(), region_a);
        assert_eq!(b.region(), region_b);
    }

    #[test]
    fn restore_id_reseats_meta_word_at_persisted_index() {
        let ids = IdAllocator::new(4095);
        let location = Location::new(9, 16);
        let id = ObjectId::new(0, 500);
        ids.restore_id(id, NodeType::Full, location, 3);
        let snapshot = ids.get(id).load();
        assert_eq!(snapshot.node_type, NodeType::Full);
        assert_eq!(snapshot.location, location);
        assert_eq!(snapshot.refcount, 3);

        ids.bump_refcount(id);
        assert_eq!(ids.get(id).load().refcount, 4);
    }

    #[test]
    fn allocator_reuses_freed_indices() {
        let ids = IdAllocator::new(4095);
        let first = ids.new_id(0, NodeType::Binary, Location::new(0, 0));
        assert!(ids.release(first));
        let second = ids.new_id(0, NodeType::Binary, Location::new(0, 0));
        assert_eq!(first.index(), second.index(), "freed index should be recycled");
    }
}
