// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Ties the mapping layer, segment allocator, and object-id allocator
//! together into the single facade the trie algorithms allocate and
//! dereference nodes through.

use std::sync::Arc;

use byteorder::{WriteBytesExt, LE};

use crate::config::Config;
use crate::error::Result;
use crate::id_allocator::{id_to_raw, IdAllocator, Location, NodeType, ObjectId};
use crate::mapping::Mapping;
use crate::node::{Node, ObjectHeader, OBJECT_HEADER_SIZE};
use crate::segment::SegmentAllocator;
use crate::session::{ReadSession, SessionTable, WriteSession};

/// The arena: segmented append-only storage plus the id space addressing it
/// (spec §2, components A+B+C combined).
pub struct Arena {
    pub(crate) mapping: Arc<Mapping>,
    pub(crate) segments: SegmentAllocator,
    pub(crate) ids: IdAllocator,
    pub(crate) sessions: Arc<SessionTable>,
}

impl Arena {
    /// Opens the arena's storage subsystems under `config.path/data`.
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.path.join("data");
        let mapping = Arc::new(Mapping::open(&data_dir, config.segment_size)?);
        let segments = SegmentAllocator::new(Arc::clone(&mapping), config.segment_size, config.max_segment_count);
        let ids = IdAllocator::new(config.max_ref_count);
        let sessions = Arc::new(SessionTable::new(config.max_session_count));
        Ok(Self { mapping, segments, ids, sessions })
    }

    /// Opens a read session against this arena (spec §4.D).
    pub fn start_read_session(&self) -> Result<ReadSession> {
        self.sessions.start_read_session(&self.segments)
    }

    /// Opens a write session against this arena (spec §4.D).
    pub fn start_write_session(&self) -> Result<WriteSession> {
        self.sessions.start_write_session(&self.segments)
    }

    /// Allocates a fresh region for the children of a node that just diverged
    /// from its siblings' locality class (spec invariant §3.2).
    pub fn new_region(&self) -> u32 {
        self.ids.new_region()
    }

    /// Flushes every mapped segment to disk.
    pub fn sync(&self, async_flush: bool) -> Result<()> {
        self.mapping.sync(async_flush)
    }

    /// Reads the raw bytes of the allocation at `loc`.
    fn bytes_at(&self, loc: Location) -> &[u8] {
        let segment = self.mapping.segment_bytes(loc.segment_no());
        let start = loc.offset() as usize;
        // The header carries the authoritative size; peek at it first.
        let header_only = &segment[start..start + OBJECT_HEADER_SIZE as usize];
        let header = ObjectHeader::read(header_only);
        &segment[start..start + header.size as usize]
    }

    /// Decodes `id` into an owned [`Node`]. Safe to call concurrently with
    /// writers and the compactor: the meta-word load that produced `id`'s
    /// location happens-after the writer's append (spec §5 "Ordering").
    pub fn read(&self, id: ObjectId) -> Node {
        let loc = self.ids.get(id).load().location;
        let (_, node) = Node::decode(self.bytes_at(loc));
        node
    }

    /// Allocates space for `node` in `writer`'s active segment (requesting a
    /// new one if the current one is full), publishes a fresh identifier in
    /// `region`, and returns it with refcount 1.
    pub fn construct(&self, region: u32, node: &Node, writer: &WriteSession) -> Result<ObjectId> {
        // Encoded once against a placeholder id, whose header gets patched
        // in place below once the real id is known; re-encoding the whole
        // payload would waste an allocation for no benefit.
        let mut encoded = node.encode(ObjectId::new(region, 0));
        let size = encoded.len() as u32;

        let (segment_no, offset) = self.reserve(size, writer)?;

        let id = self.ids.new_id(region, node.node_type(), Location::new(segment_no, offset));
        let mut id_field = Vec::with_capacity(8);
        id_field.write_u64::<LE>(id_to_raw(id)).expect("vec write cannot fail");
        encoded[..8].copy_from_slice(&id_field);

        let dst = self.mapping.segment_bytes_mut(segment_no);
        #[allow(unsafe_code)]
        unsafe {
            // SAFETY: `offset..offset+size` was just reserved exclusively for
            // this writer by `reserve`, and no reader can have observed it
            // yet because its id was not published until `new_id` above.
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), dst.add(offset as usize), size as usize);
        }

        Ok(id)
    }

    /// Reserves `size` bytes in `writer`'s active segment, finalizing and
    /// replacing it as needed (spec §4.B `finalize` / `get_new_segment`).
    pub(crate) fn reserve(&self, size: u32, writer: &WriteSession) -> Result<(u32, u32)> {
        loop {
            let segment_no = match writer.active_segment() {
                Some(seg) => seg,
                None => {
                    let seg = self.segments.get_new_segment(self.sessions.min_read_pointer())?;
                    writer.set_active_segment(seg);
                    seg
                }
            };
            if let Some(offset) = self.segments.try_alloc(segment_no, size) {
                return Ok((segment_no, offset));
            }
            self.segments.finalize(segment_no);
            let fresh = self.segments.get_new_segment(self.sessions.min_read_pointer())?;
            writer.set_active_segment(fresh);
        }
    }

    /// Attempts to take the mutate-in-place lock on `id` (spec §4.F
    /// "unique"): succeeds only if `id`'s refcount is exactly 1 and no
    /// relocation is concurrently in flight. On failure the caller must treat
    /// the node as shared and clone-and-set instead.
    pub fn try_lock_unique(&self, id: ObjectId) -> bool {
        self.ids.get(id).try_lock_for_mutation()
    }

    /// Releases a lock taken by [`Self::try_lock_unique`] without relocating
    /// (used on early-return error paths).
    pub fn unlock_unique(&self, id: ObjectId) {
        self.ids.get(id).unlock_after_mutation();
    }

    /// Rewrites `id`'s content in place. The identifier and its refcount are
    /// unaffected; only the location it points at changes, since the
    /// append-only allocator never rewrites previously-written bytes. Caller
    /// must already hold the lock from [`Self::try_lock_unique`]; this
    /// releases it.
    pub fn relocate(&self, id: ObjectId, node: &Node, writer: &WriteSession) -> Result<()> {
        let old_location = self.ids.get(id).load().location;
        let old_size = self.bytes_at(old_location).len() as u32;

        let encoded = node.encode(id);
        let size = encoded.len() as u32;
        let (segment_no, offset) = self.reserve(size, writer)?;

        let dst = self.mapping.segment_bytes_mut(segment_no);
        #[allow(unsafe_code)]
        unsafe {
            // SAFETY: `offset..offset+size` was just reserved exclusively for
            // this writer by `reserve`.
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), dst.add(offset as usize), size as usize);
        }

        self.ids.get(id).try_set_location(Location::new(segment_no, offset));
        self.ids.get(id).unlock_after_mutation();
        self.segments.free(old_location.segment_no(), old_size);
        Ok(())
    }

    /// Bumps `id`'s refcount (spec §4.C `retain`).
    pub fn retain(&self, id: ObjectId) -> Result<()> {
        if id.is_none() {
            return Ok(());
        }
        self.ids.retain(id)
    }

    /// Decrements `id`'s refcount, freeing the underlying allocation's bytes
    /// when it reaches zero (spec §4.C `release`, §3 Lifecycle).
    ///
    /// Subtree values are released recursively: dropping the last reference
    /// to a root that is itself stored as a value releases that root's own
    /// tree too.
    pub fn release(&self, id: ObjectId) {
        if id.is_none() {
            return;
        }
        // Snapshot the location before releasing: once the refcount hits
        // zero the index returns to the region's free list and may be
        // reused by a concurrent `new_id` before we get a chance to look.
        let before = self.ids.get(id).load();
        let freed = self.ids.release(id);
        if freed {
            let size = self.bytes_at(before.location).len() as u32;
            self.release_children(&before);
            self.segments.free_object(before.location.segment_no(), size);
        }
    }

    fn release_children(&self, before: &crate::id_allocator::MetaSnapshot) {
        use crate::node::{InnerNodeOps, Value};

        // The bytes are still intact (the meta word's type only flips to
        // `Undefined`; the payload itself is reclaimed lazily when the
        // segment is eventually recycled), so we can still decode them here.
        let bytes = self.bytes_at(before.location).to_vec();
        let (_, node) = Node::decode(&bytes);
        match (before.node_type, node) {
            (NodeType::Binary, Node::Binary(bucket)) => {
                for entry in bucket.entries() {
                    if let Value::Subtree(child) = &entry.value {
                        self.release(*child);
                    }
                }
            }
            (NodeType::Setlist | NodeType::Full, Node::Inner(inner)) => {
                if let Some(Value::Subtree(child)) = inner.get_eof_value() {
                    self.release(*child);
                }
                let mut children = Vec::new();
                inner.visit_branches(&mut |_, child| children.push(child));
                for child in children {
                    self.release(child);
                }
            }
            _ => {}
        }
    }
}
