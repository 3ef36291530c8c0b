// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level store (spec §6): ties the arena, the top-root registry, and
//! the background compactor together, and owns the `db` header file that
//! records `clean_shutdown` and the root registry's persisted state.
//!
//! Meta words (refcount, type, location) live purely in memory (spec §3);
//! nothing about them survives a process restart. So unlike a design that
//! could trust a `clean_shutdown` flag to skip validation, this store always
//! rebuilds every live identifier's meta word from scratch on open, by
//! scanning every segment's on-disk headers once and then walking the
//! reachable graph from the persisted top roots. `clean_shutdown` is kept
//! only as a diagnostic: it says whether the previous run got to call
//! [`Database::close`], not whether rebuilding is necessary.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use rustc_hash::FxHashMap;

use crate::arena::Arena;
use crate::compactor::Compactor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::id_allocator::{id_to_raw, raw_to_id, Location, NodeType, ObjectId};
use crate::iterator::Iterator;
use crate::node::{InnerNodeOps, Node, ObjectHeader, Value, OBJECT_HEADER_SIZE};
use crate::root_registry::RootRegistry;
use crate::segment::SEGMENT_HEADER_SIZE;
use crate::trie;

const HEADER_MAGIC: [u8; 4] = [b'A', b'R', b'B', 1];
const HEADER_FILE_NAME: &str = "db";

/// Recovery work performed by [`Database::open`] (spec §B.3). `cleared_locks`
/// is always zero under this store's in-memory-only meta words (there is
/// never a persisted lock bit to clear); it is kept so the report shape
/// matches what the original design logs.
#[derive(Copy, Clone, Debug, Default)]
pub struct RecoveryReport {
    pub cleared_locks: u32,
    pub roots_validated: u32,
}

/// The store (spec §6): arena + top-root registry + optional compactor
/// thread, plus the `db` header file's `clean_shutdown` bookkeeping.
pub struct Database {
    arena: Arc<Arena>,
    roots: Arc<RootRegistry>,
    config: Config,
    header_path: PathBuf,
    compactor: Mutex<Option<Compactor>>,
    last_recovery: RecoveryReport,
}

impl Database {
    /// Opens (creating if necessary) the store described by `config` (spec
    /// §6 "Startup").
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        let arena = Arc::new(Arena::open(&config)?);
        let header_path = config.path.join(HEADER_FILE_NAME);

        let loaded = load_or_init_header(&header_path, &config)?;
        let roots = Arc::new(loaded.roots);

        let report = recover(&arena, &roots, &config)?;
        if !loaded.clean_shutdown && report.roots_validated > 0 {
            log::warn!("arbtrie: recovered from an unclean shutdown; rebuilt {} top root(s)", report.roots_validated);
        } else {
            log::debug!("arbtrie: opened store; validated {} top root(s)", report.roots_validated);
        }

        // The store is now in use; only `close` marks it clean again.
        persist_header(&header_path, &roots, false)?;

        Ok(Self { arena, roots, config, header_path, compactor: Mutex::new(None), last_recovery: report })
    }

    /// The recovery work performed by the `open` call that produced this
    /// handle.
    #[must_use]
    pub fn last_recovery(&self) -> RecoveryReport {
        self.last_recovery
    }

    /// Opens a read session against the underlying arena (spec §4.D).
    pub fn start_read_session(&self) -> Result<crate::session::ReadSession> {
        self.arena.start_read_session()
    }

    /// Opens a write session against the underlying arena (spec §4.D).
    pub fn start_write_session(&self) -> Result<crate::session::WriteSession> {
        self.arena.start_write_session()
    }

    /// Claims a fresh top-root slot (spec §6 `create_root`).
    pub fn create_root(&self) -> Result<u16> {
        self.roots.create_root()
    }

    /// Loads `slot`'s current root, retaining a reference the caller owns
    /// (spec §4.H `get_root`).
    pub fn get_root(&self, slot: u16) -> Result<ObjectId> {
        self.roots.get_root(&self.arena, slot)
    }

    /// Publishes `new_root` into `slot` (spec §4.H `set_root`). Takes
    /// ownership of the caller's reference to `new_root`.
    pub fn set_root(&self, slot: u16, new_root: ObjectId) {
        self.roots.set_root(&self.arena, slot, new_root);
    }

    /// Inserts `key`, failing if it is already present under `slot`'s root.
    pub fn insert(&self, slot: u16, key: &[u8], value: Value) -> Result<()> {
        self.mutate(slot, |arena, root, region, writer| trie::insert(arena, root, region, key, value, writer, &self.config))
    }

    /// Updates `key`'s value, failing if it is absent under `slot`'s root.
    pub fn update(&self, slot: u16, key: &[u8], value: Value) -> Result<()> {
        self.mutate(slot, |arena, root, region, writer| trie::update(arena, root, region, key, value, writer, &self.config))
    }

    /// Inserts or updates `key` unconditionally under `slot`'s root.
    pub fn upsert(&self, slot: u16, key: &[u8], value: Value) -> Result<()> {
        self.mutate(slot, |arena, root, region, writer| trie::upsert(arena, root, region, key, value, writer, &self.config))
    }

    /// Removes `key`, failing if it is absent under `slot`'s root.
    pub fn remove(&self, slot: u16, key: &[u8]) -> Result<()> {
        self.mutate(slot, |arena, root, region, writer| trie::remove(arena, root, region, key, writer, &self.config))
    }

    /// Drives one read-modify-publish cycle against `slot`'s root (spec
    /// §4.H): take the slot's current root, feed it through `op`, and
    /// publish whatever comes back. On failure the extra reference taken by
    /// `get_root` is released rather than leaked. Concurrent mutations of
    /// the *same* slot are the caller's responsibility to serialize, exactly
    /// as in the literal `get_root`/`set_root` contract of spec §4.H.
    fn mutate<F>(&self, slot: u16, op: F) -> Result<()>
    where
        F: FnOnce(&Arena, ObjectId, u32, &crate::session::WriteSession) -> Result<ObjectId>,
    {
        let writer = self.arena.start_write_session()?;
        let root = self.roots.get_root(&self.arena, slot)?;
        let region = if root.is_none() { self.arena.new_region() } else { root.region() };
        match op(&self.arena, root, region, &writer) {
            Ok(new_root) => {
                self.roots.set_root(&self.arena, slot, new_root);
                Ok(())
            }
            Err(err) => {
                self.arena.release(root);
                Err(err)
            }
        }
    }

    /// Read-only lookup of `key` under `slot`'s root (spec §4.F `get`).
    pub fn get(&self, slot: u16, key: &[u8]) -> Result<Option<Value>> {
        let _session = self.arena.start_read_session()?;
        let root = self.roots.get_root(&self.arena, slot)?;
        let value = trie::get(&self.arena, root, key);
        self.arena.release(root);
        Ok(value)
    }

    /// Opens an ordered cursor over `slot`'s root (spec §4.I).
    pub fn create_iterator(&self, slot: u16) -> Result<Iterator<'_>> {
        let root = self.roots.get_root(&self.arena, slot)?;
        Iterator::open(&self.arena, root)
    }

    fn range_keys(&self, slot: u16, lo: &[u8], hi: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.create_iterator(slot)?;
        let mut keys = Vec::new();
        if iter.lower_bound(lo) {
            while iter.is_valid() && iter.key() < hi {
                keys.push(iter.key().to_vec());
                if !iter.next() {
                    break;
                }
            }
        }
        Ok(keys)
    }

    /// Counts the keys in `[lo, hi)` under `slot`'s root (spec §6).
    pub fn count_keys(&self, slot: u16, lo: &[u8], hi: &[u8]) -> Result<u64> {
        let mut iter = self.create_iterator(slot)?;
        let mut count = 0_u64;
        if iter.lower_bound(lo) {
            while iter.is_valid() && iter.key() < hi {
                count += 1;
                if !iter.next() {
                    break;
                }
            }
        }
        Ok(count)
    }

    /// Whether `[lo, hi)` under `slot`'s root contains no keys (spec §6).
    pub fn is_empty(&self, slot: u16, lo: &[u8], hi: &[u8]) -> Result<bool> {
        let mut iter = self.create_iterator(slot)?;
        Ok(!(iter.lower_bound(lo) && iter.key() < hi))
    }

    /// Weakly compares `[lo, hi)` under two slots' roots (spec §6
    /// `is_equal_weak`): keys must match exactly, and values must match
    /// without recursing into nested subtrees — a `Value::Subtree` compares
    /// equal only if both sides reference the identical root id, not if
    /// their contents happen to be identical. This is the cheap half of
    /// equality; a true deep comparison would have to walk every subtree
    /// too.
    pub fn is_equal_weak(&self, slot_a: u16, slot_b: u16, lo: &[u8], hi: &[u8]) -> Result<bool> {
        let mut a = self.create_iterator(slot_a)?;
        let mut b = self.create_iterator(slot_b)?;
        let mut a_has = a.lower_bound(lo) && a.key() < hi;
        let mut b_has = b.lower_bound(lo) && b.key() < hi;
        loop {
            match (a_has, b_has) {
                (false, false) => return Ok(true),
                (true, true) => {
                    if a.key() != b.key() || !values_weakly_equal(a.read_value(), b.read_value()) {
                        return Ok(false);
                    }
                    a_has = a.next() && a.key() < hi;
                    b_has = b.next() && b.key() < hi;
                }
                _ => return Ok(false),
            }
        }
    }

    /// Removes every key in `[lo, hi)` under `slot`'s root and returns the
    /// removed `(key, value)` pairs, transferring ownership of any
    /// `Value::Subtree` reference to the caller rather than releasing it
    /// (spec §6 `take`).
    pub fn take(&self, slot: u16, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Value)>> {
        let keys = self.range_keys(slot, lo, hi)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = self.get(slot, &key)? else {
                // A concurrent mutation removed it between the scan and now;
                // nothing to take.
                continue;
            };
            if let Value::Subtree(id) = &value {
                self.arena.retain(*id)?;
            }
            self.remove(slot, &key)?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// Moves every key in `[lo, hi)` from `src_slot`'s root into
    /// `dst_slot`'s root (spec §6 `splice`).
    pub fn splice(&self, dst_slot: u16, src_slot: u16, lo: &[u8], hi: &[u8]) -> Result<()> {
        for (key, value) in self.take(src_slot, lo, hi)? {
            self.upsert(dst_slot, &key, value)?;
        }
        Ok(())
    }

    /// Spawns the background compaction thread, if it is not already
    /// running (spec §4.G).
    pub fn start_compact_thread(&self) {
        let mut guard = self.compactor.lock().expect("database lock poisoned");
        if guard.is_none() {
            *guard = Some(Compactor::start(Arc::clone(&self.arena), self.config.clone()));
        }
    }

    /// Stops the background compaction thread, if running.
    pub fn stop_compact_thread(&self) {
        let mut guard = self.compactor.lock().expect("database lock poisoned");
        if let Some(compactor) = guard.take() {
            compactor.stop();
        }
    }

    /// Runs a single compaction pass synchronously, without the background
    /// thread. Returns whether a segment was evacuated.
    pub fn compact_next_segment(&self) -> Result<bool> {
        crate::compactor::compact_next_segment(&self.arena, &self.config)
    }

    /// Flushes the arena and persists the root registry, without changing
    /// the `clean_shutdown` marker.
    pub fn sync(&self, async_flush: bool) -> Result<()> {
        self.arena.sync(async_flush)?;
        persist_header(&self.header_path, &self.roots, false)
    }

    /// Stops the compactor, flushes the arena, and marks the header cleanly
    /// shut down (spec §6 "Shutdown").
    pub fn close(self) -> Result<()> {
        self.stop_compact_thread();
        self.arena.sync(false)?;
        persist_header(&self.header_path, &self.roots, true)
    }
}

fn values_weakly_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(Value::Inline(x)), Some(Value::Inline(y))) => x == y,
        (Some(Value::Subtree(x)), Some(Value::Subtree(y))) => x == y,
        (None, None) => true,
        _ => false,
    }
}

struct LoadedHeader {
    roots: RootRegistry,
    clean_shutdown: bool,
}

fn load_or_init_header(path: &Path, config: &Config) -> Result<LoadedHeader> {
    if !path.exists() {
        return Ok(LoadedHeader { roots: RootRegistry::new(config.num_top_roots), clean_shutdown: true });
    }

    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if bytes.len() < 7 || bytes[0..4] != HEADER_MAGIC {
        return Err(Error::CorruptHeader);
    }

    let mut cursor = std::io::Cursor::new(&bytes[4..]);
    let clean_shutdown = cursor.read_u8().map_err(|_| Error::CorruptHeader)? != 0;
    let num_slots = cursor.read_u16::<LE>().map_err(|_| Error::CorruptHeader)?;
    if num_slots != config.num_top_roots {
        log::warn!("arbtrie: stored top-root count {num_slots} overrides configured {}", config.num_top_roots);
    }

    let roots = RootRegistry::new(num_slots);
    for slot in 0..num_slots {
        let claimed = cursor.read_u8().map_err(|_| Error::CorruptHeader)? != 0;
        let raw = cursor.read_u64::<LE>().map_err(|_| Error::CorruptHeader)?;
        roots.restore_slot(slot, claimed, raw_to_id(raw));
    }

    Ok(LoadedHeader { roots, clean_shutdown })
}

fn persist_header(path: &Path, roots: &RootRegistry, clean_shutdown: bool) -> Result<()> {
    let snapshot = roots.snapshot();
    let mut out = Vec::with_capacity(4 + 1 + 2 + snapshot.len() * 9);
    out.extend_from_slice(&HEADER_MAGIC);
    out.write_u8(u8::from(clean_shutdown)).expect("vec write cannot fail");
    out.write_u16::<LE>(snapshot.len() as u16).expect("vec write cannot fail");
    for (claimed, id) in snapshot {
        out.write_u8(u8::from(claimed)).expect("vec write cannot fail");
        out.write_u64::<LE>(id_to_raw(id)).expect("vec write cannot fail");
    }

    let folder = path.parent().expect("header file always has a parent directory");
    let mut temp = tempfile::NamedTempFile::new_in(folder)?;
    temp.write_all(&out)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// What a segment header scan found for one identifier: the last-written
/// location wins, since relocation and compaction only ever move an id's
/// bytes to a later-or-equal segment, scanned in ascending order here.
struct ScannedObject {
    node_type: NodeType,
    location: Location,
    size: u32,
}

/// Rebuilds every live identifier's meta word from the persisted top roots
/// (module doc above; spec §6 recovery, reinterpreted for in-memory-only meta
/// words). Frees every on-disk object the mark phase never reaches, and
/// corrects each segment's real `alloc_pos`.
fn recover(arena: &Arena, roots: &RootRegistry, config: &Config) -> Result<RecoveryReport> {
    let segment_count = arena.mapping.segment_count();
    let mut scanned: FxHashMap<ObjectId, ScannedObject> = FxHashMap::default();
    let mut segment_ends = vec![SEGMENT_HEADER_SIZE; segment_count as usize];

    for segment_no in 0..segment_count {
        let bytes = arena.mapping.segment_bytes(segment_no);
        let mut offset = SEGMENT_HEADER_SIZE;
        while offset + OBJECT_HEADER_SIZE <= config.segment_size {
            let start = offset as usize;
            let header = ObjectHeader::read(&bytes[start..start + OBJECT_HEADER_SIZE as usize]);
            if header.size < OBJECT_HEADER_SIZE || header.node_type == NodeType::Undefined || header.id.is_none() {
                break;
            }
            scanned.insert(header.id, ScannedObject { node_type: header.node_type, location: Location::new(segment_no, offset), size: header.size });
            offset += header.size;
        }
        segment_ends[segment_no as usize] = offset;
    }

    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut roots_validated = 0_u32;
    for root in roots.all_roots() {
        if !root.is_none() {
            mark(arena, &scanned, &mut visited, root);
            roots_validated += 1;
        }
    }

    for (id, obj) in &scanned {
        if !visited.contains(id) {
            arena.segments.free(obj.location.segment_no(), obj.size);
        }
    }
    for segment_no in 0..segment_count {
        arena.segments.restore_alloc_pos(segment_no, segment_ends[segment_no as usize]);
    }

    Ok(RecoveryReport { cleared_locks: 0, roots_validated })
}

fn mark(arena: &Arena, scanned: &FxHashMap<ObjectId, ScannedObject>, visited: &mut HashSet<ObjectId>, id: ObjectId) {
    if id.is_none() {
        return;
    }
    if !visited.insert(id) {
        arena.ids.bump_refcount(id);
        return;
    }

    let Some(obj) = scanned.get(&id) else {
        log::warn!("arbtrie: recovery found {id} referenced from a top root but not on disk; skipping its subtree");
        visited.remove(&id);
        return;
    };
    arena.ids.restore_id(id, obj.node_type, obj.location, 1);

    let bytes = arena.mapping.segment_bytes(obj.location.segment_no());
    let start = obj.location.offset() as usize;
    let (_, node) = Node::decode(&bytes[start..start + obj.size as usize]);
    match node {
        Node::Binary(bucket) => {
            for entry in bucket.entries() {
                if let Value::Subtree(child) = &entry.value {
                    mark(arena, scanned, visited, *child);
                }
            }
        }
        Node::Inner(inner) => {
            if let Some(Value::Subtree(child)) = inner.get_eof_value() {
                mark(arena, scanned, visited, *child);
            }
            let mut children = Vec::new();
            inner.visit_branches(&mut |_, child| children.push(child));
            for child in children {
                mark(arena, scanned, visited, child);
            }
        }
        Node::Value(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Config::new(dir.path()).segment_size(1 << 20).open().expect("open database");
        (dir, db)
    }

    #[test]
    fn insert_get_update_remove_round_trip() {
        let (_dir, db) = open_test_db();
        let slot = db.create_root().expect("create root");

        db.insert(slot, b"k1", Value::Inline(b"v1".to_vec())).expect("insert");
        assert_eq!(db.get(slot, b"k1").expect("get"), Some(Value::Inline(b"v1".to_vec())));

        assert!(matches!(db.insert(slot, b"k1", Value::Inline(b"dup".to_vec())), Err(Error::KeyAlreadyExists)));

        db.update(slot, b"k1", Value::Inline(b"v2".to_vec())).expect("update");
        assert_eq!(db.get(slot, b"k1").expect("get"), Some(Value::Inline(b"v2".to_vec())));

        db.remove(slot, b"k1").expect("remove");
        assert_eq!(db.get(slot, b"k1").expect("get"), None);
        assert!(matches!(db.remove(slot, b"k1"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn upsert_never_fails_on_either_path() {
        let (_dir, db) = open_test_db();
        let slot = db.create_root().expect("create root");

        db.upsert(slot, b"k", Value::Inline(b"a".to_vec())).expect("upsert insert");
        db.upsert(slot, b"k", Value::Inline(b"b".to_vec())).expect("upsert overwrite");
        assert_eq!(db.get(slot, b"k").expect("get"), Some(Value::Inline(b"b".to_vec())));
    }

    #[test]
    fn failed_mutation_does_not_leak_the_root_reference() {
        let (_dir, db) = open_test_db();
        let slot = db.create_root().expect("create root");
        db.insert(slot, b"k", Value::Inline(b"v".to_vec())).expect("insert");

        // An update on a missing key fails inside `mutate`; the root
        // reference `get_root` took must still be released on that path.
        assert!(db.update(slot, b"missing", Value::Inline(b"v".to_vec())).is_err());
        assert_eq!(db.get(slot, b"k").expect("get"), Some(Value::Inline(b"v".to_vec())));
    }

    #[test]
    fn create_root_is_exhausted_once_every_slot_is_claimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Config::new(dir.path()).segment_size(1 << 20).num_top_roots(2).open().expect("open database");
        db.create_root().expect("first slot");
        db.create_root().expect("second slot");
        assert!(matches!(db.create_root(), Err(Error::TopRootsExhausted)));
    }

    #[test]
    fn count_keys_and_is_empty_respect_the_range() {
        let (_dir, db) = open_test_db();
        let slot = db.create_root().expect("create root");
        for key in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice(), b"d".as_slice()] {
            db.insert(slot, key, Value::Inline(key.to_vec())).expect("insert");
        }

        assert_eq!(db.count_keys(slot, b"", &[0xff]).expect("count"), 4);
        assert_eq!(db.count_keys(slot, b"b", b"d").expect("count"), 2);
        assert!(!db.is_empty(slot, b"", &[0xff]).expect("is_empty"));
        assert!(db.is_empty(slot, b"z", &[0xff]).expect("is_empty"));
    }

    #[test]
    fn is_equal_weak_compares_keys_and_values_but_not_subtree_contents() {
        let (_dir, db) = open_test_db();
        let a = db.create_root().expect("slot a");
        let b = db.create_root().expect("slot b");

        db.insert(a, b"k", Value::Inline(b"v".to_vec())).expect("insert a");
        db.insert(b, b"k", Value::Inline(b"v".to_vec())).expect("insert b");
        assert!(db.is_equal_weak(a, b, b"", &[0xff]).expect("equal"));

        db.update(b, b"k", Value::Inline(b"different".to_vec())).expect("update b");
        assert!(!db.is_equal_weak(a, b, b"", &[0xff]).expect("not equal"));
    }

    #[test]
    fn take_transfers_ownership_and_splice_moves_keys_between_slots() {
        let (_dir, db) = open_test_db();
        let src = db.create_root().expect("src slot");
        let dst = db.create_root().expect("dst slot");

        for key in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()] {
            db.insert(src, key, Value::Inline(key.to_vec())).expect("insert");
        }

        db.splice(dst, src, b"", &[0xff]).expect("splice");

        assert!(db.is_empty(src, b"", &[0xff]).expect("src drained"));
        assert_eq!(db.count_keys(dst, b"", &[0xff]).expect("dst filled"), 3);
        assert_eq!(db.get(dst, b"b").expect("get"), Some(Value::Inline(b"b".to_vec())));
    }

    #[test]
    fn sync_and_reopen_preserve_all_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slot;
        {
            let db = Config::new(dir.path()).segment_size(1 << 20).open().expect("open database");
            slot = db.create_root().expect("create root");
            for i in 0u32..50 {
                db.insert(slot, &i.to_be_bytes(), Value::Inline(i.to_be_bytes().to_vec())).expect("insert");
            }
            db.close().expect("close");
        }

        let reopened = Config::new(dir.path()).segment_size(1 << 20).open().expect("reopen database");
        assert_eq!(reopened.last_recovery().roots_validated, 1);
        for i in 0u32..50 {
            assert_eq!(reopened.get(slot, &i.to_be_bytes()).expect("get"), Some(Value::Inline(i.to_be_bytes().to_vec())));
        }
    }

    #[test]
    fn compact_next_segment_is_harmless_on_a_freshly_opened_store() {
        let (_dir, db) = open_test_db();
        assert!(!db.compact_next_segment().expect("no-op compaction pass"));
    }

    #[test]
    fn start_and_stop_compact_thread_is_idempotent() {
        let (_dir, db) = open_test_db();
        db.start_compact_thread();
        db.start_compact_thread();
        db.stop_compact_thread();
        db.stop_compact_thread();
    }
}
