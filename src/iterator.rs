// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Ordered cursor over a trie rooted at some [`ObjectId`] (spec §4.I).
//!
//! The cursor keeps a stack of frames, one per node on the path from the
//! root to the current position, plus the materialized key bytes for that
//! position. Every frame records how many bytes of the key buffer it is
//! responsible for, so popping a frame truncates the buffer back to exactly
//! where the parent left off.

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::id_allocator::ObjectId;
use crate::node::{BinaryNode, InnerNode, InnerNodeOps, Node, Value};
use crate::session::ReadSession;

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// One ordered position an inner node can be iterated through: its EOF value
/// (if any, sorting before every branch since the empty suffix is the
/// smallest possible key continuation) followed by its branches in ascending
/// byte order.
enum Slot {
    Eof(Value),
    Branch(u8, ObjectId),
}

fn build_slots(inner: &InnerNode) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(inner.num_branches() + 1);
    if let Some(value) = inner.get_eof_value() {
        slots.push(Slot::Eof(value.clone()));
    }
    inner.visit_branches(&mut |b, id| slots.push(Slot::Branch(b, id)));
    slots
}

struct InnerFrame {
    prefix_len: usize,
    slots: Vec<Slot>,
    pos: usize,
    enter_len: usize,
}

struct BinaryFrame {
    node: BinaryNode,
    pos: usize,
    enter_len: usize,
}

enum Frame {
    Inner(InnerFrame),
    Binary(BinaryFrame),
}

/// A live cursor over one trie root (spec §4.I). Holds a read session for its
/// entire lifetime, pinning the release epoch so the bytes it walks are never
/// recycled out from under it.
pub struct Iterator<'a> {
    arena: &'a Arena,
    _session: ReadSession,
    root: ObjectId,
    path: Vec<Frame>,
    key: Vec<u8>,
    valid: bool,
}

impl<'a> Iterator<'a> {
    /// Opens a cursor over the tree rooted at `root`. Takes ownership of one
    /// reference to `root` (the caller's own, e.g. from
    /// [`crate::root_registry::RootRegistry::get_root`]); it is released when
    /// the cursor is dropped. The cursor starts unpositioned; call
    /// [`Self::lower_bound`], [`Self::upper_bound`], or
    /// [`Self::reverse_lower_bound`] before reading it.
    pub fn open(arena: &'a Arena, root: ObjectId) -> Result<Self> {
        let session = arena.start_read_session()?;
        Ok(Self { arena, _session: session, root, path: Vec::new(), key: Vec::new(), valid: false })
    }

    /// The key bytes at the current position. Only meaningful while
    /// [`Self::is_valid`] holds.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether the cursor currently rests on a value.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The value at the current position, if any.
    #[must_use]
    pub fn read_value(&self) -> Option<&Value> {
        if !self.valid {
            return None;
        }
        match self.path.last()? {
            Frame::Binary(bf) => Some(&bf.node.entries()[bf.pos].value),
            Frame::Inner(inf) => match &inf.slots[inf.pos] {
                Slot::Eof(v) => Some(v),
                Slot::Branch(_, _) => None,
            },
        }
    }

    /// Whether the current value is a nested root rather than inline bytes.
    #[must_use]
    pub fn is_subtree(&self) -> bool {
        matches!(self.read_value(), Some(Value::Subtree(_)))
    }

    /// Opens a fresh cursor over the current value's nested root.
    pub fn subtree_iterator(&self) -> Result<Iterator<'a>> {
        match self.read_value() {
            Some(Value::Subtree(id)) => {
                let id = *id;
                self.arena.retain(id)?;
                Iterator::open(self.arena, id)
            }
            _ => Err(Error::CorruptStructure { reason: "subtree_iterator called on a non-subtree value" }),
        }
    }

    fn push_frame(&mut self, id: ObjectId) {
        let enter_len = self.key.len();
        match self.arena.read(id) {
            Node::Binary(node) => self.path.push(Frame::Binary(BinaryFrame { node, pos: 0, enter_len })),
            Node::Inner(inner) => {
                let prefix_len = inner.get_prefix().len();
                self.key.extend_from_slice(inner.get_prefix());
                let slots = build_slots(&inner);
                self.path.push(Frame::Inner(InnerFrame { prefix_len, slots, pos: 0, enter_len }));
            }
            Node::Value(_) => unreachable!("value allocations never sit in the keyed trie structure"),
        }
    }

    /// Descends from the just-pushed top frame to its leftmost (lexically
    /// smallest) value, pushing further frames as needed.
    fn descend_leftmost(&mut self) {
        loop {
            match self.path.last_mut().expect("descend_leftmost called with an empty path") {
                Frame::Binary(bf) => {
                    bf.pos = 0;
                    let entry_suffix = bf.node.entries()[0].suffix.clone();
                    let enter_len = bf.enter_len;
                    self.key.truncate(enter_len);
                    self.key.extend_from_slice(&entry_suffix);
                    self.valid = true;
                    return;
                }
                Frame::Inner(inf) => {
                    inf.pos = 0;
                    let base = inf.enter_len + inf.prefix_len;
                    self.key.truncate(base);
                    match &inf.slots[0] {
                        Slot::Eof(_) => {
                            self.valid = true;
                            return;
                        }
                        Slot::Branch(byte, child) => {
                            let (byte, child) = (*byte, *child);
                            self.key.push(byte);
                            self.push_frame(child);
                        }
                    }
                }
            }
        }
    }

    /// Symmetric to [`Self::descend_leftmost`], for `prev`/`reverse_lower_bound`.
    fn descend_rightmost(&mut self) {
        loop {
            match self.path.last_mut().expect("descend_rightmost called with an empty path") {
                Frame::Binary(bf) => {
                    let last = bf.node.len() - 1;
                    bf.pos = last;
                    let entry_suffix = bf.node.entries()[last].suffix.clone();
                    let enter_len = bf.enter_len;
                    self.key.truncate(enter_len);
                    self.key.extend_from_slice(&entry_suffix);
                    self.valid = true;
                    return;
                }
                Frame::Inner(inf) => {
                    let last = inf.slots.len() - 1;
                    inf.pos = last;
                    let base = inf.enter_len + inf.prefix_len;
                    self.key.truncate(base);
                    match &inf.slots[last] {
                        Slot::Eof(_) => {
                            self.valid = true;
                            return;
                        }
                        Slot::Branch(byte, child) => {
                            let (byte, child) = (*byte, *child);
                            self.key.push(byte);
                            self.push_frame(child);
                        }
                    }
                }
            }
        }
    }

    /// Pops to the closest ancestor with an unexplored next branch, then
    /// descends leftmost from there (spec §4.I `next`).
    fn advance(&mut self) {
        loop {
            match self.path.last_mut() {
                None => {
                    self.valid = false;
                    return;
                }
                Some(Frame::Binary(bf)) => {
                    if bf.pos + 1 < bf.node.len() {
                        bf.pos += 1;
                        let entry_suffix = bf.node.entries()[bf.pos].suffix.clone();
                        let enter_len = bf.enter_len;
                        self.key.truncate(enter_len);
                        self.key.extend_from_slice(&entry_suffix);
                        self.valid = true;
                        return;
                    }
                    let enter_len = bf.enter_len;
                    self.key.truncate(enter_len);
                    self.path.pop();
                }
                Some(Frame::Inner(inf)) => {
                    if inf.pos + 1 < inf.slots.len() {
                        inf.pos += 1;
                        let base = inf.enter_len + inf.prefix_len;
                        self.key.truncate(base);
                        match &inf.slots[inf.pos] {
                            Slot::Eof(_) => {
                                self.valid = true;
                                return;
                            }
                            Slot::Branch(byte, child) => {
                                let (byte, child) = (*byte, *child);
                                self.key.push(byte);
                                self.push_frame(child);
                                self.descend_leftmost();
                                return;
                            }
                        }
                    } else {
                        let enter_len = inf.enter_len;
                        self.key.truncate(enter_len);
                        self.path.pop();
                    }
                }
            }
        }
    }

    /// Symmetric to [`Self::advance`] (spec §4.I `prev`).
    fn retreat(&mut self) {
        loop {
            match self.path.last_mut() {
                None => {
                    self.valid = false;
                    return;
                }
                Some(Frame::Binary(bf)) => {
                    if bf.pos > 0 {
                        bf.pos -= 1;
                        let entry_suffix = bf.node.entries()[bf.pos].suffix.clone();
                        let enter_len = bf.enter_len;
                        self.key.truncate(enter_len);
                        self.key.extend_from_slice(&entry_suffix);
                        self.valid = true;
                        return;
                    }
                    let enter_len = bf.enter_len;
                    self.key.truncate(enter_len);
                    self.path.pop();
                }
                Some(Frame::Inner(inf)) => {
                    if inf.pos > 0 {
                        inf.pos -= 1;
                        let base = inf.enter_len + inf.prefix_len;
                        self.key.truncate(base);
                        match &inf.slots[inf.pos] {
                            Slot::Eof(_) => {
                                self.valid = true;
                                return;
                            }
                            Slot::Branch(byte, child) => {
                                let (byte, child) = (*byte, *child);
                                self.key.push(byte);
                                self.push_frame(child);
                                self.descend_rightmost();
                                return;
                            }
                        }
                    } else {
                        let enter_len = inf.enter_len;
                        self.key.truncate(enter_len);
                        self.path.pop();
                    }
                }
            }
        }
    }

    /// Advances to the next key in ascending order. Returns whether a
    /// position was found.
    pub fn next(&mut self) -> bool {
        if self.path.is_empty() {
            return false;
        }
        self.advance();
        self.valid
    }

    /// Advances to the previous key in ascending order.
    pub fn prev(&mut self) -> bool {
        if self.path.is_empty() {
            return false;
        }
        self.retreat();
        self.valid
    }

    /// Positions the cursor at the smallest key `>= target`, descending from
    /// the root and pushing the lowest branch at or past `target` at each
    /// node (spec §4.I `lower_bound`).
    pub fn lower_bound(&mut self, target: &[u8]) -> bool {
        self.path.clear();
        self.key.clear();
        self.valid = false;
        if self.path_root_is_none() {
            return false;
        }
        self.seek_lower_bound(target);
        self.valid
    }

    /// Positions the cursor at the smallest key strictly greater than `target`.
    pub fn upper_bound(&mut self, target: &[u8]) -> bool {
        if self.lower_bound(target) && self.key == target {
            self.advance();
        }
        self.valid
    }

    /// Positions the cursor at the largest key `<= target`.
    pub fn reverse_lower_bound(&mut self, target: &[u8]) -> bool {
        self.path.clear();
        self.key.clear();
        self.valid = false;
        if self.path_root_is_none() {
            return false;
        }
        self.seek_reverse_lower_bound(target);
        self.valid
    }

    fn path_root_is_none(&self) -> bool {
        self.root.is_none()
    }

    fn seek_lower_bound(&mut self, mut target: &[u8]) {
        let mut id = self.root;
        loop {
            match self.arena.read(id) {
                Node::Binary(node) => {
                    let enter_len = self.key.len();
                    let insert_at = node.find(target).unwrap_or_else(|idx| idx);
                    if insert_at < node.len() {
                        let suffix = node.entries()[insert_at].suffix.clone();
                        self.key.extend_from_slice(&suffix);
                        self.path.push(Frame::Binary(BinaryFrame { node, pos: insert_at, enter_len }));
                        self.valid = true;
                    } else {
                        self.advance();
                    }
                    return;
                }
                Node::Inner(inner) => {
                    let prefix = inner.get_prefix().to_vec();
                    let common = common_prefix_len(&prefix, target);
                    let enter_len = self.key.len();

                    if common < prefix.len() {
                        let target_is_smaller = common == target.len() || target[common] < prefix[common];
                        if target_is_smaller {
                            self.key.extend_from_slice(&prefix);
                            let slots = build_slots(&inner);
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: 0, enter_len }));
                            self.descend_leftmost();
                        } else {
                            self.advance();
                        }
                        return;
                    }

                    self.key.extend_from_slice(&prefix);
                    let residual = &target[common..];
                    let slots = build_slots(&inner);

                    if residual.is_empty() {
                        self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: 0, enter_len }));
                        self.descend_leftmost();
                        return;
                    }

                    let branch_byte = residual[0];
                    let found = slots.iter().position(|s| matches!(s, Slot::Branch(b, _) if *b >= branch_byte));
                    match found {
                        None => {
                            self.key.truncate(enter_len);
                            self.advance();
                            return;
                        }
                        Some(i) => {
                            let (byte, child) = match &slots[i] {
                                Slot::Branch(b, c) => (*b, *c),
                                Slot::Eof(_) => unreachable!("eof slot never matches a non-empty branch search"),
                            };
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: i, enter_len }));
                            self.key.push(byte);
                            if byte == branch_byte {
                                id = child;
                                target = &residual[1..];
                                continue;
                            }
                            self.push_frame(child);
                            self.descend_leftmost();
                            return;
                        }
                    }
                }
                Node::Value(_) => unreachable!("value allocations never sit in the keyed trie structure"),
            }
        }
    }

    fn seek_reverse_lower_bound(&mut self, mut target: &[u8]) {
        let mut id = self.root;
        loop {
            match self.arena.read(id) {
                Node::Binary(node) => {
                    let enter_len = self.key.len();
                    let at = match node.find(target) {
                        Ok(idx) => Some(idx),
                        Err(0) => None,
                        Err(idx) => Some(idx - 1),
                    };
                    match at {
                        Some(idx) => {
                            let suffix = node.entries()[idx].suffix.clone();
                            self.key.extend_from_slice(&suffix);
                            self.path.push(Frame::Binary(BinaryFrame { node, pos: idx, enter_len }));
                            self.valid = true;
                        }
                        None => self.retreat(),
                    }
                    return;
                }
                Node::Inner(inner) => {
                    let prefix = inner.get_prefix().to_vec();
                    let common = common_prefix_len(&prefix, target);
                    let enter_len = self.key.len();

                    if common < prefix.len() {
                        let target_is_greater = common < target.len() && target[common] > prefix[common];
                        if target_is_greater {
                            self.key.extend_from_slice(&prefix);
                            let slots = build_slots(&inner);
                            let last = slots.len() - 1;
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: last, enter_len }));
                            self.descend_rightmost();
                        } else {
                            self.retreat();
                        }
                        return;
                    }

                    self.key.extend_from_slice(&prefix);
                    let residual = &target[common..];
                    let slots = build_slots(&inner);
                    let has_eof = matches!(slots.first(), Some(Slot::Eof(_)));

                    if residual.is_empty() {
                        if has_eof {
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: 0, enter_len }));
                            self.valid = true;
                        } else {
                            self.key.truncate(enter_len);
                            self.retreat();
                        }
                        return;
                    }

                    let branch_byte = residual[0];
                    let mut chosen = None;
                    for (i, slot) in slots.iter().enumerate() {
                        if let Slot::Branch(b, _) = slot {
                            if *b <= branch_byte {
                                chosen = Some(i);
                            } else {
                                break;
                            }
                        }
                    }
                    match chosen {
                        Some(i) => {
                            let (byte, child) = match &slots[i] {
                                Slot::Branch(b, c) => (*b, *c),
                                Slot::Eof(_) => unreachable!("eof slot never matches a branch search"),
                            };
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: i, enter_len }));
                            self.key.push(byte);
                            if byte == branch_byte {
                                id = child;
                                target = &residual[1..];
                                continue;
                            }
                            self.push_frame(child);
                            self.descend_rightmost();
                            return;
                        }
                        None if has_eof => {
                            self.path.push(Frame::Inner(InnerFrame { prefix_len: prefix.len(), slots, pos: 0, enter_len }));
                            self.valid = true;
                            return;
                        }
                        None => {
                            self.key.truncate(enter_len);
                            self.retreat();
                            return;
                        }
                    }
                }
                Node::Value(_) => unreachable!("value allocations never sit in the keyed trie structure"),
            }
        }
    }
}

impl Drop for Iterator<'_> {
    fn drop(&mut self) {
        self.arena.release(self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::WriteSession;
    use test_log::test;

    fn test_arena() -> (tempfile::TempDir, Arena, Config) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path()).segment_size(1 << 20).max_segment_count(64);
        let arena = Arena::open(&config).expect("open arena");
        (dir, arena, config)
    }

    fn build_tree(arena: &Arena, config: &Config, writer: &WriteSession, keys: &[&[u8]]) -> ObjectId {
        let region = arena.new_region();
        let mut root = ObjectId::NONE;
        for key in keys {
            root = crate::trie::insert(arena, root, region, key, Value::Inline(key.to_vec()), writer, config).expect("insert");
        }
        root
    }

    #[test]
    fn forward_iteration_visits_keys_in_sorted_order() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let root = build_tree(&arena, &config, &writer, &[b"banana", b"apple", b"cherry"]);
        arena.retain(root).expect("iterator needs its own reference");

        let mut it = Iterator::open(&arena, root).expect("open cursor");
        assert!(it.lower_bound(b""));
        let mut seen = Vec::new();
        loop {
            seen.push(it.key().to_vec());
            if !it.next() {
                break;
            }
        }
        assert_eq!(seen, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn reverse_iteration_visits_keys_in_descending_order() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let root = build_tree(&arena, &config, &writer, &[b"banana", b"apple", b"cherry"]);
        arena.retain(root).expect("iterator needs its own reference");

        let mut it = Iterator::open(&arena, root).expect("open cursor");
        assert!(it.reverse_lower_bound(&[0xff]));
        let mut seen = Vec::new();
        loop {
            seen.push(it.key().to_vec());
            if !it.prev() {
                break;
            }
        }
        assert_eq!(seen, vec![b"cherry".to_vec(), b"banana".to_vec(), b"apple".to_vec()]);
    }

    #[test]
    fn lower_bound_finds_the_smallest_key_at_or_above_target() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let root = build_tree(&arena, &config, &writer, &[b"a", b"c", b"e"]);
        arena.retain(root).expect("iterator needs its own reference");

        let mut it = Iterator::open(&arena, root).expect("open cursor");
        assert!(it.lower_bound(b"b"));
        assert_eq!(it.key(), b"c");

        assert!(it.lower_bound(b"c"));
        assert_eq!(it.key(), b"c");

        assert!(!it.lower_bound(b"z"), "no key at or above z");
    }

    #[test]
    fn upper_bound_skips_an_exact_match() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let root = build_tree(&arena, &config, &writer, &[b"a", b"c", b"e"]);
        arena.retain(root).expect("iterator needs its own reference");

        let mut it = Iterator::open(&arena, root).expect("open cursor");
        assert!(it.upper_bound(b"c"));
        assert_eq!(it.key(), b"e");
    }

    #[test]
    fn empty_tree_iterator_is_never_valid() {
        let (_dir, arena, _config) = test_arena();
        let mut it = Iterator::open(&arena, ObjectId::NONE).expect("open cursor");
        assert!(!it.lower_bound(b""));
        assert!(!it.is_valid());
    }

    #[test]
    fn subtree_iterator_descends_into_a_nested_root() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let child_root = build_tree(&arena, &config, &writer, &[b"inner"]);
        let parent_root = build_tree(&arena, &config, &writer, &[]);
        let parent_region = parent_root.region();
        let parent_root = crate::trie::insert(&arena, parent_root, parent_region, b"nested", Value::Subtree(child_root), &writer, &config).expect("insert subtree");
        arena.retain(parent_root).expect("iterator needs its own reference");

        let mut it = Iterator::open(&arena, parent_root).expect("open cursor");
        assert!(it.lower_bound(b""));
        assert!(it.is_subtree());

        let mut sub = it.subtree_iterator().expect("open subtree cursor");
        assert!(sub.lower_bound(b""));
        assert_eq!(sub.key(), b"inner");
    }
}
