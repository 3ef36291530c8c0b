// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The radix trie algorithms (spec §4.F): insert, update, upsert, remove, and
//! read-only lookup, layered over [`Arena`]'s construct/relocate/retain/
//! release primitives.
//!
//! Every recursive step owns exactly one reference to the node id it was
//! handed: it either keeps that id alive (same id returned, content rewritten
//! in place), transfers its ownership into a freshly built replacement
//! (clone-and-set under a shared refcount), or releases it and returns
//! [`ObjectId::NONE`] once its subtree becomes empty. Callers never retain or
//! release an id themselves past what this contract already accounts for.

use crate::arena::Arena;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{entry_encoded_len, BinaryNode, FullNode, InnerNode, InnerNodeOps, Node, SetlistNode, Value};
use crate::id_allocator::ObjectId;
use crate::session::WriteSession;

/// Minimum bucket population before a full-but-out-of-slack binary node pays
/// for a refactor into an inner node; very small buckets just grow instead.
const MIN_POPULATION_FOR_REFACTOR: usize = 4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Mode {
    Insert,
    Update,
    Upsert,
    Remove,
}

/// Inserts `key`, failing with [`Error::KeyAlreadyExists`] if it is already
/// present.
pub fn insert(arena: &Arena, root: ObjectId, region: u32, key: &[u8], value: Value, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    dispatch(arena, root, region, key, Some(value), Mode::Insert, writer, config)
}

/// Updates `key`'s value, failing with [`Error::NoSuchKey`] if absent.
pub fn update(arena: &Arena, root: ObjectId, region: u32, key: &[u8], value: Value, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    dispatch(arena, root, region, key, Some(value), Mode::Update, writer, config)
}

/// Inserts or updates `key` unconditionally.
pub fn upsert(arena: &Arena, root: ObjectId, region: u32, key: &[u8], value: Value, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    dispatch(arena, root, region, key, Some(value), Mode::Upsert, writer, config)
}

/// Removes `key`, failing with [`Error::NoSuchKey`] if absent. Returns the new
/// root, which is [`ObjectId::NONE`] if the tree became empty.
pub fn remove(arena: &Arena, root: ObjectId, region: u32, key: &[u8], writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    dispatch(arena, root, region, key, None, Mode::Remove, writer, config)
}

/// Read-only descent: returns the value currently stored under `key`, if any.
/// Never allocates or mutates.
pub fn get(arena: &Arena, root: ObjectId, key: &[u8]) -> Option<Value> {
    let mut current = root;
    let mut remaining = key;
    loop {
        if current.is_none() {
            return None;
        }
        match arena.read(current) {
            Node::Binary(bucket) => return bucket.find(remaining).ok().map(|i| bucket.entries()[i].value.clone()),
            Node::Inner(inner) => {
                let prefix_len = common_prefix_len(inner.get_prefix(), remaining);
                if prefix_len != inner.get_prefix().len() {
                    return None;
                }
                remaining = &remaining[prefix_len..];
                if remaining.is_empty() {
                    return inner.get_eof_value().cloned();
                }
                let branch = inner.get_branch(remaining[0]);
                remaining = &remaining[1..];
                current = branch;
            }
            Node::Value(_) => unreachable!("value allocations never sit in the keyed trie structure"),
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn dispatch(arena: &Arena, root: ObjectId, region: u32, key: &[u8], value: Option<Value>, mode: Mode, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    if key.len() as u32 > config.max_key_size {
        return Err(Error::KeyTooLarge { len: key.len(), max: config.max_key_size as usize });
    }
    descend(arena, root, region, key, value, mode, writer, config)
}

fn descend(arena: &Arena, id: ObjectId, region: u32, key: &[u8], value: Option<Value>, mode: Mode, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    if id.is_none() {
        return match mode {
            Mode::Update | Mode::Remove => Err(Error::NoSuchKey),
            Mode::Insert | Mode::Upsert => {
                let value = value.expect("insert/upsert modes always carry a value");
                let node = Node::Binary(BinaryNode::singleton(key.to_vec(), value, config.binary_node_initial_size));
                arena.construct(region, &node, writer)
            }
        };
    }

    match arena.read(id) {
        Node::Binary(bucket) => upsert_binary(arena, id, region, bucket, key, value, mode, writer, config),
        Node::Inner(inner) => upsert_inner(arena, id, region, inner, key, value, mode, writer, config),
        Node::Value(_) => unreachable!("value allocations never sit in the keyed trie structure"),
    }
}

// ---- inner-node upsert (spec §4.F "Inner-node upsert") --------------------

fn upsert_inner(arena: &Arena, id: ObjectId, region: u32, inner: InnerNode, key: &[u8], value: Option<Value>, mode: Mode, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    let prefix_len = common_prefix_len(inner.get_prefix(), key);

    if prefix_len < inner.get_prefix().len() {
        // Case B: `C ⊊ P` — the key diverges partway through this node's prefix.
        if matches!(mode, Mode::Update | Mode::Remove) {
            return Err(Error::NoSuchKey);
        }
        let value = value.expect("insert/upsert modes always carry a value");
        return split_inner(arena, id, region, inner.get_prefix(), prefix_len, key, value, writer, config);
    }

    // Case A: `C == P`.
    let unique = arena.try_lock_unique(id);
    let residual = &key[prefix_len..];

    if residual.is_empty() {
        return upsert_eof(arena, id, region, inner, value, mode, unique, writer);
    }

    let branch_byte = residual[0];
    let remainder = &residual[1..];
    let child = inner.get_branch(branch_byte);

    if child.is_none() {
        return match mode {
            Mode::Update | Mode::Remove => {
                if unique {
                    arena.unlock_unique(id);
                }
                Err(Error::NoSuchKey)
            }
            Mode::Insert | Mode::Upsert => {
                let value = value.expect("insert/upsert modes always carry a value");
                let child_region = arena.new_region();
                let leaf = leaf_for(child_region, remainder, value, writer, arena, config)?;
                install_branch(arena, id, region, inner, unique, branch_byte, None, leaf, writer, config)
            }
        };
    }

    let new_child = descend(arena, child, child.region(), remainder, value, mode, writer, config)?;

    if new_child.is_none() {
        install_branch_removed(arena, id, region, inner, unique, branch_byte, writer)
    } else {
        install_branch(arena, id, region, inner, unique, branch_byte, Some(child), new_child, writer, config)
    }
}

fn leaf_for(region: u32, suffix: &[u8], value: Value, writer: &WriteSession, arena: &Arena, config: &Config) -> Result<ObjectId> {
    let node = Node::Binary(BinaryNode::singleton(suffix.to_vec(), value, config.binary_node_initial_size));
    arena.construct(region, &node, writer)
}

/// Copies `inner`'s unchanged structure, retaining every child (and the EOF
/// value, if kept) that the clone will now reference alongside the original —
/// `skip` names the one slot the caller is about to overwrite or drop, whose
/// reference is not duplicated.
#[derive(Copy, Clone)]
enum Skip {
    Nothing,
    Branch(u8),
    Eof,
}

fn clone_retain_inner(arena: &Arena, inner: &InnerNode, skip: Skip) -> Result<InnerNode> {
    let cloned = inner.clone();
    if !matches!(skip, Skip::Eof) {
        if let Some(Value::Subtree(id)) = cloned.get_eof_value() {
            arena.retain(*id)?;
        }
    }
    let skip_branch = if let Skip::Branch(b) = skip { Some(b) } else { None };
    let mut to_retain = Vec::new();
    cloned.visit_branches(&mut |b, child| {
        if Some(b) != skip_branch {
            to_retain.push(child);
        }
    });
    for child in to_retain {
        arena.retain(child)?;
    }
    Ok(cloned)
}

fn refactor_to_full_if_needed(inner: InnerNode, full_node_threshold: u16) -> InnerNode {
    match inner {
        InnerNode::Setlist(setlist) if !setlist.can_add_branch(full_node_threshold) => {
            InnerNode::Full(FullNode::from_setlist(&setlist))
        }
        other => other,
    }
}

fn install_branch(
    arena: &Arena,
    id: ObjectId,
    region: u32,
    mut inner: InnerNode,
    unique: bool,
    branch_byte: u8,
    old_child: Option<ObjectId>,
    new_child: ObjectId,
    writer: &WriteSession,
    config: &Config,
) -> Result<ObjectId> {
    if unique {
        match old_child {
            Some(old) if old != new_child => {
                inner.set_branch(branch_byte, new_child);
                arena.release(old);
            }
            Some(_) => {}
            None => {
                inner = refactor_to_full_if_needed(inner, config.full_node_threshold);
                inner.add_branch(branch_byte, new_child);
            }
        }
        arena.relocate(id, &Node::Inner(inner), writer)?;
        return Ok(id);
    }

    let skip = if old_child.is_some() { Skip::Branch(branch_byte) } else { Skip::Nothing };
    let mut cloned = clone_retain_inner(arena, &inner, skip)?;
    match old_child {
        Some(_) => cloned.set_branch(branch_byte, new_child),
        None => {
            cloned = refactor_to_full_if_needed(cloned, config.full_node_threshold);
            cloned.add_branch(branch_byte, new_child);
        }
    }
    arena.construct(region, &Node::Inner(cloned), writer)
}

fn install_branch_removed(arena: &Arena, id: ObjectId, region: u32, mut inner: InnerNode, unique: bool, branch_byte: u8, writer: &WriteSession) -> Result<ObjectId> {
    if unique {
        inner.remove_branch(branch_byte);
        if inner.num_branches() == 0 && !inner.has_eof_value() {
            arena.release(id);
            return Ok(ObjectId::NONE);
        }
        arena.relocate(id, &Node::Inner(inner), writer)?;
        return Ok(id);
    }

    let mut cloned = clone_retain_inner(arena, &inner, Skip::Branch(branch_byte))?;
    cloned.remove_branch(branch_byte);
    if cloned.num_branches() == 0 && !cloned.has_eof_value() {
        return Ok(ObjectId::NONE);
    }
    arena.construct(region, &Node::Inner(cloned), writer)
}

fn upsert_eof(arena: &Arena, id: ObjectId, region: u32, mut inner: InnerNode, value: Option<Value>, mode: Mode, unique: bool, writer: &WriteSession) -> Result<ObjectId> {
    let had_eof = inner.has_eof_value();
    match mode {
        Mode::Insert if had_eof => {
            if unique {
                arena.unlock_unique(id);
            }
            return Err(Error::KeyAlreadyExists);
        }
        (Mode::Update | Mode::Remove) if !had_eof => {
            if unique {
                arena.unlock_unique(id);
            }
            return Err(Error::NoSuchKey);
        }
        _ => {}
    }

    if unique {
        if let Some(Value::Subtree(old)) = inner.get_eof_value().cloned() {
            arena.release(old);
        }
        match mode {
            Mode::Remove => inner.set_eof_value(None),
            Mode::Insert | Mode::Upsert | Mode::Update => {
                inner.set_eof_value(Some(value.expect("non-remove modes always carry a value")));
            }
        }
        if inner.num_branches() == 0 && !inner.has_eof_value() {
            arena.release(id);
            return Ok(ObjectId::NONE);
        }
        arena.relocate(id, &Node::Inner(inner), writer)?;
        return Ok(id);
    }

    let mut cloned = clone_retain_inner(arena, &inner, Skip::Eof)?;
    match mode {
        Mode::Remove => {
            cloned.set_eof_value(None);
            if cloned.num_branches() == 0 && !cloned.has_eof_value() {
                return Ok(ObjectId::NONE);
            }
        }
        Mode::Insert | Mode::Upsert | Mode::Update => {
            cloned.set_eof_value(Some(value.expect("non-remove modes always carry a value")));
        }
    }
    arena.construct(region, &Node::Inner(cloned), writer)
}

/// Case B: the key diverges from `prefix` at `common_len`. The existing node
/// (`id`, untouched) becomes one branch of a brand-new setlist built in a
/// fresh region; `id`'s single reference simply moves from whatever slot
/// pointed at it to the new setlist's branch table.
fn split_inner(arena: &Arena, id: ObjectId, region: u32, prefix: &[u8], common_len: usize, key: &[u8], value: Value, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    let common = prefix[..common_len].to_vec();
    let existing_branch_byte = prefix[common_len];
    let residual_key = &key[common_len..];

    let new_region = arena.new_region();
    let setlist = if residual_key.is_empty() {
        SetlistNode::with_eof_and_branch(common, value, (existing_branch_byte, id))
    } else {
        let new_branch_byte = residual_key[0];
        let leaf = leaf_for(new_region, &residual_key[1..], value, writer, arena, config)?;
        SetlistNode::with_two_branches(common, (existing_branch_byte, id), (new_branch_byte, leaf))
    };

    arena.construct(region, &Node::Inner(InnerNode::Setlist(setlist)), writer)
}

// ---- binary-node upsert (spec §4.F "Binary-node upsert") -------------------

fn upsert_binary(arena: &Arena, id: ObjectId, region: u32, bucket: BinaryNode, key: &[u8], value: Option<Value>, mode: Mode, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    let unique = arena.try_lock_unique(id);

    match bucket.find(key) {
        Ok(index) => match mode {
            Mode::Insert => {
                if unique {
                    arena.unlock_unique(id);
                }
                Err(Error::KeyAlreadyExists)
            }
            Mode::Update | Mode::Upsert => {
                let value = value.expect("update/upsert modes always carry a value");
                apply_binary_update(arena, id, region, bucket, index, value, unique, writer)
            }
            Mode::Remove => apply_binary_remove(arena, id, region, bucket, index, unique, writer),
        },
        Err(insert_at) => match mode {
            Mode::Update | Mode::Remove => {
                if unique {
                    arena.unlock_unique(id);
                }
                Err(Error::NoSuchKey)
            }
            Mode::Insert | Mode::Upsert => {
                let value = value.expect("insert/upsert modes always carry a value");
                apply_binary_insert(arena, id, region, bucket, insert_at, key, value, unique, writer, config)
            }
        },
    }
}

fn clone_retain_binary(arena: &Arena, bucket: &BinaryNode, skip_index: Option<usize>) -> Result<BinaryNode> {
    let cloned = bucket.clone();
    for (i, entry) in cloned.entries().iter().enumerate() {
        if Some(i) == skip_index {
            continue;
        }
        if let Value::Subtree(id) = &entry.value {
            arena.retain(*id)?;
        }
    }
    Ok(cloned)
}

fn apply_binary_update(arena: &Arena, id: ObjectId, region: u32, bucket: BinaryNode, index: usize, new_value: Value, unique: bool, writer: &WriteSession) -> Result<ObjectId> {
    if unique {
        let mut bucket = bucket;
        let old_value = bucket.entries()[index].value.clone();
        bucket.update_at(index, new_value);
        if let Value::Subtree(old) = old_value {
            arena.release(old);
        }
        arena.relocate(id, &Node::Binary(bucket), writer)?;
        return Ok(id);
    }

    let mut cloned = clone_retain_binary(arena, &bucket, Some(index))?;
    cloned.update_at(index, new_value);
    arena.construct(region, &Node::Binary(cloned), writer)
}

fn apply_binary_remove(arena: &Arena, id: ObjectId, region: u32, bucket: BinaryNode, index: usize, unique: bool, writer: &WriteSession) -> Result<ObjectId> {
    if unique {
        let mut bucket = bucket;
        let removed = bucket.remove_at(index);
        if let Value::Subtree(old) = removed.value {
            arena.release(old);
        }
        if bucket.is_empty() {
            arena.release(id);
            return Ok(ObjectId::NONE);
        }
        arena.relocate(id, &Node::Binary(bucket), writer)?;
        return Ok(id);
    }

    let mut cloned = clone_retain_binary(arena, &bucket, Some(index))?;
    cloned.remove_at(index);
    if cloned.is_empty() {
        return Ok(ObjectId::NONE);
    }
    arena.construct(region, &Node::Binary(cloned), writer)
}

#[allow(clippy::too_many_arguments)]
fn apply_binary_insert(arena: &Arena, id: ObjectId, region: u32, bucket: BinaryNode, insert_at: usize, key: &[u8], value: Value, unique: bool, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    let entry_len = entry_encoded_len(key, &value) as u32;

    if bucket.insert_requires_refactor(entry_len, MIN_POPULATION_FOR_REFACTOR) {
        return refactor_binary(arena, id, region, bucket, unique, key, value, writer, config);
    }

    if unique {
        let mut bucket = bucket;
        bucket.insert_at(insert_at, key.to_vec(), value);
        arena.relocate(id, &Node::Binary(bucket), writer)?;
        return Ok(id);
    }

    let mut cloned = clone_retain_binary(arena, &bucket, None)?;
    cloned.insert_at(insert_at, key.to_vec(), value);
    arena.construct(region, &Node::Binary(cloned), writer)
}

/// Splits an overflowing binary bucket into an inner node whose children are
/// fresh sub-buckets partitioned by first byte (spec §4.F "refactor to
/// inner"). Entries with an empty residual (a key terminating exactly at this
/// position) become the new node's EOF value instead of a branch.
#[allow(clippy::too_many_arguments)]
fn refactor_binary(arena: &Arena, id: ObjectId, region: u32, bucket: BinaryNode, unique: bool, new_key: &[u8], new_value: Value, writer: &WriteSession, config: &Config) -> Result<ObjectId> {
    let mut items: Vec<(Vec<u8>, Value)> = bucket.entries().iter().map(|e| (e.suffix.clone(), e.value.clone())).collect();

    if !unique {
        for (_, value) in &items {
            if let Value::Subtree(child) = value {
                arena.retain(*child)?;
            }
        }
    }
    items.push((new_key.to_vec(), new_value));

    let new_region = arena.new_region();
    let node = build_partition(arena, new_region, items, writer, config)?;

    if unique {
        arena.unlock_unique(id);
        arena.release(id);
    }

    arena.construct(region, &node, writer)
}

fn build_partition(arena: &Arena, region: u32, items: Vec<(Vec<u8>, Value)>, writer: &WriteSession, config: &Config) -> Result<Node> {
    let mut eof_value: Option<Value> = None;
    let mut groups: std::collections::BTreeMap<u8, Vec<(Vec<u8>, Value)>> = std::collections::BTreeMap::new();

    for (suffix, value) in items {
        if suffix.is_empty() {
            eof_value = Some(value);
        } else {
            let first = suffix[0];
            groups.entry(first).or_default().push((suffix[1..].to_vec(), value));
        }
    }

    let mut branches = Vec::with_capacity(groups.len());
    for (byte, group_items) in groups {
        let mut sub = BinaryNode::empty(config.binary_node_initial_size);
        for (suffix, value) in group_items {
            let at = sub.find(&suffix).expect_err("a refactored bucket cannot contain a duplicate key");
            sub.insert_at(at, suffix, value);
        }
        let child = arena.construct(region, &Node::Binary(sub), writer)?;
        branches.push((byte, child));
    }

    let setlist = SetlistNode::new(Vec::new(), eof_value, branches);
    let inner = refactor_to_full_if_needed(InnerNode::Setlist(setlist), config.full_node_threshold);
    Ok(Node::Inner(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn test_arena() -> (tempfile::TempDir, Arena, Config) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::new(dir.path()).segment_size(1 << 20).max_segment_count(64);
        let arena = Arena::open(&config).expect("open arena");
        (dir, arena, config)
    }

    #[test]
    fn insert_then_get_round_trips_a_value() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let root = insert(&arena, ObjectId::NONE, region, b"hello", Value::Inline(b"world".to_vec()), &writer, &config).expect("insert");
        assert_eq!(get(&arena, root, b"hello"), Some(Value::Inline(b"world".to_vec())));
        assert_eq!(get(&arena, root, b"missing"), None);
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let root = insert(&arena, ObjectId::NONE, region, b"k", Value::Inline(vec![1]), &writer, &config).expect("first insert");
        let err = insert(&arena, root, region, b"k", Value::Inline(vec![2]), &writer, &config).unwrap_err();
        assert!(matches!(err, Error::KeyAlreadyExists));
    }

    #[test]
    fn update_rejects_missing_key() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let err = update(&arena, ObjectId::NONE, region, b"k", Value::Inline(vec![1]), &writer, &config).unwrap_err();
        assert!(matches!(err, Error::NoSuchKey));
    }

    #[test]
    fn upsert_inserts_then_overwrites() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let root = upsert(&arena, ObjectId::NONE, region, b"k", Value::Inline(vec![1]), &writer, &config).expect("upsert insert");
        assert_eq!(get(&arena, root, b"k"), Some(Value::Inline(vec![1])));

        let root = upsert(&arena, root, region, b"k", Value::Inline(vec![2]), &writer, &config).expect("upsert overwrite");
        assert_eq!(get(&arena, root, b"k"), Some(Value::Inline(vec![2])));
    }

    #[test]
    fn remove_collapses_tree_back_to_none() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let root = insert(&arena, ObjectId::NONE, region, b"k", Value::Inline(vec![9]), &writer, &config).expect("insert");
        let root = remove(&arena, root, region, b"k", &writer, &config).expect("remove");
        assert!(root.is_none());
        assert_eq!(get(&arena, root, b"k"), None);
    }

    #[test]
    fn remove_missing_key_errors() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let root = insert(&arena, ObjectId::NONE, region, b"k", Value::Inline(vec![9]), &writer, &config).expect("insert");
        let err = remove(&arena, root, region, b"other", &writer, &config).unwrap_err();
        assert!(matches!(err, Error::NoSuchKey));
    }

    #[test]
    fn key_too_large_is_rejected_up_front() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let oversized = vec![0u8; config.max_key_size as usize + 1];
        let err = insert(&arena, ObjectId::NONE, region, &oversized, Value::Inline(vec![1]), &writer, &config).unwrap_err();
        assert!(matches!(err, Error::KeyTooLarge { .. }));
    }

    #[test]
    fn many_inserts_refactor_the_bucket_into_an_inner_node_and_stay_queryable() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let mut root = ObjectId::NONE;
        let keys: Vec<Vec<u8>> = (0u32..400).map(|i| i.to_be_bytes().to_vec()).collect();
        for key in &keys {
            root = insert(&arena, root, region, key, Value::Inline(key.clone()), &writer, &config).expect("insert");
        }

        assert!(matches!(arena.read(root), Node::Inner(_)), "bucket should have refactored by now");
        for key in &keys {
            assert_eq!(get(&arena, root, key), Some(Value::Inline(key.clone())));
        }

        for key in &keys {
            root = remove(&arena, root, region, key, &writer, &config).expect("remove");
        }
        assert!(root.is_none());
    }

    #[test]
    fn diverging_prefix_splits_inner_node() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let region = arena.new_region();

        let mut root = ObjectId::NONE;
        for key in [b"aaaa".as_slice(), b"aaab".as_slice(), b"ab".as_slice()] {
            root = insert(&arena, root, region, key, Value::Inline(key.to_vec()), &writer, &config).expect("insert");
        }
        for key in [b"aaaa".as_slice(), b"aaab".as_slice(), b"ab".as_slice()] {
            assert_eq!(get(&arena, root, key), Some(Value::Inline(key.to_vec())));
        }
    }

    #[test]
    fn subtree_value_is_retained_independently_of_the_parent_tree() {
        let (_dir, arena, config) = test_arena();
        let writer = arena.start_write_session().expect("writer");
        let parent_region = arena.new_region();
        let child_region = arena.new_region();

        let child_root = insert(&arena, ObjectId::NONE, child_region, b"ck", Value::Inline(b"cv".to_vec()), &writer, &config).expect("child insert");
        arena.retain(child_root).expect("caller keeps its own reference");

        let parent_root = insert(&arena, ObjectId::NONE, parent_region, b"pk", Value::Subtree(child_root), &writer, &config).expect("parent insert");
        let parent_root = remove(&arena, parent_root, parent_region, b"pk", &writer, &config).expect("remove");
        assert!(parent_root.is_none());

        // The caller's own retained reference keeps the child tree alive even
        // though the parent's reference to it was just released.
        assert_eq!(get(&arena, child_root, b"ck"), Some(Value::Inline(b"cv".to_vec())));
        arena.release(child_root);
    }
}
