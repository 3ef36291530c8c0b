// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The `setlist` (sparse) and `full` (dense, 256-way) inner node shapes
//! (spec §4.E). Both share one contract, dispatched through [`InnerNodeOps`].

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use enum_dispatch::enum_dispatch;
use std::io::Cursor;

use super::Value;
use crate::id_allocator::{id_to_raw, raw_to_id, ObjectId};

fn write_value_opt(out: &mut Vec<u8>, value: &Option<Value>) {
    match value {
        Some(v) => {
            out.write_u8(1).expect("vec write cannot fail");
            v.write(out);
        }
        None => out.write_u8(0).expect("vec write cannot fail"),
    }
}

fn read_value_opt(cursor: &mut Cursor<&[u8]>) -> Option<Value> {
    let present = cursor.read_u8().unwrap_or(0);
    if present == 1 {
        Some(Value::read(cursor))
    } else {
        None
    }
}

/// Shared operations on inner nodes (spec §4.E's shared contract).
#[enum_dispatch]
pub trait InnerNodeOps {
    /// The common-prefix bytes every key under this node shares.
    fn get_prefix(&self) -> &[u8];
    /// Number of non-empty branches.
    fn num_branches(&self) -> usize;
    /// Whether a key terminates exactly at this node's prefix.
    fn has_eof_value(&self) -> bool;
    /// The EOF value, if any.
    fn get_eof_value(&self) -> Option<&Value>;
    /// Sets (or clears, with `None`) the EOF value.
    fn set_eof_value(&mut self, value: Option<Value>);
    /// The child at branch byte `b`, or `ObjectId::NONE`.
    fn get_branch(&self, b: u8) -> ObjectId;
    /// Overwrites an existing branch (caller already confirmed it exists).
    fn set_branch(&mut self, b: u8, id: ObjectId);
    /// Adds a new branch. Caller must have checked [`Self::can_add_branch`].
    fn add_branch(&mut self, b: u8, id: ObjectId);
    /// Removes a branch.
    fn remove_branch(&mut self, b: u8);
    /// Whether one more branch fits without a shape refactor.
    fn can_add_branch(&self, full_node_threshold: u16) -> bool;
    /// Visits every `(branch_byte, child_id)` pair.
    fn visit_branches(&self, visit: &mut dyn FnMut(u8, ObjectId));
}

/// A sparse inner node: prefix + optional EOF value + an ordered list of
/// `(branch_byte, child_id)` pairs, strictly ascending by branch byte
/// (spec invariant §3.3).
#[derive(Clone, Debug)]
pub struct SetlistNode {
    prefix: Vec<u8>,
    eof_value: Option<Value>,
    branches: Vec<(u8, ObjectId)>,
}

impl SetlistNode {
    /// Builds a setlist with exactly two branches, ordered by branch byte
    /// (spec §4.F Case B, "Tie-break").
    #[must_use]
    pub fn with_two_branches(prefix: Vec<u8>, a: (u8, ObjectId), b: (u8, ObjectId)) -> Self {
        let mut branches = vec![a, b];
        branches.sort_by_key(|(byte, _)| *byte);
        Self { prefix, eof_value: None, branches }
    }

    /// Builds a setlist with an EOF value and no branches yet (the `|K| ==
    /// |C|` sub-case of Case B).
    #[must_use]
    pub fn with_eof_and_branch(prefix: Vec<u8>, eof_value: Value, branch: (u8, ObjectId)) -> Self {
        Self { prefix, eof_value: Some(eof_value), branches: vec![branch] }
    }

    /// Builds a setlist from an arbitrary branch list and optional EOF value,
    /// used when partitioning a refactored binary bucket (spec §4.F
    /// "Binary-node upsert" refactor step). `branches` need not already be
    /// sorted.
    #[must_use]
    pub fn new(prefix: Vec<u8>, eof_value: Option<Value>, mut branches: Vec<(u8, ObjectId)>) -> Self {
        branches.sort_by_key(|(byte, _)| *byte);
        Self { prefix, eof_value, branches }
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        out.write_u16::<LE>(self.prefix.len() as u16).expect("vec write cannot fail");
        out.extend_from_slice(&self.prefix);
        write_value_opt(out, &self.eof_value);
        out.write_u16::<LE>(self.branches.len() as u16).expect("vec write cannot fail");
        for (byte, id) in &self.branches {
            out.write_u8(*byte).expect("vec write cannot fail");
            out.write_u64::<LE>(id_to_raw(*id)).expect("vec write cannot fail");
        }
    }

    pub(crate) fn read_payload(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let prefix_len = cursor.read_u16::<LE>().unwrap_or(0) as usize;
        let start = cursor.position() as usize;
        let prefix = cursor.get_ref()[start..start + prefix_len].to_vec();
        cursor.set_position((start + prefix_len) as u64);
        let eof_value = read_value_opt(&mut cursor);
        let count = cursor.read_u16::<LE>().unwrap_or(0) as usize;
        let mut branches = Vec::with_capacity(count);
        for _ in 0..count {
            let byte = cursor.read_u8().unwrap_or(0);
            let raw = cursor.read_u64::<LE>().unwrap_or(0);
            branches.push((byte, raw_to_id(raw)));
        }
        Self { prefix, eof_value, branches }
    }
}

impl InnerNodeOps for SetlistNode {
    fn get_prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn num_branches(&self) -> usize {
        self.branches.len()
    }

    fn has_eof_value(&self) -> bool {
        self.eof_value.is_some()
    }

    fn get_eof_value(&self) -> Option<&Value> {
        self.eof_value.as_ref()
    }

    fn set_eof_value(&mut self, value: Option<Value>) {
        self.eof_value = value;
    }

    fn get_branch(&self, b: u8) -> ObjectId {
        self.branches
            .binary_search_by_key(&b, |(byte, _)| *byte)
            .map(|idx| self.branches[idx].1)
            .unwrap_or(ObjectId::NONE)
    }

    fn set_branch(&mut self, b: u8, id: ObjectId) {
        if let Ok(idx) = self.branches.binary_search_by_key(&b, |(byte, _)| *byte) {
            self.branches[idx].1 = id;
        }
    }

    fn add_branch(&mut self, b: u8, id: ObjectId) {
        match self.branches.binary_search_by_key(&b, |(byte, _)| *byte) {
            Ok(idx) => self.branches[idx].1 = id,
            Err(idx) => self.branches.insert(idx, (b, id)),
        }
    }

    fn remove_branch(&mut self, b: u8) {
        if let Ok(idx) = self.branches.binary_search_by_key(&b, |(byte, _)| *byte) {
            self.branches.remove(idx);
        }
    }

    fn can_add_branch(&self, full_node_threshold: u16) -> bool {
        (self.branches.len() as u16) < full_node_threshold
    }

    fn visit_branches(&self, visit: &mut dyn FnMut(u8, ObjectId)) {
        for (byte, id) in &self.branches {
            visit(*byte, *id);
        }
    }
}

/// A dense inner node: prefix + optional EOF value + a full 256-entry branch
/// table, used once fan-out exceeds `full_node_threshold` (spec invariant
/// §3.4).
#[derive(Clone)]
pub struct FullNode {
    prefix: Vec<u8>,
    eof_value: Option<Value>,
    branches: Box<[ObjectId; 256]>,
    count: u16,
}

impl std::fmt::Debug for FullNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullNode")
            .field("prefix", &self.prefix)
            .field("count", &self.count)
            .finish()
    }
}

impl FullNode {
    /// Builds a full node by refactoring a setlist that crossed
    /// `full_node_threshold` branches (spec §4.F "refactor to full").
    #[must_use]
    pub fn from_setlist(setlist: &SetlistNode) -> Self {
        let mut branches = Box::new([ObjectId::NONE; 256]);
        let mut count = 0_u16;
        setlist.visit_branches(&mut |b, id| {
            branches[b as usize] = id;
            count += 1;
        });
        Self { prefix: setlist.prefix.clone(), eof_value: setlist.eof_value.clone(), branches, count }
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        out.write_u16::<LE>(self.prefix.len() as u16).expect("vec write cannot fail");
        out.extend_from_slice(&self.prefix);
        write_value_opt(out, &self.eof_value);
        for id in self.branches.iter() {
            out.write_u64::<LE>(id_to_raw(*id)).expect("vec write cannot fail");
        }
    }

    pub(crate) fn read_payload(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let prefix_len = cursor.read_u16::<LE>().unwrap_or(0) as usize;
        let start = cursor.position() as usize;
        let prefix = cursor.get_ref()[start..start + prefix_len].to_vec();
        cursor.set_position((start + prefix_len) as u64);
        let eof_value = read_value_opt(&mut cursor);
        let mut branches = Box::new([ObjectId::NONE; 256]);
        let mut count = 0_u16;
        for slot in branches.iter_mut() {
            let raw = cursor.read_u64::<LE>().unwrap_or(0);
            *slot = raw_to_id(raw);
            if !slot.is_none() {
                count += 1;
            }
        }
        Self { prefix, eof_value, branches, count }
    }
}

impl InnerNodeOps for FullNode {
    fn get_prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn num_branches(&self) -> usize {
        self.count as usize
    }

    fn has_eof_value(&self) -> bool {
        self.eof_value.is_some()
    }

    fn get_eof_value(&self) -> Option<&Value> {
        self.eof_value.as_ref()
    }

    fn set_eof_value(&mut self, value: Option<Value>) {
        self.eof_value = value;
    }

    fn get_branch(&self, b: u8) -> ObjectId {
        self.branches[b as usize]
    }

    fn set_branch(&mut self, b: u8, id: ObjectId) {
        self.branches[b as usize] = id;
    }

    fn add_branch(&mut self, b: u8, id: ObjectId) {
        if self.branches[b as usize].is_none() {
            self.count += 1;
        }
        self.branches[b as usize] = id;
    }

    fn remove_branch(&mut self, b: u8) {
        if !self.branches[b as usize].is_none() {
            self.count -= 1;
        }
        self.branches[b as usize] = ObjectId::NONE;
    }

    fn can_add_branch(&self, _full_node_threshold: u16) -> bool {
        (self.count as usize) < 256
    }

    fn visit_branches(&self, visit: &mut dyn FnMut(u8, ObjectId)) {
        for (byte, id) in self.branches.iter().enumerate() {
            if !id.is_none() {
                visit(byte as u8, *id);
            }
        }
    }
}

/// Either inner-node shape (spec §4.E).
#[enum_dispatch(InnerNodeOps)]
#[derive(Clone, Debug)]
pub enum InnerNode {
    /// Sparse shape, used at or below `full_node_threshold` branches.
    Setlist(SetlistNode),
    /// Dense shape, used above `full_node_threshold` branches.
    Full(FullNode),
}

impl InnerNode {
    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Self::Setlist(n) => n.write_payload(out),
            Self::Full(n) => n.write_payload(out),
        }
    }
}
