// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Node kinds and layouts (spec §4.E): *binary*, *setlist*, *full*, *value*.
//!
//! Every allocation in the arena begins with an [`ObjectHeader`] (spec §3
//! "Object header"), which is all the compactor needs to relocate an object
//! without understanding its payload. Everything past the header is decoded
//! per node type.

mod binary;
mod inner;
mod value;

pub use binary::BinaryNode;
pub(crate) use binary::entry_encoded_len;
pub use inner::{FullNode, InnerNode, InnerNodeOps, SetlistNode};
pub use value::ValueNode;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Cursor, Write};

use crate::hash::Checksum;
use crate::id_allocator::{id_to_raw, raw_to_id as raw_id_to_id, NodeType, ObjectId};

/// Every allocation begins with this header (spec §3).
#[derive(Copy, Clone, Debug)]
pub struct ObjectHeader {
    /// The identifier that owns this allocation; lets the compactor's linear
    /// scan recognize which meta word to update.
    pub id: ObjectId,
    /// Total size in bytes of header + payload, including alignment padding.
    pub size: u32,
    /// The node kind this payload decodes as.
    pub node_type: NodeType,
}

/// Header size in bytes: 8 (id) + 4 (size) + 1 (type) + 3 padding, rounded to
/// the 8-byte alignment every allocation observes.
pub const OBJECT_HEADER_SIZE: u32 = 16;

fn node_type_tag(node_type: NodeType) -> u8 {
    node_type as u8
}

fn node_type_from_tag(tag: u8) -> NodeType {
    match tag {
        1 => NodeType::Binary,
        2 => NodeType::Setlist,
        3 => NodeType::Full,
        4 => NodeType::Value,
        _ => NodeType::Undefined,
    }
}

impl ObjectHeader {
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.write_u64::<LE>(id_to_raw(self.id)).expect("vec write cannot fail");
        out.write_u32::<LE>(self.size).expect("vec write cannot fail");
        out.write_u8(node_type_tag(self.node_type)).expect("vec write cannot fail");
        out.write_all(&[0_u8; 3]).expect("vec write cannot fail");
    }

    pub(crate) fn read(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let raw_id = cursor.read_u64::<LE>().unwrap_or(0);
        let size = cursor.read_u32::<LE>().unwrap_or(OBJECT_HEADER_SIZE);
        let tag = cursor.read_u8().unwrap_or(0);
        Self {
            id: raw_id_to_id(raw_id),
            size,
            node_type: node_type_from_tag(tag),
        }
    }
}

/// Rounds `n` up to the next multiple of 8, the alignment every object
/// header and payload observes (spec §3 "rounded to 8-byte alignment").
#[must_use]
pub fn align8(n: u32) -> u32 {
    (n + 7) & !7
}

/// A terminal value: either inline bytes stored alongside the entry that
/// references it, or the identifier of another root (a *subtree*), per the
/// data model in spec §3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// An inline byte string.
    Inline(Vec<u8>),
    /// The id of another root — versioned nesting.
    Subtree(ObjectId),
}

impl Value {
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Self::Inline(bytes) => 1 + 4 + bytes.len(),
            Self::Subtree(_) => 1 + 8,
        }
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Inline(bytes) => {
                out.write_u8(0).expect("vec write cannot fail");
                out.write_u32::<LE>(bytes.len() as u32).expect("vec write cannot fail");
                out.extend_from_slice(bytes);
            }
            Self::Subtree(id) => {
                out.write_u8(1).expect("vec write cannot fail");
                out.write_u64::<LE>(id_to_raw(*id)).expect("vec write cannot fail");
            }
        }
    }

    pub(crate) fn read(cursor: &mut Cursor<&[u8]>) -> Self {
        let tag = cursor.read_u8().unwrap_or(0);
        if tag == 1 {
            let raw = cursor.read_u64::<LE>().unwrap_or(0);
            Self::Subtree(raw_id_to_id(raw))
        } else {
            let len = cursor.read_u32::<LE>().unwrap_or(0) as usize;
            let start = cursor.position() as usize;
            let bytes = cursor.get_ref()[start..start + len].to_vec();
            cursor.set_position((start + len) as u64);
            Self::Inline(bytes)
        }
    }
}

/// A fully decoded node, as produced by [`decode`] and consumed by
/// [`encode`]. The arena never holds a `Node` directly past construction —
/// trie algorithms decode on read and construct-and-allocate on write,
/// mirroring the copy-on-write discipline in spec §3's Lifecycle.
#[derive(Clone, Debug)]
pub enum Node {
    /// Sorted small bucket of (key-suffix, value) entries.
    Binary(BinaryNode),
    /// Sparse or dense inner node.
    Inner(InnerNode),
    /// Terminal value too large to store inline in a binary entry.
    Value(ValueNode),
}

impl Node {
    /// The node-type tag this node will be allocated under.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Binary(_) => NodeType::Binary,
            Self::Inner(InnerNode::Setlist(_)) => NodeType::Setlist,
            Self::Inner(InnerNode::Full(_)) => NodeType::Full,
            Self::Value(_) => NodeType::Value,
        }
    }

    /// Encodes the full header+payload byte representation ready to be
    /// copied into a freshly allocated arena slot.
    #[must_use]
    pub fn encode(&self, id: ObjectId) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        // Reserve the header; its `size` field is patched once the payload
        // length is known.
        out.extend_from_slice(&[0_u8; OBJECT_HEADER_SIZE as usize]);

        match self {
            Self::Binary(node) => node.write_payload(&mut out),
            Self::Inner(node) => node.write_payload(&mut out),
            Self::Value(node) => node.write_payload(&mut out),
        }

        let unpadded = out.len() as u32;
        let padded = align8(unpadded);
        out.resize(padded as usize, 0);

        let header = ObjectHeader { id, size: padded, node_type: self.node_type() };
        let mut header_bytes = Vec::with_capacity(OBJECT_HEADER_SIZE as usize);
        header.write(&mut header_bytes);
        out[..OBJECT_HEADER_SIZE as usize].copy_from_slice(&header_bytes);

        out
    }

    /// Decodes a node from its raw bytes (header included).
    #[must_use]
    pub fn decode(bytes: &[u8]) -> (ObjectHeader, Self) {
        let header = ObjectHeader::read(bytes);
        let payload = &bytes[OBJECT_HEADER_SIZE as usize..header.size as usize];
        let node = match header.node_type {
            NodeType::Binary => Self::Binary(BinaryNode::read_payload(payload)),
            NodeType::Setlist => Self::Inner(InnerNode::Setlist(SetlistNode::read_payload(payload))),
            NodeType::Full => Self::Inner(InnerNode::Full(FullNode::read_payload(payload))),
            NodeType::Value => Self::Value(ValueNode::read_payload(payload)),
            NodeType::Undefined => panic!("attempted to decode an undefined (freed) node"),
        };
        (header, node)
    }
}

/// Checksums a freshly encoded object (used only at recovery time to
/// validate headers scanned off disk; the write path does not verify its
/// own checksum).
#[must_use]
pub fn checksum_of(bytes: &[u8]) -> Checksum {
    Checksum::of(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn object_header_round_trips() {
        let header = ObjectHeader { id: ObjectId::new(3, 99), size: 128, node_type: NodeType::Binary };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        let decoded = ObjectHeader::read(&bytes);
        assert_eq!(decoded.id, header.id);
        assert_eq!(decoded.size, header.size);
        assert_eq!(decoded.node_type, header.node_type);
    }

    #[test]
    fn align8_rounds_up_to_next_multiple_of_eight() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
    }

    #[test]
    fn value_encoded_len_matches_written_bytes() {
        let inline = Value::Inline(b"hello".to_vec());
        let mut out = Vec::new();
        inline.write(&mut out);
        assert_eq!(out.len(), inline.encoded_len());

        let subtree = Value::Subtree(ObjectId::new(1, 2));
        let mut out = Vec::new();
        subtree.write(&mut out);
        assert_eq!(out.len(), subtree.encoded_len());
    }

    #[test]
    fn node_encode_decode_round_trips_binary_node() {
        let node = Node::Binary(BinaryNode::singleton(b"key".to_vec(), Value::Inline(b"val".to_vec()), 32));
        let id = ObjectId::new(0, 7);
        let bytes = node.encode(id);

        assert_eq!(bytes.len() % 8, 0, "encoded object must stay 8-byte aligned");

        let (header, decoded) = Node::decode(&bytes);
        assert_eq!(header.id, id);
        assert_eq!(header.node_type, NodeType::Binary);
        match decoded {
            Node::Binary(bucket) => {
                assert_eq!(bucket.len(), 1);
                assert_eq!(bucket.entries()[0].suffix, b"key");
            }
            _ => panic!("expected a binary node"),
        }
    }

    #[test]
    fn node_encode_decode_round_trips_inner_node() {
        let setlist = InnerNode::Setlist(SetlistNode::with_two_branches(
            vec![1, 2],
            (b'a', ObjectId::new(0, 1)),
            (b'b', ObjectId::new(0, 2)),
        ));
        let node = Node::Inner(setlist);
        let id = ObjectId::new(0, 8);
        let bytes = node.encode(id);
        let (header, decoded) = Node::decode(&bytes);
        assert_eq!(header.node_type, NodeType::Setlist);
        match decoded {
            Node::Inner(InnerNode::Setlist(s)) => assert_eq!(s.get_prefix(), &[1, 2]),
            _ => panic!("expected a setlist node"),
        }
    }
}
