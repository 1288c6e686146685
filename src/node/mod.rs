//! Tree nodes and their canonical encodings
//!
//! A tree is built from two kinds of nodes:
//! - [`LeafNode`] holds a key/value pair
//! - [`InternalNode`] holds an edge label, an optional leaf for the key ending at its depth,
//!   and left/right children
//!
//! Nodes reference each other only through [`Pointer`]s. Every node's hash is a
//! deterministic digest of its canonical encoding, so identical content always hashes the
//! same and nodes can be stored and looked up by hash.
//!
//! Three encodings exist. The full encoding (`marshal_binary`) is used for persistence and
//! includes child hashes. The two compact encodings omit child hashes and are used in
//! Merkle proofs: V0 still inlines the internal node's leaf, V1 replaces it with the nil
//! marker.

mod internal;
mod key;
mod leaf;
mod pointer;

pub use internal::{InternalNode, INTERNAL_NODE_SIZE};
pub use key::{Depth, Key, DEPTH_SIZE, VALUE_LENGTH_SIZE};
pub use leaf::{LeafNode, LEAF_NODE_SIZE};
pub use pointer::{pointer_eq, pointer_hash, pointer_is_clean, DbPointer, Pointer, POINTER_SIZE};

use crate::model::Hash;
use crate::{Error, Result};

/// Prefix of leaf node encodings and hash computations
pub const PREFIX_LEAF_NODE: u8 = 0x00;
/// Prefix of internal node encodings and hash computations
pub const PREFIX_INTERNAL_NODE: u8 = 0x01;
/// Marks an absent leaf in an internal node encoding
pub const PREFIX_NIL_NODE: u8 = 0x02;

/// Either a leaf or an internal node
#[derive(Clone, Debug)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

/// Which variant a [`Node`] is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Leaf(_) => NodeKind::Leaf,
            Node::Internal(_) => NodeKind::Internal,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(internal) => Some(internal),
            Node::Leaf(_) => None,
        }
    }

    pub fn is_clean(&self) -> bool {
        match self {
            Node::Leaf(n) => n.clean,
            Node::Internal(n) => n.clean,
        }
    }

    pub fn set_clean(&mut self, clean: bool) {
        match self {
            Node::Leaf(n) => n.clean = clean,
            Node::Internal(n) => n.clean = clean,
        }
    }

    /// The node's cached hash
    pub fn hash(&self) -> Hash {
        match self {
            Node::Leaf(n) => n.hash,
            Node::Internal(n) => n.hash,
        }
    }

    /// Recompute the cached hash. Does not mark the node clean.
    pub fn update_hash(&mut self) {
        match self {
            Node::Leaf(n) => n.update_hash(),
            Node::Internal(n) => n.update_hash(),
        }
    }

    /// Copy of the node with hash-only children; fails with a contract violation on dirty
    /// state
    pub fn extract(&self) -> Result<Node> {
        Ok(match self {
            Node::Leaf(n) => Node::Leaf(n.extract()?),
            Node::Internal(n) => Node::Internal(n.extract()?),
        })
    }

    pub fn extract_unchecked(&self) -> Node {
        match self {
            Node::Leaf(n) => Node::Leaf(n.extract_unchecked()),
            Node::Internal(n) => Node::Internal(n.extract_unchecked()),
        }
    }

    /// Clean nodes compare by hash, dirty nodes structurally; different variants never match
    pub fn equal(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => a.equal(b),
            (Node::Internal(a), Node::Internal(b)) => a.equal(b),
            _ => false,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::Leaf(n) => n.size(),
            Node::Internal(n) => n.size(),
        }
    }

    /// Full canonical encoding
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        match self {
            Node::Leaf(n) => n.marshal_binary(),
            Node::Internal(n) => n.marshal_binary(),
        }
    }

    /// Compact encoding for version 0 proofs
    pub fn compact_marshal_binary_v0(&self) -> Result<Vec<u8>> {
        match self {
            Node::Leaf(n) => n.marshal_binary(),
            Node::Internal(n) => n.compact_marshal_binary_v0(),
        }
    }

    /// Compact encoding for version 1 proofs
    pub fn compact_marshal_binary_v1(&self) -> Result<Vec<u8>> {
        match self {
            Node::Leaf(n) => n.marshal_binary(),
            Node::Internal(n) => n.compact_marshal_binary_v1(),
        }
    }

    /// Decode a node of either kind, dispatching on the prefix byte
    pub fn unmarshal_binary(data: &[u8]) -> Result<Node> {
        Self::sized_unmarshal_binary(data).map(|(node, _)| node)
    }

    /// Decode a node from the start of `data`, returning it with the number of bytes
    /// consumed so concatenated encodings can be read one after another
    pub fn sized_unmarshal_binary(data: &[u8]) -> Result<(Node, usize)> {
        if data.len() <= 1 {
            return Err(Error::MalformedNode);
        }
        match data[0] {
            PREFIX_LEAF_NODE => {
                LeafNode::sized_unmarshal_binary(data).map(|(n, size)| (Node::Leaf(n), size))
            }
            PREFIX_INTERNAL_NODE => InternalNode::sized_unmarshal_binary(data)
                .map(|(n, size)| (Node::Internal(n), size)),
            _ => Err(Error::MalformedNode),
        }
    }
}

impl From<LeafNode> for Node {
    fn from(leaf: LeafNode) -> Self {
        Node::Leaf(leaf)
    }
}

impl From<InternalNode> for Node {
    fn from(internal: InternalNode) -> Self {
        Node::Internal(internal)
    }
}
