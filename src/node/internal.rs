//! Internal (branch) nodes

use super::pointer::{extract_opt, pointer_eq, pointer_hash, pointer_size};
use super::{
    Depth, Key, LeafNode, Node, Pointer, DEPTH_SIZE, PREFIX_INTERNAL_NODE, PREFIX_NIL_NODE,
};
use crate::model::{Hash, HASH_SIZE};
use crate::{Error, Result};

/// In-memory size of an empty [`InternalNode`] in bytes.
pub const INTERNAL_NODE_SIZE: u64 = std::mem::size_of::<InternalNode>() as u64;

/// An internal node with two children and possibly a leaf
///
/// `label` and `label_bit_length` are only empty for the root of a tree.
#[derive(Clone, Debug, Default)]
pub struct InternalNode {
    pub clean: bool,
    pub hash: Hash,
    /// Label on the incoming edge
    pub label: Key,
    /// Length of the label in bits
    pub label_bit_length: Depth,
    /// Leaf for the key ending at this depth
    pub leaf_node: Option<Pointer>,
    pub left: Option<Pointer>,
    pub right: Option<Pointer>,
}

impl InternalNode {
    /// A new dirty internal node
    pub fn new(
        label: impl Into<Key>,
        label_bit_length: Depth,
        leaf_node: Option<Pointer>,
        left: Option<Pointer>,
        right: Option<Pointer>,
    ) -> Self {
        InternalNode {
            clean: false,
            hash: Hash::empty(),
            label: label.into(),
            label_bit_length,
            leaf_node,
            left,
            right,
        }
    }

    pub fn size(&self) -> u64 {
        INTERNAL_NODE_SIZE
            + self.label.len() as u64
            + pointer_size(self.leaf_node.as_ref())
            + pointer_size(self.left.as_ref())
            + pointer_size(self.right.as_ref())
    }

    /// Recompute the cached hash from the label and the children's hashes. Does not mark
    /// the node clean.
    pub fn update_hash(&mut self) {
        let leaf_hash = pointer_hash(self.leaf_node.as_ref());
        let left_hash = pointer_hash(self.left.as_ref());
        let right_hash = pointer_hash(self.right.as_ref());

        self.hash = Hash::digest_many(&[
            &[PREFIX_INTERNAL_NODE],
            &self.label_bit_length.marshal_binary(),
            self.label.as_bytes(),
            leaf_hash.as_bytes(),
            left_hash.as_bytes(),
            right_hash.as_bytes(),
        ]);
    }

    /// Copy of the node with hash-only children; fails with a contract violation if the
    /// node or any of its children is dirty
    pub fn extract(&self) -> Result<InternalNode> {
        if !self.clean {
            return Err(Error::ContractViolation("extract called on dirty node"));
        }
        Ok(InternalNode {
            clean: true,
            hash: self.hash,
            label: self.label.clone(),
            label_bit_length: self.label_bit_length,
            leaf_node: extract_opt(self.leaf_node.as_ref())?,
            left: extract_opt(self.left.as_ref())?,
            right: extract_opt(self.right.as_ref())?,
        })
    }

    pub fn extract_unchecked(&self) -> InternalNode {
        InternalNode {
            clean: true,
            hash: self.hash,
            label: self.label.clone(),
            label_bit_length: self.label_bit_length,
            leaf_node: self.leaf_node.as_ref().map(Pointer::extract_unchecked),
            left: self.left.as_ref().map(Pointer::extract_unchecked),
            right: self.right.as_ref().map(Pointer::extract_unchecked),
        }
    }

    /// Full encoding: header, inlined leaf (or nil marker), left and right child hashes
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut data = self.encode_header(true)?;
        data.extend_from_slice(pointer_hash(self.left.as_ref()).as_bytes());
        data.extend_from_slice(pointer_hash(self.right.as_ref()).as_bytes());
        Ok(data)
    }

    /// Compact encoding for version 0 proofs: like the full encoding without child hashes
    pub fn compact_marshal_binary_v0(&self) -> Result<Vec<u8>> {
        self.encode_header(true)
    }

    /// Compact encoding for version 1 proofs: no child hashes and no inlined leaf
    pub fn compact_marshal_binary_v1(&self) -> Result<Vec<u8>> {
        self.encode_header(false)
    }

    fn encode_header(&self, inline_leaf: bool) -> Result<Vec<u8>> {
        if self.label.len() != self.label_bit_length.to_bytes() {
            return Err(Error::MalformedNode);
        }

        let leaf = match (&self.leaf_node, inline_leaf) {
            (Some(ptr), true) => Some(inlined_leaf(ptr)?.marshal_binary()?),
            _ => None,
        };

        let mut data = Vec::with_capacity(
            1 + DEPTH_SIZE + self.label.len() + leaf.as_ref().map_or(1, Vec::len) + 2 * HASH_SIZE,
        );
        data.push(PREFIX_INTERNAL_NODE);
        data.extend_from_slice(&self.label_bit_length.marshal_binary());
        data.extend_from_slice(self.label.as_bytes());
        match leaf {
            Some(leaf) => data.extend_from_slice(&leaf),
            None => data.push(PREFIX_NIL_NODE),
        }
        Ok(data)
    }

    /// Decode an internal node from the start of `data`, returning it with the number of
    /// bytes consumed
    ///
    /// Child hashes are only read when enough input remains to hold both of them; a full
    /// encoding decodes to a clean node with a recomputed hash. A compact encoding leaves
    /// the children unset and the node dirty, since its hash cannot be derived without them.
    pub fn sized_unmarshal_binary(data: &[u8]) -> Result<(InternalNode, usize)> {
        if data.len() < 1 + DEPTH_SIZE + 1 || data[0] != PREFIX_INTERNAL_NODE {
            return Err(Error::MalformedNode);
        }
        let mut pos = 1;

        let label_bit_length = Depth::unmarshal_binary(&data[pos..])?;
        pos += DEPTH_SIZE;

        let label_len = label_bit_length.to_bytes();
        let label = data
            .get(pos..pos + label_len)
            .ok_or(Error::MalformedNode)?
            .to_vec();
        pos += label_len;

        let leaf_node = match data.get(pos) {
            None => return Err(Error::MalformedNode),
            Some(&PREFIX_NIL_NODE) => {
                pos += 1;
                None
            }
            Some(_) => {
                let (leaf, size) = LeafNode::sized_unmarshal_binary(&data[pos..])?;
                pos += size;
                Some(Pointer {
                    clean: true,
                    hash: leaf.hash,
                    node: Some(Box::new(Node::Leaf(leaf))),
                    db_internal: None,
                })
            }
        };

        let mut node = InternalNode::new(label, label_bit_length, leaf_node, None, None);

        if data.len() >= pos + 2 * HASH_SIZE {
            let left = Hash::from_slice(&data[pos..pos + HASH_SIZE])?;
            pos += HASH_SIZE;
            let right = Hash::from_slice(&data[pos..pos + HASH_SIZE])?;
            pos += HASH_SIZE;

            node.left = (!left.is_empty()).then(|| Pointer::from_hash(left));
            node.right = (!right.is_empty()).then(|| Pointer::from_hash(right));
            node.update_hash();
            node.clean = true;
        }

        Ok((node, pos))
    }

    /// Clean nodes compare by hash, otherwise structurally
    pub fn equal(&self, other: &InternalNode) -> bool {
        if self.clean && other.clean {
            return self.hash == other.hash;
        }
        pointer_eq(self.leaf_node.as_ref(), other.leaf_node.as_ref())
            && pointer_eq(self.left.as_ref(), other.left.as_ref())
            && pointer_eq(self.right.as_ref(), other.right.as_ref())
            && self.label_bit_length == other.label_bit_length
            && self.label == other.label
    }
}

/// The resolved leaf body behind an internal node's leaf pointer
fn inlined_leaf(ptr: &Pointer) -> Result<&LeafNode> {
    match ptr.node.as_deref() {
        Some(Node::Leaf(leaf)) => Ok(leaf),
        Some(Node::Internal(_)) => Err(Error::MalformedNode),
        None => Err(Error::ContractViolation(
            "internal node leaf pointer must be resolved to encode",
        )),
    }
}
