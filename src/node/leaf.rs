//! Leaf nodes

use super::key::encode_length;
use super::{Key, PREFIX_LEAF_NODE, VALUE_LENGTH_SIZE};
use crate::model::Hash;
use crate::{Error, Result};

/// In-memory size of an empty [`LeafNode`] in bytes.
pub const LEAF_NODE_SIZE: u64 = std::mem::size_of::<LeafNode>() as u64;

/// A leaf node containing a key/value pair
#[derive(Clone, Debug, Default)]
pub struct LeafNode {
    pub clean: bool,
    pub hash: Hash,
    pub key: Key,
    pub value: Vec<u8>,
}

impl LeafNode {
    /// A new dirty leaf
    pub fn new(key: impl Into<Key>, value: Vec<u8>) -> Self {
        LeafNode {
            clean: false,
            hash: Hash::empty(),
            key: key.into(),
            value,
        }
    }

    pub fn size(&self) -> u64 {
        LEAF_NODE_SIZE + self.key.len() as u64 + self.value.len() as u64
    }

    /// Recompute the cached hash. Does not mark the node clean.
    pub fn update_hash(&mut self) {
        self.hash = Hash::digest_many(&[
            &[PREFIX_LEAF_NODE],
            &(self.key.len() as u32).to_le_bytes(),
            self.key.as_bytes(),
            &(self.value.len() as u32).to_le_bytes(),
            &self.value,
        ]);
    }

    /// Copy of the node; fails with a contract violation if it is dirty
    pub fn extract(&self) -> Result<LeafNode> {
        if !self.clean {
            return Err(Error::ContractViolation("extract called on dirty node"));
        }
        Ok(self.extract_unchecked())
    }

    pub fn extract_unchecked(&self) -> LeafNode {
        LeafNode {
            clean: true,
            ..self.clone()
        }
    }

    /// Leaf encoding; the same for the full and both compact formats
    ///
    /// Keys or values too long for a [`VALUE_LENGTH_SIZE`] length prefix are rejected.
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let key = self.key.marshal_binary()?;
        let value_len = encode_length(self.value.len())?;
        let mut data = Vec::with_capacity(1 + key.len() + VALUE_LENGTH_SIZE + self.value.len());
        data.push(PREFIX_LEAF_NODE);
        data.extend_from_slice(&key);
        data.extend_from_slice(&value_len);
        data.extend_from_slice(&self.value);
        Ok(data)
    }

    /// Decode a leaf from the start of `data`, returning it with the number of bytes consumed
    ///
    /// The decoded leaf is clean with a freshly computed hash.
    pub fn sized_unmarshal_binary(data: &[u8]) -> Result<(LeafNode, usize)> {
        if data.len() < 1 + 2 * VALUE_LENGTH_SIZE || data[0] != PREFIX_LEAF_NODE {
            return Err(Error::MalformedNode);
        }
        let mut pos = 1;

        let (key, key_size) = Key::sized_unmarshal_binary(&data[pos..])?;
        pos += key_size;

        let len_bytes: [u8; VALUE_LENGTH_SIZE] = data
            .get(pos..pos + VALUE_LENGTH_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::MalformedNode)?;
        let value_size = u32::from_le_bytes(len_bytes) as usize;
        pos += VALUE_LENGTH_SIZE;

        let value = data
            .get(pos..pos + value_size)
            .ok_or(Error::MalformedNode)?
            .to_vec();
        pos += value_size;

        let mut leaf = LeafNode {
            clean: true,
            hash: Hash::empty(),
            key,
            value,
        };
        leaf.update_hash();
        Ok((leaf, pos))
    }

    /// Clean nodes compare by hash, otherwise by key and value
    pub fn equal(&self, other: &LeafNode) -> bool {
        if self.clean && other.clean {
            return self.hash == other.hash;
        }
        self.key == other.key && self.value == other.value
    }
}
