//! Keys and bit depths

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the encoded [`Depth`] in bytes.
pub const DEPTH_SIZE: usize = 2;

/// Size of an encoded key or value length prefix in bytes.
pub const VALUE_LENGTH_SIZE: usize = 4;

/// A bit length, e.g. the length of an edge label in a radix tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Depth(pub u16);

impl Depth {
    /// Encode as [`DEPTH_SIZE`] little-endian bytes
    pub fn marshal_binary(&self) -> [u8; DEPTH_SIZE] {
        self.0.to_le_bytes()
    }

    /// Decode from the start of `data`; trailing bytes are ignored
    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let bytes: [u8; DEPTH_SIZE] = data
            .get(..DEPTH_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::MalformedNode)?;
        Ok(Depth(u16::from_le_bytes(bytes)))
    }

    /// Number of bytes needed to hold this many bits
    pub fn to_bytes(&self) -> usize {
        (self.0 as usize).div_ceil(8)
    }
}

impl From<u16> for Depth {
    fn from(bits: u16) -> Self {
        Depth(bits)
    }
}

/// An opaque key; ordering and equality are byte-wise
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the key in bits
    pub fn bit_length(&self) -> usize {
        self.0.len() * 8
    }

    /// Value of the bit at position `bit`, most significant bit of the first byte first
    pub fn get_bit(&self, bit: usize) -> bool {
        self.0
            .get(bit / 8)
            .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
    }

    /// Length-prefixed encoding: 4-byte little-endian length followed by the key bytes
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(VALUE_LENGTH_SIZE + self.0.len());
        data.extend_from_slice(&encode_length(self.0.len())?);
        data.extend_from_slice(&self.0);
        Ok(data)
    }

    /// Decode a length-prefixed key from the start of `data`, returning the key and the
    /// number of bytes consumed
    pub fn sized_unmarshal_binary(data: &[u8]) -> Result<(Self, usize)> {
        let len_bytes: [u8; VALUE_LENGTH_SIZE] = data
            .get(..VALUE_LENGTH_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::MalformedKey)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let end = VALUE_LENGTH_SIZE
            .checked_add(len)
            .ok_or(Error::MalformedKey)?;
        let key = data.get(VALUE_LENGTH_SIZE..end).ok_or(Error::MalformedKey)?;
        Ok((Key(key.to_vec()), end))
    }
}

/// Encode a key or value length; lengths that do not fit in [`VALUE_LENGTH_SIZE`] bytes are
/// rejected
pub(crate) fn encode_length(len: usize) -> Result<[u8; VALUE_LENGTH_SIZE]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| Error::InvalidArgument(format!("length {len} exceeds the encodable maximum")))
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key(bytes.to_vec())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex::encode(&self.0))
    }
}
