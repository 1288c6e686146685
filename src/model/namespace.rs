//! Namespace identifier for a tree store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of a [`Namespace`] in bytes.
pub const NAMESPACE_SIZE: usize = 32;

/// Opaque 32-byte identifier of the chain/runtime whose state a database holds
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace([u8; NAMESPACE_SIZE]);

impl Namespace {
    /// Create a namespace from raw bytes
    pub const fn from_bytes(bytes: [u8; NAMESPACE_SIZE]) -> Self {
        Namespace(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NAMESPACE_SIZE] {
        &self.0
    }

    /// Check if this is the all-zero namespace
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; NAMESPACE_SIZE]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Namespace {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut arr = [0u8; NAMESPACE_SIZE];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Namespace(arr))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parse() {
        let ns = Namespace::from_bytes([7u8; NAMESPACE_SIZE]);
        let parsed: Namespace = ns.to_hex().parse().unwrap();
        assert_eq!(ns, parsed);
        assert!("0011".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(Namespace::default().is_empty());
        assert!(!Namespace::from_bytes([1u8; NAMESPACE_SIZE]).is_empty());
    }
}
