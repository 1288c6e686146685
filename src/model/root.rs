//! Storage roots - the identity of one committed tree snapshot

use super::{Hash, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of tree a root belongs to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum RootType {
    /// An uninitialized root type
    #[default]
    Invalid = 0,
    /// State storage root; may share subtrees with earlier versions
    State = 1,
    /// IO storage root; rebuilt from scratch every version
    IO = 2,
}

impl RootType {
    /// All valid root types, in registry order
    pub const ALL: [RootType; 2] = [RootType::State, RootType::IO];

    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RootType::Invalid),
            1 => Some(RootType::State),
            2 => Some(RootType::IO),
            _ => None,
        }
    }
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RootType::Invalid => "invalid",
            RootType::State => "state-root",
            RootType::IO => "io-root",
        };
        f.write_str(name)
    }
}

/// A storage root
///
/// Two roots are equal iff all fields match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Root {
    /// Namespace under which the root is stored
    #[serde(rename = "ns")]
    pub namespace: Namespace,
    /// Monotonically increasing version number in which the root is stored
    pub version: u64,
    /// Type of storage this root is used for
    pub root_type: RootType,
    /// Merkle root hash
    pub hash: Hash,
}

impl Root {
    pub fn new(namespace: Namespace, version: u64, root_type: RootType, hash: Hash) -> Self {
        Root {
            namespace,
            version,
            root_type,
            hash,
        }
    }

    /// An empty root of the given type at the given version (the tree with no nodes)
    pub fn empty_at(namespace: Namespace, version: u64, root_type: RootType) -> Self {
        Root::new(namespace, version, root_type, Hash::empty())
    }

    /// Reset to the empty root. The root type is left untouched.
    pub fn empty(&mut self) {
        self.namespace = Namespace::default();
        self.version = 0;
        self.hash = Hash::empty();
    }

    /// Whether namespace, version and hash are all empty
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.version == 0 && self.hash.is_empty()
    }

    /// Whether this root follows `other`: same type and namespace, and a version that is
    /// either equal or exactly one higher.
    ///
    /// Says nothing about whether the merkle roots follow each other.
    pub fn follows(&self, other: &Root) -> bool {
        if self.root_type != other.root_type || self.namespace != other.namespace {
            return false;
        }
        self.version == other.version || Some(self.version) == other.version.checked_add(1)
    }

    /// Hash of the root descriptor itself
    pub fn encoded_hash(&self) -> Hash {
        Hash::digest_many(&[
            self.namespace.as_bytes(),
            &self.version.to_le_bytes(),
            &[self.root_type.as_byte()],
            self.hash.as_bytes(),
        ])
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Root ns={} version={} type={} hash={}>",
            self.namespace, self.version, self.root_type, self.hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(version: u64) -> Root {
        Root::new(
            Namespace::from_bytes([1u8; 32]),
            version,
            RootType::State,
            Hash::digest(b"root"),
        )
    }

    #[test]
    fn test_follows() {
        assert!(root(5).follows(&root(5)));
        assert!(root(5).follows(&root(4)));
        assert!(!root(6).follows(&root(4)));
        assert!(!root(4).follows(&root(5)));
    }

    #[test]
    fn test_follows_requires_same_type_and_namespace() {
        let mut io = root(5);
        io.root_type = RootType::IO;
        assert!(!io.follows(&root(4)));

        let mut other_ns = root(5);
        other_ns.namespace = Namespace::from_bytes([2u8; 32]);
        assert!(!other_ns.follows(&root(5)));
    }

    #[test]
    fn test_follows_at_version_limit() {
        assert!(!root(0).follows(&root(u64::MAX)));
        assert!(root(u64::MAX).follows(&root(u64::MAX)));
    }

    #[test]
    fn test_empty_root() {
        let mut r = root(3);
        assert!(!r.is_empty());
        r.empty();
        assert!(r.is_empty());
        assert_eq!(r.root_type, RootType::State);
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = root(1);
        let mut b = a;
        assert_eq!(a, b);
        b.hash = Hash::digest(b"other");
        assert_ne!(a, b);
        assert_ne!(a.encoded_hash(), b.encoded_hash());
    }

    #[test]
    fn test_root_type_display() {
        assert_eq!(RootType::State.to_string(), "state-root");
        assert_eq!(RootType::IO.to_string(), "io-root");
        assert_eq!(RootType::Invalid.to_string(), "invalid");
        assert_eq!(RootType::from_byte(2), Some(RootType::IO));
        assert_eq!(RootType::from_byte(3), None);
    }
}
