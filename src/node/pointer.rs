//! Pointers between tree nodes

use super::Node;
use crate::model::Hash;
use crate::{Error, Result};
use std::any::Any;
use std::fmt;

/// In-memory size of a [`Pointer`] in bytes, excluding the node it points to.
pub const POINTER_SIZE: u64 = std::mem::size_of::<Pointer>() as u64;

/// Node database specific metadata attached to a pointer to aid resolution
///
/// Each backend supplies its own concrete type and recovers it with [`DbPointer::as_any`].
pub trait DbPointer: fmt::Debug + Send + Sync {
    /// Called when the owning pointer is marked dirty; the metadata is dropped right after.
    fn set_dirty(&mut self);

    fn clone_box(&self) -> Box<dyn DbPointer>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn DbPointer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A pointer to another node
///
/// A clean pointer carries an authoritative hash and may omit the node body, which can then
/// be resolved from a node database by hash. A dirty pointer refers to a node that changed
/// since its hash was last computed and has not been persisted. Absent children are
/// represented as `Option<Pointer>::None`, which is always clean with the empty hash.
#[derive(Clone, Debug, Default)]
pub struct Pointer {
    pub clean: bool,
    pub hash: Hash,
    pub node: Option<Box<Node>>,
    pub db_internal: Option<Box<dyn DbPointer>>,
}

impl Pointer {
    /// A clean, hash-only pointer
    pub fn from_hash(hash: Hash) -> Self {
        Pointer {
            clean: true,
            hash,
            node: None,
            db_internal: None,
        }
    }

    /// A dirty pointer owning a freshly built node
    pub fn from_node(node: impl Into<Node>) -> Self {
        Pointer {
            clean: false,
            hash: Hash::empty(),
            node: Some(Box::new(node.into())),
            db_internal: None,
        }
    }

    /// Size of this pointer and the node it holds, in bytes
    pub fn size(&self) -> u64 {
        POINTER_SIZE + self.node.as_ref().map_or(0, |n| n.size())
    }

    /// Mark the pointer dirty, invalidating any backend metadata it held
    pub fn set_dirty(&mut self) {
        self.clean = false;
        if let Some(mut internal) = self.db_internal.take() {
            internal.set_dirty();
        }
    }

    /// Copy of the pointer containing only the hash reference
    ///
    /// Fails with a contract violation if the pointer is dirty.
    pub fn extract(&self) -> Result<Pointer> {
        if !self.clean {
            return Err(Error::ContractViolation("extract called on dirty pointer"));
        }
        Ok(self.extract_unchecked())
    }

    /// Like [`Pointer::extract`] without checking the dirty flag
    pub fn extract_unchecked(&self) -> Pointer {
        Pointer {
            clean: true,
            hash: self.hash,
            node: None,
            db_internal: self.db_internal.clone(),
        }
    }

    /// Copy of the pointer with an extracted copy of the node it points to
    ///
    /// Fails with a contract violation if the pointer is dirty.
    pub fn extract_with_node(&self) -> Result<Pointer> {
        if !self.clean {
            return Err(Error::ContractViolation(
                "extract with node called on dirty pointer",
            ));
        }
        Ok(self.extract_with_node_unchecked())
    }

    /// Like [`Pointer::extract_with_node`] without checking the dirty flag
    pub fn extract_with_node_unchecked(&self) -> Pointer {
        let mut ptr = self.extract_unchecked();
        ptr.node = self
            .node
            .as_ref()
            .map(|node| Box::new(node.extract_unchecked()));
        ptr
    }

    /// Two pointers are equal if both are clean with matching hashes, or if both hold
    /// nodes that are equal.
    pub fn equal(&self, other: &Pointer) -> bool {
        if self.clean && other.clean {
            return self.hash == other.hash;
        }
        match (&self.node, &other.node) {
            (Some(a), Some(b)) => a.equal(b),
            _ => false,
        }
    }
}

/// Hash of a possibly absent pointer
pub fn pointer_hash(ptr: Option<&Pointer>) -> Hash {
    ptr.map_or_else(Hash::empty, |p| p.hash)
}

/// Whether a possibly absent pointer is clean; absent pointers always are
pub fn pointer_is_clean(ptr: Option<&Pointer>) -> bool {
    ptr.map_or(true, |p| p.clean)
}

/// Equality over possibly absent pointers; two absent pointers are equal
pub fn pointer_eq(a: Option<&Pointer>, b: Option<&Pointer>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equal(b),
        _ => false,
    }
}

pub(crate) fn pointer_size(ptr: Option<&Pointer>) -> u64 {
    ptr.map_or(0, Pointer::size)
}

/// Extract a possibly absent pointer, checking the dirty flag
pub(crate) fn extract_opt(ptr: Option<&Pointer>) -> Result<Option<Pointer>> {
    ptr.map(Pointer::extract).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct CountingPointer {
        dirtied: Arc<AtomicUsize>,
    }

    impl DbPointer for CountingPointer {
        fn set_dirty(&mut self) {
            self.dirtied.fetch_add(1, Ordering::SeqCst);
        }

        fn clone_box(&self) -> Box<dyn DbPointer> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn clean_leaf(key: &str, value: &str) -> Pointer {
        let mut leaf = LeafNode::new(key, value.as_bytes().to_vec());
        leaf.update_hash();
        leaf.clean = true;
        Pointer {
            clean: true,
            hash: leaf.hash,
            node: Some(Box::new(leaf.into())),
            db_internal: None,
        }
    }

    #[test]
    fn test_set_dirty_drops_backend_metadata() {
        let dirtied = Arc::new(AtomicUsize::new(0));
        let mut ptr = clean_leaf("k", "v");
        ptr.db_internal = Some(Box::new(CountingPointer {
            dirtied: dirtied.clone(),
        }));

        ptr.set_dirty();

        assert!(!ptr.clean);
        assert!(ptr.db_internal.is_none());
        assert_eq!(dirtied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extract_clean_pointer() {
        let ptr = clean_leaf("k", "v");
        let extracted = ptr.extract().unwrap();
        assert!(extracted.clean);
        assert_eq!(extracted.hash, ptr.hash);
        assert!(extracted.node.is_none());

        let with_node = ptr.extract_with_node().unwrap();
        assert_eq!(with_node.hash, ptr.hash);
        assert!(with_node.node.is_some());
    }

    #[test]
    fn test_extract_dirty_pointer_is_contract_violation() {
        let ptr = Pointer::from_node(LeafNode::new("k", b"v".to_vec()));
        assert!(ptr.extract().unwrap_err().is_contract_violation());
        assert!(ptr.extract_with_node().unwrap_err().is_contract_violation());

        let unchecked = ptr.extract_unchecked();
        assert!(unchecked.clean);
    }

    #[test]
    fn test_extract_keeps_backend_metadata() {
        let mut ptr = clean_leaf("k", "v");
        ptr.db_internal = Some(Box::new(CountingPointer {
            dirtied: Arc::new(AtomicUsize::new(0)),
        }));
        let extracted = ptr.extract().unwrap();
        let meta = extracted.db_internal.as_ref().unwrap();
        assert!(meta.as_any().downcast_ref::<CountingPointer>().is_some());
    }

    #[test]
    fn test_pointer_equality() {
        let a = clean_leaf("k", "v");
        let b = clean_leaf("k", "v");
        let c = clean_leaf("k", "other");
        assert!(a.equal(&b));
        assert!(!a.equal(&c));

        // Dirty pointers compare structurally.
        let d1 = Pointer::from_node(LeafNode::new("k", b"v".to_vec()));
        let d2 = Pointer::from_node(LeafNode::new("k", b"v".to_vec()));
        assert!(d1.equal(&d2));

        // A dirty pointer without a node never equals anything.
        let mut bare = Pointer::from_hash(a.hash);
        bare.clean = false;
        assert!(!bare.equal(&a));
    }

    #[test]
    fn test_nil_pointer_semantics() {
        let a = clean_leaf("k", "v");
        assert!(pointer_eq(None, None));
        assert!(!pointer_eq(Some(&a), None));
        assert!(!pointer_eq(None, Some(&a)));
        assert!(pointer_is_clean(None));
        assert!(pointer_hash(None).is_empty());
        assert_eq!(pointer_size(None), 0);
        assert!(extract_opt(None).unwrap().is_none());
    }
}
