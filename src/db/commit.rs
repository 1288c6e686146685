//! Persisting dirty subtrees into a batch

use super::Batch;
use crate::model::Hash;
use crate::node::{Node, Pointer};
use crate::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Commit a (sub)tree into the batch and return its root hash
///
/// Every dirty node below `root` gets its hash recomputed (children first), is marked
/// clean and is handed to [`Batch::put_node`]. Leaves held by internal nodes are stored
/// as separate nodes. Clean subtrees are reported through [`Batch::visit_clean_node`] and
/// not descended into; dirty nodes are reported through [`Batch::visit_dirty_node`]
/// before their children are processed.
///
/// If the walk fails (including cancellation), every pointer it marked clean is marked
/// dirty again, so the tree can be committed from scratch into another batch.
///
/// An absent root commits the empty tree and returns the empty hash.
pub fn commit_tree(
    cancel: &CancellationToken,
    batch: &mut dyn Batch,
    root: Option<&mut Pointer>,
) -> Result<Hash> {
    let Some(ptr) = root else {
        return Ok(Hash::empty());
    };

    let mut walk = Walk {
        cancel,
        batch,
        path: Vec::new(),
        cleaned: Vec::new(),
    };
    let result = visit(walk.batch, ptr, None).and_then(|()| walk.commit_pointer(ptr));

    if let Err(err) = result {
        for path in &walk.cleaned {
            if let Some(cleaned) = descend(ptr, path) {
                cleaned.set_dirty();
                if let Some(node) = cleaned.node.as_deref_mut() {
                    node.set_clean(false);
                }
            }
        }
        return Err(err);
    }
    Ok(ptr.hash)
}

fn visit(batch: &mut dyn Batch, ptr: &Pointer, parent: Option<&Pointer>) -> Result<()> {
    if ptr.clean {
        batch.visit_clean_node(ptr, parent)
    } else {
        batch.visit_dirty_node(ptr, parent)
    }
}

// Child slots of an internal node
const SLOT_LEAF: u8 = 0;
const SLOT_LEFT: u8 = 1;
const SLOT_RIGHT: u8 = 2;

struct Walk<'a> {
    cancel: &'a CancellationToken,
    batch: &'a mut dyn Batch,
    /// Slots leading from the root to the pointer being committed
    path: Vec<u8>,
    /// Paths of the pointers marked clean so far
    cleaned: Vec<Vec<u8>>,
}

impl Walk<'_> {
    fn commit_pointer(&mut self, ptr: &mut Pointer) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ptr.clean {
            return Ok(());
        }

        let node = ptr
            .node
            .as_deref()
            .ok_or(Error::ContractViolation("dirty pointer without a node"))?;

        if !node.is_clean() {
            if let Node::Internal(internal) = node {
                for child in [&internal.leaf_node, &internal.left, &internal.right]
                    .into_iter()
                    .flatten()
                {
                    visit(self.batch, child, Some(&*ptr))?;
                }
            }
        }

        let node = ptr
            .node
            .as_deref_mut()
            .ok_or(Error::ContractViolation("dirty pointer without a node"))?;

        if !node.is_clean() {
            if let Node::Internal(internal) = node {
                let slots = [
                    (SLOT_LEAF, &mut internal.leaf_node),
                    (SLOT_LEFT, &mut internal.left),
                    (SLOT_RIGHT, &mut internal.right),
                ];
                for (slot, child) in slots {
                    let Some(child) = child else {
                        continue;
                    };
                    self.path.push(slot);
                    self.commit_pointer(child)?;
                    self.path.pop();
                }
            }
            node.update_hash();
            node.set_clean(true);
        }

        ptr.hash = node.hash();
        ptr.clean = true;
        self.cleaned.push(self.path.clone());
        self.batch.put_node(ptr)
    }
}

/// The pointer reached by following `path` from `ptr`
fn descend<'a>(mut ptr: &'a mut Pointer, path: &[u8]) -> Option<&'a mut Pointer> {
    for &slot in path {
        let Some(Node::Internal(internal)) = ptr.node.as_deref_mut() else {
            return None;
        };
        ptr = match slot {
            SLOT_LEAF => internal.leaf_node.as_mut()?,
            SLOT_LEFT => internal.left.as_mut()?,
            _ => internal.right.as_mut()?,
        };
    }
    Some(ptr)
}
