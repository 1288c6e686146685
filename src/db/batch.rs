//! The batch contract - one unit of work under a new root

use crate::model::Root;
use crate::node::Pointer;
use crate::writelog::{Annotations, WriteLog};
use crate::Result;

/// Callback run after a successful commit
pub type CommitHook = Box<dyn FnOnce() + Send>;

/// A node database specific batch
///
/// A batch is a single-writer unit of work; it is not shared between threads while being
/// filled.
pub trait Batch: Send {
    /// Persist a clean node, keyed by its pointer's hash
    fn put_node(&mut self, ptr: &mut Pointer) -> Result<()>;

    /// Attach the write log (and optional per-entry annotations) of this root transition
    fn put_write_log(&mut self, write_log: WriteLog, annotations: Annotations) -> Result<()>;

    /// Mark nodes as superseded; they are only removed by a later prune
    fn remove_nodes(&mut self, nodes: &[Pointer]) -> Result<()>;

    /// Atomically make everything in the batch visible under `root`, then run the commit
    /// hooks in registration order. On failure nothing is applied.
    fn commit(&mut self, root: &Root) -> Result<()>;

    /// Register a hook to run after a successful commit
    fn on_commit(&mut self, hook: CommitHook);

    /// Called for every clean node reached while committing; no further processing is
    /// done for it
    fn visit_clean_node(&mut self, ptr: &Pointer, parent: Option<&Pointer>) -> Result<()>;

    /// Called for every dirty node reached while committing, before its children are
    /// processed
    fn visit_dirty_node(&mut self, ptr: &Pointer, parent: Option<&Pointer>) -> Result<()>;

    /// Discard everything added so far so the batch can be reused
    fn reset(&mut self);
}

/// Commit hook bookkeeping shared by batch implementations
#[derive(Default)]
pub struct BaseBatch {
    on_commit_hooks: Vec<CommitHook>,
}

impl BaseBatch {
    pub fn on_commit(&mut self, hook: CommitHook) {
        self.on_commit_hooks.push(hook);
    }

    /// Run and clear the registered hooks. Call only after the backend commit succeeded.
    pub fn commit(&mut self) {
        for hook in self.on_commit_hooks.drain(..) {
            hook();
        }
    }

    pub fn reset(&mut self) {
        self.on_commit_hooks.clear();
    }

    pub fn pending_hooks(&self) -> usize {
        self.on_commit_hooks.len()
    }
}
