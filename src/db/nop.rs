//! A node database that stores nothing

use super::{Batch, BaseBatch, CommitHook, NodeDb};
use crate::model::Root;
use crate::node::{Node, Pointer};
use crate::writelog::{Annotations, WriteLog, WriteLogIter};
use crate::{Error, Result};
use tokio_util::sync::CancellationToken;

/// A node database that does not store anything: lookups are not found, batches commit
/// into nothing, and bookkeeping operations succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopNodeDb;

impl NopNodeDb {
    pub fn new() -> Self {
        NopNodeDb
    }
}

impl NodeDb for NopNodeDb {
    fn get_node(&self, _root: &Root, _ptr: &Pointer) -> Result<Node> {
        Err(Error::NodeNotFound)
    }

    fn get_write_log(&self, _: &CancellationToken, _: &Root, _: &Root) -> Result<WriteLogIter> {
        Err(Error::WriteLogNotFound)
    }

    fn get_latest_version(&self) -> Option<u64> {
        None
    }

    fn get_earliest_version(&self) -> u64 {
        0
    }

    fn get_roots_for_version(&self, _version: u64) -> Result<Vec<Root>> {
        Ok(Vec::new())
    }

    fn has_root(&self, _root: &Root) -> bool {
        false
    }

    fn start_multipart_insert(&self, _version: u64) -> Result<()> {
        Ok(())
    }

    fn abort_multipart_insert(&self) -> Result<()> {
        Ok(())
    }

    fn new_batch(&self, _old_root: Root, _version: u64, _chunk: bool) -> Result<Box<dyn Batch>> {
        Ok(Box::new(NopBatch::default()))
    }

    fn finalize(&self, _roots: &[Root]) -> Result<()> {
        Ok(())
    }

    fn prune(&self, _version: u64) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(0)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

/// Batch of [`NopNodeDb`]; only runs commit hooks
#[derive(Default)]
struct NopBatch {
    base: BaseBatch,
}

impl Batch for NopBatch {
    fn put_node(&mut self, _ptr: &mut Pointer) -> Result<()> {
        Ok(())
    }

    fn put_write_log(&mut self, _write_log: WriteLog, _annotations: Annotations) -> Result<()> {
        Ok(())
    }

    fn remove_nodes(&mut self, _nodes: &[Pointer]) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self, _root: &Root) -> Result<()> {
        self.base.commit();
        Ok(())
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.base.on_commit(hook);
    }

    fn visit_clean_node(&mut self, _ptr: &Pointer, _parent: Option<&Pointer>) -> Result<()> {
        Ok(())
    }

    fn visit_dirty_node(&mut self, _ptr: &Pointer, _parent: Option<&Pointer>) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.base.reset();
    }
}
