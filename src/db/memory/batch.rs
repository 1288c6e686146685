//! Batches of the in-memory node database

use super::state::{CommitRequest, StoredWriteLog};
use super::{MemoryPointer, Shared};
use crate::db::{Batch, BaseBatch, CommitHook};
use crate::model::{Hash, Root};
use crate::node::Pointer;
use crate::writelog::{Annotations, WriteLog};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Batch producing one new root; nothing is visible until [`Batch::commit`]
pub struct MemoryBatch {
    shared: Arc<Shared>,
    old_root: Root,
    version: u64,
    chunk: bool,

    nodes: HashMap<Hash, Bytes>,
    write_log: Option<StoredWriteLog>,
    removed: Vec<Hash>,

    visited_clean: usize,
    visited_dirty: usize,

    base: BaseBatch,
}

impl MemoryBatch {
    pub(super) fn new(shared: Arc<Shared>, old_root: Root, version: u64, chunk: bool) -> Self {
        MemoryBatch {
            shared,
            old_root,
            version,
            chunk,
            nodes: HashMap::new(),
            write_log: None,
            removed: Vec::new(),
            visited_clean: 0,
            visited_dirty: 0,
            base: BaseBatch::default(),
        }
    }
}

impl Batch for MemoryBatch {
    fn put_node(&mut self, ptr: &mut Pointer) -> Result<()> {
        if !ptr.clean {
            return Err(Error::ContractViolation("put_node called on a dirty pointer"));
        }
        let node = ptr
            .node
            .as_deref()
            .ok_or(Error::ContractViolation("put_node called on a pointer without a node"))?;
        if node.hash() != ptr.hash {
            return Err(Error::ContractViolation("pointer hash does not match its node"));
        }

        let data = Bytes::from(node.marshal_binary()?);
        self.nodes.insert(ptr.hash, data.clone());
        ptr.db_internal = Some(Box::new(MemoryPointer::new(data)));
        Ok(())
    }

    fn put_write_log(&mut self, write_log: WriteLog, annotations: Annotations) -> Result<()> {
        if !annotations.is_empty() && annotations.len() != write_log.len() {
            return Err(Error::InvalidArgument(format!(
                "{} annotations for {} write log entries",
                annotations.len(),
                write_log.len()
            )));
        }
        self.write_log = Some(StoredWriteLog {
            entries: Arc::new(write_log),
            annotations,
        });
        Ok(())
    }

    fn remove_nodes(&mut self, nodes: &[Pointer]) -> Result<()> {
        for ptr in nodes {
            if !ptr.clean {
                return Err(Error::ContractViolation("cannot remove a dirty node"));
            }
            self.removed.push(ptr.hash);
        }
        Ok(())
    }

    fn commit(&mut self, root: &Root) -> Result<()> {
        if self.shared.config.read_only {
            return Err(Error::ReadOnly);
        }
        self.shared.state.write().commit(&CommitRequest {
            old_root: &self.old_root,
            version: self.version,
            chunk: self.chunk,
            root,
            nodes: &self.nodes,
            write_log: self.write_log.as_ref(),
            removed: &self.removed,
            discard_write_logs: self.shared.config.discard_write_logs,
        })?;

        debug!(
            root = %root,
            nodes = self.nodes.len(),
            removed = self.removed.len(),
            visited_clean = self.visited_clean,
            visited_dirty = self.visited_dirty,
            chunk = self.chunk,
            "committed batch"
        );
        self.base.commit();
        Ok(())
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.base.on_commit(hook);
    }

    fn visit_clean_node(&mut self, _ptr: &Pointer, _parent: Option<&Pointer>) -> Result<()> {
        self.visited_clean += 1;
        Ok(())
    }

    fn visit_dirty_node(&mut self, _ptr: &Pointer, _parent: Option<&Pointer>) -> Result<()> {
        self.visited_dirty += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.write_log = None;
        self.removed.clear();
        self.visited_clean = 0;
        self.visited_dirty = 0;
        self.base.reset();
    }
}
