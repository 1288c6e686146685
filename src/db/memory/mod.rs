//! In-memory node database with optional single-file persistence
//!
//! All state lives behind one lock. Unless the database is memory-only, the state is
//! snapshotted to `Config::db` by [`NodeDb::sync`], on close, and after every finalize,
//! prune and multipart transition. Committed but unfinalized versions become durable with
//! the next snapshot.

mod batch;
mod cache;
mod snapshot;
mod state;

pub use batch::MemoryBatch;

use self::cache::NodeCache;
use self::state::State;
use super::{Batch, Config, NodeDb, NodeDbFactory};
use crate::model::{Hash, Namespace, Root};
use crate::node::{DbPointer, Node, Pointer};
use crate::writelog::{WriteLogIter, WriteLogIterator};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Backend metadata attached to pointers stored by a [`MemoryNodeDb`]: the encoding the
/// node was stored with
#[derive(Clone, Debug)]
pub struct MemoryPointer {
    encoded: Option<Bytes>,
}

impl MemoryPointer {
    fn new(encoded: Bytes) -> Self {
        MemoryPointer {
            encoded: Some(encoded),
        }
    }

    pub fn encoded(&self) -> Option<&Bytes> {
        self.encoded.as_ref()
    }
}

impl DbPointer for MemoryPointer {
    fn set_dirty(&mut self) {
        self.encoded = None;
    }

    fn clone_box(&self) -> Box<dyn DbPointer> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Summary of the database contents
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
    pub nodes: usize,
    pub write_logs: usize,
    pub versions: usize,
    pub cached_nodes: usize,
    pub earliest_version: u64,
    pub latest_version: Option<u64>,
    pub multipart_version: Option<u64>,
    pub size: u64,
}

struct Shared {
    config: Config,
    state: RwLock<State>,
    cache: Mutex<NodeCache>,
    closed: AtomicBool,
}

impl Shared {
    fn persist(&self, state: &State) -> Result<()> {
        if self.config.memory_only || self.config.read_only {
            return Ok(());
        }
        snapshot::write(&self.config.db, state, !self.config.no_fsync)?;
        trace!(path = %self.config.db.display(), "wrote snapshot");
        Ok(())
    }

    fn evict(&self, hashes: &[Hash]) {
        let mut cache = self.cache.lock();
        for hash in hashes {
            cache.remove(hash);
        }
    }
}

/// In-memory node database
pub struct MemoryNodeDb {
    shared: Arc<Shared>,
}

impl MemoryNodeDb {
    /// Open a database as configured
    ///
    /// Unless `memory_only` is set, an existing snapshot at `config.db` is loaded; its
    /// namespace must match the configured one.
    pub fn open(config: &Config) -> Result<Self> {
        let state = if config.memory_only {
            State::new(config.namespace)
        } else {
            if config.db.as_os_str().is_empty() {
                return Err(Error::InvalidArgument("database path is required".into()));
            }
            Self::load(&config.db, config.namespace)?
        };

        info!(
            namespace = %config.namespace,
            memory_only = config.memory_only,
            read_only = config.read_only,
            earliest_version = state.earliest_version(),
            latest_version = ?state.last_finalized(),
            "opened node database"
        );

        Ok(MemoryNodeDb {
            shared: Arc::new(Shared {
                config: config.clone(),
                state: RwLock::new(state),
                cache: Mutex::new(NodeCache::new(config.max_cache_size)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// A fresh memory-only database
    pub fn new(namespace: Namespace) -> Self {
        MemoryNodeDb {
            shared: Arc::new(Shared {
                config: Config::memory(namespace),
                state: RwLock::new(State::new(namespace)),
                cache: Mutex::new(NodeCache::new(super::DEFAULT_MAX_CACHE_SIZE)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn load(path: &Path, namespace: Namespace) -> Result<State> {
        if !path.exists() {
            return Ok(State::new(namespace));
        }
        let state = snapshot::read(path)?;
        if state.namespace != namespace {
            return Err(Error::BadNamespace);
        }
        Ok(state)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn stats(&self) -> Stats {
        let state = self.shared.state.read();
        Stats {
            nodes: state.node_count(),
            write_logs: state.write_log_count(),
            versions: state.version_count(),
            cached_nodes: self.shared.cache.lock().len(),
            earliest_version: state.earliest_version(),
            latest_version: state.last_finalized(),
            multipart_version: state.multipart_version(),
            size: state.size(),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.shared.config.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }
}

impl NodeDb for MemoryNodeDb {
    fn get_node(&self, root: &Root, ptr: &Pointer) -> Result<Node> {
        if !ptr.clean {
            return Err(Error::ContractViolation(
                "attempted to get a dirty pointer from the node database",
            ));
        }

        let data = {
            let state = self.shared.state.read();
            if root.namespace != state.namespace {
                return Err(Error::BadNamespace);
            }
            if root.version < state.earliest_version() {
                return Err(Error::NodeNotFound);
            }
            let stored = state.node(&ptr.hash).ok_or(Error::NodeNotFound)?;
            if let Some(node) = self.shared.cache.lock().get(&ptr.hash) {
                return Ok(node);
            }
            ptr.db_internal
                .as_ref()
                .and_then(|internal| internal.as_any().downcast_ref::<MemoryPointer>())
                .and_then(|mp| mp.encoded().cloned())
                .unwrap_or_else(|| stored.clone())
        };

        let node = Node::unmarshal_binary(&data)?;
        if node.hash() != ptr.hash {
            return Err(Error::Corruption(format!(
                "node {} decoded with hash {}",
                ptr.hash,
                node.hash()
            )));
        }
        trace!(node = %ptr.hash.short(), "loaded node");
        self.shared.cache.lock().insert(ptr.hash, node.clone());
        Ok(node)
    }

    fn get_write_log(
        &self,
        cancel: &CancellationToken,
        start_root: &Root,
        end_root: &Root,
    ) -> Result<WriteLogIter> {
        let segments = self
            .shared
            .state
            .read()
            .write_log_path(cancel, start_root, end_root)?;
        Ok(WriteLogIterator::new(cancel.clone(), segments).boxed())
    }

    fn get_latest_version(&self) -> Option<u64> {
        self.shared.state.read().last_finalized()
    }

    fn get_earliest_version(&self) -> u64 {
        self.shared.state.read().earliest_version()
    }

    fn get_roots_for_version(&self, version: u64) -> Result<Vec<Root>> {
        Ok(self.shared.state.read().roots_for_version(version))
    }

    fn has_root(&self, root: &Root) -> bool {
        self.shared.state.read().has_root(root)
    }

    fn start_multipart_insert(&self, version: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.shared.state.write();
        state.start_multipart(version)?;
        self.shared.persist(&state)?;
        info!(version, "started multipart insert");
        Ok(())
    }

    fn abort_multipart_insert(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.multipart_version().is_none() {
            return Ok(());
        }
        self.ensure_writable()?;

        if let Some((version, deleted)) = state.abort_multipart() {
            self.shared.evict(&deleted);
            self.shared.persist(&state)?;
            info!(version, removed_nodes = deleted.len(), "aborted multipart insert");
        }
        Ok(())
    }

    fn new_batch(&self, old_root: Root, version: u64, chunk: bool) -> Result<Box<dyn Batch>> {
        self.ensure_writable()?;
        {
            let state = self.shared.state.read();
            if old_root.namespace != state.namespace {
                return Err(Error::BadNamespace);
            }
            state.check_batch(version, chunk)?;
        }
        Ok(Box::new(MemoryBatch::new(
            self.shared.clone(),
            old_root,
            version,
            chunk,
        )))
    }

    fn finalize(&self, roots: &[Root]) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.shared.state.write();
        let reclaimed = state.finalize(roots)?;
        self.shared.evict(&reclaimed);
        self.shared.persist(&state)?;

        info!(
            version = ?state.last_finalized(),
            roots = roots.len(),
            reclaimed_nodes = reclaimed.len(),
            "finalized version"
        );
        Ok(())
    }

    fn prune(&self, version: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.shared.state.write();
        let reclaimed = state.prune(version)?;
        self.shared.evict(&reclaimed);
        self.shared.persist(&state)?;

        info!(version, reclaimed_nodes = reclaimed.len(), "pruned version");
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.shared.state.read().size())
    }

    fn sync(&self) -> Result<()> {
        let state = self.shared.state.read();
        self.shared.persist(&state)
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.sync() {
            warn!(%err, "failed to sync node database on close");
        }
        debug!("closed node database");
    }
}

impl Drop for MemoryNodeDb {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for [`MemoryNodeDb`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryNodeDbFactory;

impl NodeDbFactory for MemoryNodeDbFactory {
    fn open(&self, config: &Config) -> Result<Box<dyn NodeDb>> {
        Ok(Box::new(MemoryNodeDb::open(config)?))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::commit_tree;
    use crate::model::RootType;
    use crate::node::LeafNode;
    use tempfile::tempdir;

    const NS: Namespace = Namespace::from_bytes([5u8; 32]);

    fn commit_leaf(db: &dyn NodeDb, old_root: Root, version: u64, key: &str) -> (Root, Pointer) {
        let mut batch = db.new_batch(old_root, version, false).unwrap();
        let mut ptr = Pointer::from_node(LeafNode::new(key, b"value".to_vec()));
        let hash = commit_tree(&CancellationToken::new(), batch.as_mut(), Some(&mut ptr)).unwrap();
        let root = Root::new(NS, version, RootType::State, hash);
        batch.commit(&root).unwrap();
        (root, ptr)
    }

    #[test]
    fn test_get_node_uses_pointer_metadata() {
        let db = MemoryNodeDb::new(NS);
        let (root, ptr) = commit_leaf(&db, Root::empty_at(NS, 0, RootType::State), 0, "k");

        let internal = ptr.db_internal.as_ref().unwrap();
        assert!(internal.as_any().downcast_ref::<MemoryPointer>().is_some());

        let node = db.get_node(&root, &ptr).unwrap();
        assert_eq!(node.hash(), root.hash);
        assert_eq!(node.as_leaf().unwrap().key.as_bytes(), b"k");

        // A bare hash pointer resolves the same node.
        let node = db.get_node(&root, &Pointer::from_hash(root.hash)).unwrap();
        assert!(node.is_clean());
    }

    #[test]
    fn test_get_node_rejects_dirty_pointer() {
        let db = MemoryNodeDb::new(NS);
        let root = Root::empty_at(NS, 0, RootType::State);
        let err = db
            .get_node(&root, &Pointer::from_node(LeafNode::new("k", vec![])))
            .unwrap_err();
        assert!(err.is_contract_violation());

        let other = Root::empty_at(Namespace::default(), 0, RootType::State);
        let err = db
            .get_node(&other, &Pointer::from_hash(Hash::digest(b"x")))
            .unwrap_err();
        assert!(matches!(err, Error::BadNamespace));
    }

    #[test]
    fn test_memory_pointer_dropped_on_set_dirty() {
        let db = MemoryNodeDb::new(NS);
        let (_, mut ptr) = commit_leaf(&db, Root::empty_at(NS, 0, RootType::State), 0, "k");
        assert!(ptr.db_internal.is_some());
        ptr.set_dirty();
        assert!(ptr.db_internal.is_none());
    }

    #[test]
    fn test_read_only_rejects_mutations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.db");
        {
            let db = MemoryNodeDb::open(&Config::at_path(&path, NS)).unwrap();
            let (root, _) = commit_leaf(&db, Root::empty_at(NS, 0, RootType::State), 0, "k");
            db.finalize(&[root]).unwrap();
        }

        let cfg = Config {
            read_only: true,
            ..Config::at_path(&path, NS)
        };
        let db = MemoryNodeDb::open(&cfg).unwrap();
        assert_eq!(db.get_latest_version(), Some(0));
        let old = Root::empty_at(NS, 1, RootType::State);
        assert!(matches!(db.new_batch(old, 1, false), Err(Error::ReadOnly)));
        assert!(matches!(db.prune(0), Err(Error::ReadOnly)));
        assert!(matches!(db.start_multipart_insert(1), Err(Error::ReadOnly)));
        assert!(db.abort_multipart_insert().is_ok());
    }

    #[test]
    fn test_open_checks_namespace_and_upgrade_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.db");
        MemoryNodeDb::open(&Config::at_path(&path, NS))
            .unwrap()
            .sync()
            .unwrap();

        let other = Config::at_path(&path, Namespace::from_bytes([6u8; 32]));
        assert!(matches!(MemoryNodeDb::open(&other), Err(Error::BadNamespace)));

        snapshot::set_upgrade_in_progress(&path, true).unwrap();
        assert!(matches!(
            MemoryNodeDb::open(&Config::at_path(&path, NS)),
            Err(Error::UpgradeInProgress)
        ));
    }

    #[test]
    fn test_pruned_nodes_leave_cache() {
        let db = MemoryNodeDb::new(NS);
        let (r0, _) = commit_leaf(&db, Root::empty_at(NS, 0, RootType::State), 0, "a");
        db.finalize(&[r0]).unwrap();
        let (r1, _) = commit_leaf(&db, r0, 1, "b");
        db.finalize(&[r1]).unwrap();

        db.get_node(&r0, &Pointer::from_hash(r0.hash)).unwrap();
        assert_eq!(db.stats().cached_nodes, 1);

        db.prune(0).unwrap();
        assert_eq!(db.stats().cached_nodes, 0);
        assert!(matches!(
            db.get_node(&r1, &Pointer::from_hash(r0.hash)),
            Err(Error::NodeNotFound)
        ));
    }

    #[test]
    fn test_factory() {
        let factory = MemoryNodeDbFactory;
        assert_eq!(factory.name(), "memory");
        let db = factory.open(&Config::memory(NS)).unwrap();
        assert_eq!(db.get_latest_version(), None);
        assert!(db.has_root(&Root::empty_at(NS, 3, RootType::IO)));
    }
}
