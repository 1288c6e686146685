//! Node database contract
//!
//! A node database stores the nodes of many versioned trees, keyed by hash, together with
//! the roots committed at each version and the write logs between them. Work is submitted
//! through [`Batch`]es, one per new root; versions are then finalized in order and pruned
//! from the bottom.

mod batch;
mod commit;
mod config;
pub mod memory;
mod nop;
mod policy;

pub use batch::{Batch, BaseBatch, CommitHook};
pub use commit::commit_tree;
pub use config::{Config, DEFAULT_MAX_CACHE_SIZE};
pub use memory::{MemoryNodeDb, MemoryNodeDbFactory};
pub use nop::NopNodeDb;
pub use policy::{policy_for_root, policy_for_root_type, root_types, root_types_with_policy, RootPolicy};

use crate::model::Root;
use crate::node::{Node, Pointer};
use crate::writelog::WriteLogIter;
use crate::Result;
use tokio_util::sync::CancellationToken;

/// Maximum number of pending (committed but unfinalized) versions a node database keeps
pub const MAX_PENDING_VERSIONS: u64 = 5000;

/// The node database interface
///
/// All methods take `&self`; implementations synchronize internally and must be safe to
/// call from many threads.
pub trait NodeDb: Send + Sync {
    /// Look up a node by its clean pointer in the context of `root`
    ///
    /// A dirty pointer is a contract violation. Nodes of versions below the earliest
    /// retained version are not found.
    fn get_node(&self, root: &Root, ptr: &Pointer) -> Result<Node>;

    /// The write log transforming `start_root` into `end_root`, possibly spanning several
    /// stored transitions
    fn get_write_log(
        &self,
        cancel: &CancellationToken,
        start_root: &Root,
        end_root: &Root,
    ) -> Result<WriteLogIter>;

    /// Most recent finalized version, if any version has been finalized
    fn get_latest_version(&self) -> Option<u64>;

    /// Earliest version retained by the database
    fn get_earliest_version(&self) -> u64;

    /// All roots committed at `version`; empty if there are none
    fn get_roots_for_version(&self, version: u64) -> Result<Vec<Root>>;

    /// Whether the root exists. Roots with the empty hash always exist.
    fn has_root(&self, root: &Root) -> bool;

    /// Begin a multipart (chunked) insert session for `version`
    fn start_multipart_insert(&self, version: u64) -> Result<()>;

    /// Abort the active multipart session, removing everything it inserted. A no-op when no
    /// session is active.
    fn abort_multipart_insert(&self) -> Result<()>;

    /// Start a new batch producing a root at `version` derived from `old_root`
    ///
    /// Chunk batches are part of a multipart session and may leave subtrees incomplete.
    fn new_batch(&self, old_root: Root, version: u64, chunk: bool) -> Result<Box<dyn Batch>>;

    /// Finalize a version, keeping only the given roots; all roots must share one version.
    /// Unlisted roots of that version, and roots derived from them later, are discarded.
    fn finalize(&self, roots: &[Root]) -> Result<()>;

    /// Remove the earliest version, which must be finalized and not the latest finalized one
    fn prune(&self, version: u64) -> Result<()>;

    /// Approximate stored size in bytes
    fn size(&self) -> Result<u64>;

    /// Flush everything to durable storage
    fn sync(&self) -> Result<()>;

    /// Release resources; errors are logged, not returned
    fn close(&self);
}

/// A named constructor for node databases
pub trait NodeDbFactory: Send + Sync {
    fn open(&self, config: &Config) -> Result<Box<dyn NodeDb>>;

    /// Name of the backend
    fn name(&self) -> &'static str;
}
