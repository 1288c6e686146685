//! # mkvs_db
//!
//! Node model and node database contract for a Merklized key-value store.
//!
//! A tree is made of leaf nodes (key/value pairs) and internal nodes (a label plus an
//! optional leaf and two children), linked by [`Pointer`]s. Every node has a hash that
//! commits to its content, and the hash of the root node identifies a tree version.
//! Node databases persist the nodes of many versions and their write logs.
//!
//! ## Core Concepts
//!
//! - **Nodes**: leaves and internal nodes with a canonical binary encoding
//! - **Pointers**: clean (hash known, persisted) or dirty (changed since last commit)
//! - **Roots**: (namespace, version, type, hash) identifying one committed tree
//! - **Batches**: one unit of work producing a new root
//! - **Finalization**: versions are finalized in order and pruned from the bottom
//!
//! ## Example
//!
//! ```ignore
//! use mkvs_db::db::{commit_tree, MemoryNodeDb, NodeDb};
//! use mkvs_db::node::{LeafNode, Pointer};
//! use mkvs_db::{Namespace, Root, RootType};
//! use tokio_util::sync::CancellationToken;
//!
//! let db = MemoryNodeDb::new(Namespace::default());
//! let old = Root::empty_at(Namespace::default(), 0, RootType::State);
//! let mut batch = db.new_batch(old, 0, false)?;
//! let mut ptr = Pointer::from_node(LeafNode::new("key", b"value".to_vec()));
//! let hash = commit_tree(&CancellationToken::new(), batch.as_mut(), Some(&mut ptr))?;
//! batch.commit(&Root { hash, ..old })?;
//! db.finalize(&[Root { hash, ..old }])?;
//! ```

pub mod db;
pub mod model;
pub mod node;
pub mod writelog;

mod error;

pub use db::{Batch, Config, MemoryNodeDb, NodeDb, NodeDbFactory, NopNodeDb};
pub use error::{Error, Result, MODULE_NAME};
pub use model::{Hash, Namespace, Root, RootType};
pub use node::{InternalNode, Key, LeafNode, Node, Pointer};
pub use writelog::{LogEntry, WriteLog};

/// Snapshot format version
pub const VERSION: u32 = 1;

/// Magic bytes for snapshot file identification
pub const MAGIC: &[u8; 8] = b"MKVS_NDB";
