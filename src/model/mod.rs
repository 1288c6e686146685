//! Core data model types for mkvs_db

mod hash;
mod namespace;
mod root;

pub use hash::{Hash, HASH_SIZE};
pub use namespace::{Namespace, NAMESPACE_SIZE};
pub use root::{Root, RootType};
