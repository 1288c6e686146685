//! Version bookkeeping of the in-memory node database
//!
//! Everything here runs under the database lock. Mutating operations validate first and
//! only then apply, so a rejected operation leaves the state untouched.

use crate::db::{policy_for_root, MAX_PENDING_VERSIONS};
use crate::model::{Hash, Namespace, Root};
use crate::node::Node;
use crate::writelog::{Annotations, WriteLog};
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(super) struct RootMeta {
    /// Committed by a chunk batch of a multipart session that has not been finalized
    pub chunked: bool,
    /// Roots committed with this root as their old root
    pub derived: Vec<Root>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(super) struct VersionMeta {
    pub finalized: bool,
    pub roots: HashMap<Root, RootMeta>,
    /// Nodes that transitions into this version marked as superseded
    pub superseded: HashSet<Hash>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct StoredWriteLog {
    pub entries: Arc<WriteLog>,
    pub annotations: Annotations,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(super) struct MultipartSession {
    pub version: u64,
    /// Nodes first inserted while the session was active
    pub nodes: HashSet<Hash>,
    /// Roots first inserted while the session was active
    pub roots: HashSet<Root>,
}

/// Everything a batch hands over on commit
pub(super) struct CommitRequest<'a> {
    pub old_root: &'a Root,
    pub version: u64,
    pub chunk: bool,
    pub root: &'a Root,
    pub nodes: &'a HashMap<Hash, Bytes>,
    pub write_log: Option<&'a StoredWriteLog>,
    pub removed: &'a [Hash],
    pub discard_write_logs: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct State {
    pub namespace: Namespace,
    /// Lowest version that may still exist; raised by pruning
    pruned_floor: u64,
    last_finalized: Option<u64>,
    versions: BTreeMap<u64, VersionMeta>,
    nodes: HashMap<Hash, Bytes>,
    write_logs: HashMap<(Root, Root), StoredWriteLog>,
    multipart: Option<MultipartSession>,
}

impl State {
    pub fn new(namespace: Namespace) -> Self {
        State {
            namespace,
            pruned_floor: 0,
            last_finalized: None,
            versions: BTreeMap::new(),
            nodes: HashMap::new(),
            write_logs: HashMap::new(),
            multipart: None,
        }
    }

    pub fn earliest_version(&self) -> u64 {
        self.versions
            .keys()
            .next()
            .copied()
            .map_or(self.pruned_floor, |v| v.max(self.pruned_floor))
    }

    pub fn last_finalized(&self) -> Option<u64> {
        self.last_finalized
    }

    pub fn multipart_version(&self) -> Option<u64> {
        self.multipart.as_ref().map(|s| s.version)
    }

    pub fn node(&self, hash: &Hash) -> Option<&Bytes> {
        self.nodes.get(hash)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn write_log_count(&self) -> usize {
        self.write_logs.len()
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn has_root(&self, root: &Root) -> bool {
        if root.namespace != self.namespace {
            return false;
        }
        if root.hash.is_empty() {
            return true;
        }
        self.versions
            .get(&root.version)
            .is_some_and(|meta| meta.roots.contains_key(root))
    }

    /// Roots at `version`, ordered by type and hash
    pub fn roots_for_version(&self, version: u64) -> Vec<Root> {
        let mut roots: Vec<Root> = self
            .versions
            .get(&version)
            .map(|meta| meta.roots.keys().copied().collect())
            .unwrap_or_default();
        roots.sort_by_key(|r| (r.root_type, r.hash));
        roots
    }

    /// Encoded nodes plus write log entries, in bytes
    pub fn size(&self) -> u64 {
        let nodes: u64 = self.nodes.values().map(|n| n.len() as u64).sum();
        let logs: u64 = self
            .write_logs
            .values()
            .flat_map(|log| log.entries.iter())
            .map(|entry| entry.size())
            .sum();
        nodes + logs
    }

    fn pending_versions(&self) -> u64 {
        self.versions.values().filter(|meta| !meta.finalized).count() as u64
    }

    /// Check that a batch for `version` may run given the multipart session state
    pub fn check_batch(&self, version: u64, chunk: bool) -> Result<()> {
        match &self.multipart {
            Some(session) if session.version != version => Err(Error::InvalidMultipartVersion),
            None if chunk => Err(Error::InvalidMultipartVersion),
            _ => Ok(()),
        }
    }

    pub fn commit(&mut self, req: &CommitRequest<'_>) -> Result<()> {
        let (old_root, root) = (req.old_root, req.root);

        if root.namespace != self.namespace || old_root.namespace != self.namespace {
            return Err(Error::BadNamespace);
        }
        let policy = policy_for_root(root).ok_or_else(|| {
            Error::InvalidArgument(format!("unsupported root type: {}", root.root_type))
        })?;
        if root.version != req.version {
            return Err(Error::InvalidArgument(format!(
                "root version {} does not match batch version {}",
                root.version, req.version
            )));
        }
        if !root.follows(old_root) {
            return Err(Error::RootMustFollowOld);
        }
        self.check_batch(root.version, req.chunk)?;

        let earliest = self.earliest_version();
        if root.version < earliest {
            return Err(Error::VersionWentBackwards);
        }
        if let Some(last) = self.last_finalized {
            if root.version < last {
                return Err(Error::VersionWentBackwards);
            }
            if root.version == last {
                return Err(Error::AlreadyFinalized);
            }
        }

        let has_old_root = !old_root.hash.is_empty();
        if has_old_root {
            if policy.no_child_roots && old_root.version != root.version {
                return Err(Error::RootMustFollowOld);
            }
            if old_root.version < earliest {
                return Err(Error::PreviousVersionMismatch);
            }
            // Chunks of a restore may arrive before anything they build on.
            if !req.chunk && !self.has_root(old_root) {
                return Err(Error::RootNotFound);
            }
        }
        if !req.chunk
            && !root.hash.is_empty()
            && !req.nodes.contains_key(&root.hash)
            && !self.nodes.contains_key(&root.hash)
        {
            return Err(Error::NodeNotFound);
        }
        if !self.versions.contains_key(&root.version)
            && self.pending_versions() >= MAX_PENDING_VERSIONS
        {
            return Err(Error::PendingVersionsExceeded {
                max: MAX_PENDING_VERSIONS,
            });
        }

        for (hash, data) in req.nodes {
            if let Entry::Vacant(slot) = self.nodes.entry(*hash) {
                slot.insert(data.clone());
                if let Some(session) = &mut self.multipart {
                    session.nodes.insert(*hash);
                }
            }
        }

        let meta = self.versions.entry(root.version).or_default();
        meta.superseded.extend(req.removed.iter().copied());
        let root_meta = match meta.roots.entry(*root) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                if let Some(session) = &mut self.multipart {
                    session.roots.insert(*root);
                }
                slot.insert(RootMeta {
                    chunked: req.chunk,
                    derived: Vec::new(),
                })
            }
        };
        root_meta.chunked &= req.chunk;

        if has_old_root && old_root != root {
            if let Some(parent) = self
                .versions
                .get_mut(&old_root.version)
                .and_then(|meta| meta.roots.get_mut(old_root))
            {
                if !parent.derived.contains(root) {
                    parent.derived.push(*root);
                }
            }
        }

        if let (Some(log), false, false) = (req.write_log, req.chunk, req.discard_write_logs) {
            self.write_logs.insert((*old_root, *root), log.clone());
        }

        Ok(())
    }

    /// Finalize the version of `roots`, returning the hashes of nodes that were reclaimed
    pub fn finalize(&mut self, roots: &[Root]) -> Result<Vec<Hash>> {
        let first = roots
            .first()
            .ok_or_else(|| Error::InvalidArgument("no roots to finalize".into()))?;
        let version = first.version;
        for root in roots {
            if root.namespace != self.namespace {
                return Err(Error::BadNamespace);
            }
            if root.version != version {
                return Err(Error::InvalidArgument(
                    "roots to finalize must share one version".into(),
                ));
            }
        }
        if self.multipart_version().is_some_and(|v| v != version) {
            return Err(Error::InvalidMultipartVersion);
        }
        match self.last_finalized {
            Some(last) if version <= last => return Err(Error::AlreadyFinalized),
            Some(last) if version - 1 > last => return Err(Error::NotFinalized),
            None if version < self.earliest_version() => return Err(Error::VersionWentBackwards),
            _ => {}
        }
        if let Some(missing) = roots.iter().find(|r| !self.has_root(r)) {
            warn!(root = %missing, "cannot finalize unknown root");
            return Err(Error::RootNotFound);
        }
        // Chunked roots only become final once every node below them has arrived.
        if let Some(meta) = self.versions.get(&version) {
            let incomplete = roots.iter().find(|r| {
                meta.roots.get(r).is_some_and(|root_meta| root_meta.chunked) && !self.is_complete(r)
            });
            if let Some(root) = incomplete {
                warn!(root = %root, "cannot finalize incomplete multipart root");
                return Err(Error::NotFinalized);
            }
        }

        let keep: HashSet<Root> = roots.iter().copied().collect();
        let mut discarded: Vec<(Root, RootMeta)> = Vec::new();

        // Nothing below the first finalized version can be finalized anymore.
        if self.last_finalized.is_none() {
            let stale: Vec<u64> = self.versions.range(..version).map(|(v, _)| *v).collect();
            for v in stale {
                if let Some(meta) = self.versions.remove(&v) {
                    discarded.extend(meta.roots);
                }
            }
        }

        if let Some(meta) = self.versions.get_mut(&version) {
            let unlisted: Vec<Root> = meta
                .roots
                .keys()
                .filter(|r| !keep.contains(r))
                .copied()
                .collect();
            for root in unlisted {
                if let Some(root_meta) = meta.roots.remove(&root) {
                    discarded.push((root, root_meta));
                }
            }
        }

        // Later roots derived only from discarded roots go as well.
        let mut queue: VecDeque<Root> = discarded
            .iter()
            .flat_map(|(_, meta)| meta.derived.iter().copied())
            .collect();
        while let Some(candidate) = queue.pop_front() {
            if keep.contains(&candidate) || self.has_live_parent(&candidate) {
                continue;
            }
            let Some(meta) = self
                .versions
                .get_mut(&candidate.version)
                .and_then(|v| v.roots.remove(&candidate))
            else {
                continue;
            };
            queue.extend(meta.derived.iter().copied());
            discarded.push((candidate, meta));
        }

        let discarded_roots: HashSet<Root> = discarded.iter().map(|(r, _)| *r).collect();
        self.forget_roots(&discarded_roots);
        self.versions
            .retain(|v, meta| *v == version || meta.finalized || !meta.roots.is_empty());

        let meta = self.versions.entry(version).or_default();
        meta.finalized = true;
        for root_meta in meta.roots.values_mut() {
            root_meta.chunked = false;
        }
        self.last_finalized = Some(version);
        if self.multipart_version() == Some(version) {
            self.multipart = None;
        }

        let candidates = self.reachable(discarded_roots.iter().copied());
        Ok(self.collect_garbage(candidates))
    }

    /// Prune the earliest version, returning the hashes of nodes that were reclaimed
    pub fn prune(&mut self, version: u64) -> Result<Vec<Hash>> {
        if self.multipart.is_some() {
            return Err(Error::MultipartInProgress);
        }
        if version != self.earliest_version() {
            return Err(Error::NotEarliest);
        }
        let meta = self.versions.get(&version).ok_or(Error::VersionNotFound)?;
        if !meta.finalized {
            return Err(Error::NotFinalized);
        }
        if self.last_finalized == Some(version) {
            return Err(Error::CannotPruneLatestVersion);
        }

        let meta = self.versions.remove(&version).ok_or(Error::VersionNotFound)?;
        self.write_logs
            .retain(|(start, end), _| start.version != version && end.version != version);
        self.pruned_floor = version + 1;

        let mut candidates = self.reachable(meta.roots.keys().copied());
        candidates.extend(meta.superseded);
        // Marks recorded by transitions out of the pruned version.
        if let Some(next) = self.versions.get(&(version + 1)) {
            candidates.extend(next.superseded.iter().copied());
        }
        Ok(self.collect_garbage(candidates))
    }

    pub fn start_multipart(&mut self, version: u64) -> Result<()> {
        if self.multipart.is_some() {
            return Err(Error::MultipartInProgress);
        }
        if self.last_finalized.is_some_and(|last| version <= last) {
            return Err(Error::AlreadyFinalized);
        }
        if version < self.earliest_version() {
            return Err(Error::VersionWentBackwards);
        }
        self.multipart = Some(MultipartSession {
            version,
            nodes: HashSet::new(),
            roots: HashSet::new(),
        });
        Ok(())
    }

    /// Abort the active session, returning its version and the removed node hashes
    ///
    /// Only roots and nodes the session introduced are removed; anything committed at the
    /// session version before it started stays.
    pub fn abort_multipart(&mut self) -> Option<(u64, Vec<Hash>)> {
        let session = self.multipart.take()?;

        let mut removed_roots = HashSet::new();
        if let Some(meta) = self.versions.get_mut(&session.version) {
            for root in &session.roots {
                if meta.roots.remove(root).is_some() {
                    removed_roots.insert(*root);
                }
            }
            if !meta.finalized && meta.roots.is_empty() {
                self.versions.remove(&session.version);
            }
        }
        self.forget_roots(&removed_roots);

        Some((session.version, self.collect_garbage(session.nodes)))
    }

    /// Stored write logs leading from `start` to `end`, in order
    pub fn write_log_path(
        &self,
        cancel: &CancellationToken,
        start: &Root,
        end: &Root,
    ) -> Result<Vec<Arc<WriteLog>>> {
        if start.namespace != self.namespace || end.namespace != self.namespace {
            return Err(Error::BadNamespace);
        }
        if !self.has_root(end) {
            return Err(Error::RootNotFound);
        }
        if start == end {
            return Ok(Vec::new());
        }

        let mut edges: HashMap<&Root, Vec<&Root>> = HashMap::new();
        for (from, to) in self.write_logs.keys() {
            edges.entry(from).or_default().push(to);
        }

        let mut previous: HashMap<&Root, &Root> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if current == end {
                let mut path = Vec::new();
                let mut to = current;
                while let Some(from) = previous.get(to) {
                    path.push(self.write_logs[&(**from, *to)].entries.clone());
                    to = *from;
                }
                path.reverse();
                return Ok(path);
            }
            for &next in edges.get(current).into_iter().flatten() {
                if next != start && !previous.contains_key(next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        Err(Error::WriteLogNotFound)
    }

    fn has_live_parent(&self, root: &Root) -> bool {
        let lowest = root.version.saturating_sub(1);
        self.versions.range(lowest..=root.version).any(|(_, meta)| {
            meta.roots
                .values()
                .any(|root_meta| root_meta.derived.contains(root))
        })
    }

    /// Drop write logs and derived links that mention any of `roots`
    fn forget_roots(&mut self, roots: &HashSet<Root>) {
        if roots.is_empty() {
            return;
        }
        self.write_logs
            .retain(|(start, end), _| !roots.contains(start) && !roots.contains(end));
        for meta in self.versions.values_mut() {
            for root_meta in meta.roots.values_mut() {
                root_meta.derived.retain(|r| !roots.contains(r));
            }
        }
    }

    /// Child hashes of a stored node, `None` if the node is not stored
    fn children(&self, hash: &Hash) -> Option<Vec<Hash>> {
        let data = self.nodes.get(hash)?;
        match Node::unmarshal_binary(data) {
            Ok(Node::Internal(node)) => Some(
                [&node.leaf_node, &node.left, &node.right]
                    .into_iter()
                    .flatten()
                    .map(|child| child.hash)
                    .collect(),
            ),
            Ok(Node::Leaf(_)) => Some(Vec::new()),
            Err(err) => {
                warn!(node = %hash, %err, "skipping undecodable node");
                Some(Vec::new())
            }
        }
    }

    /// Hashes of all stored nodes reachable from `roots`
    fn reachable(&self, roots: impl IntoIterator<Item = Root>) -> HashSet<Hash> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Hash> = roots.into_iter().map(|r| r.hash).collect();
        while let Some(hash) = stack.pop() {
            if hash.is_empty() || !seen.insert(hash) {
                continue;
            }
            if let Some(children) = self.children(&hash) {
                stack.extend(children);
            }
        }
        seen
    }

    /// Whether every node below `root` is stored
    fn is_complete(&self, root: &Root) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![root.hash];
        while let Some(hash) = stack.pop() {
            if hash.is_empty() || !seen.insert(hash) {
                continue;
            }
            match self.children(&hash) {
                Some(children) => stack.extend(children),
                None => return false,
            }
        }
        true
    }

    /// Delete the candidates no longer reachable from any remaining root
    fn collect_garbage(&mut self, candidates: HashSet<Hash>) -> Vec<Hash> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let live_roots: Vec<Root> = self
            .versions
            .values()
            .flat_map(|meta| meta.roots.keys().copied())
            .collect();
        let mut live = self.reachable(live_roots);
        // Chunks may not be connected to their root yet.
        if let Some(session) = &self.multipart {
            live.extend(session.nodes.iter().copied());
        }

        let deleted: Vec<Hash> = candidates
            .into_iter()
            .filter(|hash| !live.contains(hash))
            .collect();
        for hash in &deleted {
            self.nodes.remove(hash);
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RootType;
    use crate::node::{LeafNode, Pointer};

    const NS: Namespace = Namespace::from_bytes([7u8; 32]);

    fn leaf(key: &str, value: &str) -> (Hash, Bytes) {
        let mut leaf = LeafNode::new(key, value.as_bytes().to_vec());
        leaf.update_hash();
        (leaf.hash, Bytes::from(leaf.marshal_binary().unwrap()))
    }

    fn commit(
        state: &mut State,
        old_root: Root,
        version: u64,
        nodes: &[(Hash, Bytes)],
    ) -> Result<Root> {
        let root = Root::new(NS, version, RootType::State, nodes[0].0);
        let nodes: HashMap<Hash, Bytes> = nodes.iter().cloned().collect();
        state.commit(&CommitRequest {
            old_root: &old_root,
            version,
            chunk: false,
            root: &root,
            nodes: &nodes,
            write_log: None,
            removed: &[],
            discard_write_logs: false,
        })?;
        Ok(root)
    }

    fn empty(version: u64) -> Root {
        Root::empty_at(NS, version, RootType::State)
    }

    fn internal(left: Hash, right: Hash) -> (Hash, Bytes) {
        let mut node = crate::node::InternalNode::new(
            crate::node::Key::default(),
            crate::node::Depth(0),
            None,
            Some(Pointer::from_hash(left)),
            Some(Pointer::from_hash(right)),
        );
        node.update_hash();
        (node.hash, Bytes::from(node.marshal_binary().unwrap()))
    }

    fn commit_chunk(state: &mut State, root: &Root, nodes: &[(Hash, Bytes)]) -> Result<()> {
        let nodes: HashMap<Hash, Bytes> = nodes.iter().cloned().collect();
        state.commit(&CommitRequest {
            old_root: &empty(root.version),
            version: root.version,
            chunk: true,
            root,
            nodes: &nodes,
            write_log: None,
            removed: &[],
            discard_write_logs: false,
        })
    }

    #[test]
    fn test_commit_rejects_backwards_versions() {
        let mut state = State::new(NS);
        let r0 = commit(&mut state, empty(0), 0, &[leaf("a", "1")]).unwrap();
        state.finalize(&[r0]).unwrap();

        let err = commit(&mut state, empty(0), 0, &[leaf("b", "1")]).unwrap_err();
        assert!(matches!(err, Error::AlreadyFinalized));

        let r1 = commit(&mut state, r0, 1, &[leaf("a", "2")]).unwrap();
        state.finalize(&[r1]).unwrap();
        let err = commit(&mut state, empty(0), 0, &[leaf("c", "1")]).unwrap_err();
        assert!(matches!(err, Error::VersionWentBackwards));
    }

    #[test]
    fn test_commit_requires_known_old_root() {
        let mut state = State::new(NS);
        let unknown = Root::new(NS, 0, RootType::State, Hash::digest(b"nope"));
        let err = commit(&mut state, unknown, 1, &[leaf("a", "1")]).unwrap_err();
        assert!(matches!(err, Error::RootNotFound));
        assert_eq!(state.node_count(), 0);

        let err = commit(&mut state, empty(0), 2, &[leaf("a", "1")]).unwrap_err();
        assert!(matches!(err, Error::RootMustFollowOld));
    }

    #[test]
    fn test_io_roots_cannot_carry_over() {
        let mut state = State::new(NS);
        let (hash, data) = leaf("io", "1");
        let nodes = HashMap::from([(hash, data)]);
        let io0 = Root::new(NS, 0, RootType::IO, hash);
        let io1 = Root::new(NS, 1, RootType::IO, hash);
        let mut req = CommitRequest {
            old_root: &Root::empty_at(NS, 0, RootType::IO),
            version: 0,
            chunk: false,
            root: &io0,
            nodes: &nodes,
            write_log: None,
            removed: &[],
            discard_write_logs: false,
        };
        state.commit(&req).unwrap();

        req.old_root = &io0;
        req.root = &io1;
        req.version = 1;
        assert!(matches!(state.commit(&req), Err(Error::RootMustFollowOld)));
    }

    #[test]
    fn test_finalize_discards_unlisted_and_derived_roots() {
        let mut state = State::new(NS);
        let base = commit(&mut state, empty(0), 0, &[leaf("base", "0")]).unwrap();
        state.finalize(&[base]).unwrap();

        let a = commit(&mut state, base, 1, &[leaf("a", "1")]).unwrap();
        let b = commit(&mut state, base, 1, &[leaf("b", "1")]).unwrap();
        let a_next = commit(&mut state, a, 2, &[leaf("a", "2")]).unwrap();
        let b_next = commit(&mut state, b, 2, &[leaf("b", "2")]).unwrap();

        let reclaimed = state.finalize(&[a]).unwrap();

        assert!(state.has_root(&a));
        assert!(state.has_root(&a_next));
        assert!(!state.has_root(&b));
        assert!(!state.has_root(&b_next));
        assert_eq!(reclaimed.len(), 2);
        assert!(state.node(&b.hash).is_none());
        assert!(state.node(&b_next.hash).is_none());
        assert!(state.node(&a_next.hash).is_some());
    }

    #[test]
    fn test_finalize_without_forks_reclaims_nothing() {
        let mut state = State::new(NS);
        let r0 = commit(&mut state, empty(0), 0, &[leaf("a", "0")]).unwrap();
        assert!(state.finalize(&[r0]).unwrap().is_empty());
        let r1 = commit(&mut state, r0, 1, &[leaf("a", "1")]).unwrap();
        assert!(state.finalize(&[r1]).unwrap().is_empty());
        assert_eq!(state.node_count(), 2);
    }

    #[test]
    fn test_finalize_order() {
        let mut state = State::new(NS);
        let r0 = commit(&mut state, empty(0), 0, &[leaf("a", "0")]).unwrap();
        let r1 = commit(&mut state, r0, 1, &[leaf("a", "1")]).unwrap();
        state.finalize(&[r0]).unwrap();

        let r2 = commit(&mut state, r1, 2, &[leaf("a", "2")]).unwrap();
        assert!(matches!(state.finalize(&[r2]), Err(Error::NotFinalized)));
        assert!(matches!(state.finalize(&[r0]), Err(Error::AlreadyFinalized)));

        let stray = Root::new(NS, 1, RootType::State, Hash::digest(b"stray"));
        assert!(matches!(state.finalize(&[stray]), Err(Error::RootNotFound)));
        assert!(matches!(
            state.finalize(&[r1, r2]),
            Err(Error::InvalidArgument(_))
        ));
        state.finalize(&[r1]).unwrap();
        assert_eq!(state.last_finalized(), Some(1));
    }

    #[test]
    fn test_prune_reclaims_unshared_nodes() {
        let mut state = State::new(NS);
        let shared = leaf("shared", "x");
        let (old_hash, old_data) = leaf("old", "x");

        // An internal root over two leaves, then a version keeping only the shared leaf.
        let mut internal = crate::node::InternalNode::new(
            crate::node::Key::default(),
            crate::node::Depth(0),
            None,
            Some(Pointer::from_hash(shared.0)),
            Some(Pointer::from_hash(old_hash)),
        );
        internal.update_hash();
        let internal_data = Bytes::from(internal.marshal_binary().unwrap());

        let r0 = commit(
            &mut state,
            empty(0),
            0,
            &[(internal.hash, internal_data), shared.clone(), (old_hash, old_data)],
        )
        .unwrap();
        state.finalize(&[r0]).unwrap();
        let r1 = commit(&mut state, r0, 1, &[shared.clone()]).unwrap();
        state.finalize(&[r1]).unwrap();

        assert!(matches!(state.prune(1), Err(Error::NotEarliest)));
        let reclaimed = state.prune(0).unwrap();

        assert_eq!(reclaimed.len(), 2);
        assert!(state.node(&shared.0).is_some());
        assert!(state.node(&old_hash).is_none());
        assert_eq!(state.earliest_version(), 1);
        assert!(matches!(state.prune(1), Err(Error::CannotPruneLatestVersion)));
    }

    #[test]
    fn test_multipart_abort_removes_session_nodes() {
        let mut state = State::new(NS);
        let pre = commit(&mut state, empty(0), 0, &[leaf("pre", "0")]).unwrap();
        state.finalize(&[pre]).unwrap();

        state.start_multipart(5).unwrap();
        assert!(matches!(state.start_multipart(5), Err(Error::MultipartInProgress)));
        assert!(matches!(state.check_batch(6, true), Err(Error::InvalidMultipartVersion)));

        // Re-inserting an existing node is not attributed to the session.
        let (hash, data) = leaf("chunk", "1");
        let target = Root::new(NS, 5, RootType::State, Hash::digest(b"target"));
        let nodes = HashMap::from([(hash, data), leaf("pre", "0")]);
        state
            .commit(&CommitRequest {
                old_root: &empty(5),
                version: 5,
                chunk: true,
                root: &target,
                nodes: &nodes,
                write_log: None,
                removed: &[],
                discard_write_logs: false,
            })
            .unwrap();
        assert!(state.has_root(&target));

        let (version, deleted) = state.abort_multipart().unwrap();
        assert_eq!(version, 5);
        assert_eq!(deleted, vec![hash]);
        assert!(!state.has_root(&target));
        assert!(state.node(&pre.hash).is_some());
        assert!(state.abort_multipart().is_none());
    }

    #[test]
    fn test_multipart_abort_keeps_earlier_roots() {
        let mut state = State::new(NS);
        let before = commit(&mut state, empty(5), 5, &[leaf("before", "5")]).unwrap();

        state.start_multipart(5).unwrap();
        let (hash, data) = leaf("chunk", "5");
        let target = Root::new(NS, 5, RootType::State, hash);
        commit_chunk(&mut state, &target, &[(hash, data)]).unwrap();
        assert_eq!(state.roots_for_version(5).len(), 2);

        let (_, deleted) = state.abort_multipart().unwrap();
        assert_eq!(deleted, vec![hash]);
        assert_eq!(state.roots_for_version(5), vec![before]);
        assert!(state.node(&before.hash).is_some());
        assert_eq!(state.node_count(), 1);

        // The version stays usable for regular commits.
        commit(&mut state, before, 5, &[leaf("after", "5")]).unwrap();
        state.finalize(&[before]).unwrap();
    }

    #[test]
    fn test_finalize_requires_complete_chunked_roots() {
        let mut state = State::new(NS);
        let left = leaf("a", "1");
        let right = leaf("b", "2");
        let (root_hash, root_data) = internal(left.0, right.0);
        let target = Root::new(NS, 3, RootType::State, root_hash);

        state.start_multipart(3).unwrap();
        commit_chunk(&mut state, &target, &[(root_hash, root_data)]).unwrap();
        commit_chunk(&mut state, &target, &[left]).unwrap();

        assert!(matches!(state.finalize(&[target]), Err(Error::NotFinalized)));
        assert_eq!(state.multipart_version(), Some(3));

        commit_chunk(&mut state, &target, &[right]).unwrap();
        state.finalize(&[target]).unwrap();
        assert_eq!(state.last_finalized(), Some(3));
        assert_eq!(state.multipart_version(), None);
        assert_eq!(state.node_count(), 3);
    }

    #[test]
    fn test_write_log_path_chains_transitions() {
        let mut state = State::new(NS);
        let log = |key: &str| StoredWriteLog {
            entries: Arc::new(vec![crate::writelog::LogEntry::insert(key, "v")]),
            annotations: Vec::new(),
        };

        let mut roots = vec![empty(0)];
        for (version, key) in ["a", "b", "c"].iter().enumerate() {
            let version = version as u64;
            let (hash, data) = leaf(key, "v");
            let root = Root::new(NS, version, RootType::State, hash);
            let nodes = HashMap::from([(hash, data)]);
            let stored = log(key);
            state
                .commit(&CommitRequest {
                    old_root: roots.last().unwrap(),
                    version,
                    chunk: false,
                    root: &root,
                    nodes: &nodes,
                    write_log: Some(&stored),
                    removed: &[],
                    discard_write_logs: false,
                })
                .unwrap();
            roots.push(root);
        }

        let cancel = CancellationToken::new();
        let path = state.write_log_path(&cancel, &roots[1], &roots[3]).unwrap();
        let keys: Vec<&[u8]> = path.iter().map(|log| log[0].key.as_slice()).collect();
        assert_eq!(keys, vec![b"b".as_slice(), b"c".as_slice()]);

        assert!(state.write_log_path(&cancel, &roots[2], &roots[2]).unwrap().is_empty());
        assert!(matches!(
            state.write_log_path(&cancel, &roots[3], &roots[1]),
            Err(Error::WriteLogNotFound)
        ));
        cancel.cancel();
        assert!(matches!(
            state.write_log_path(&cancel, &roots[1], &roots[3]),
            Err(Error::Cancelled)
        ));
    }
}
