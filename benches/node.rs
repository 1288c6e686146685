use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mkvs_db::db::{commit_tree, MemoryNodeDb, NodeDb};
use mkvs_db::node::{Depth, InternalNode, Key, LeafNode, Node, Pointer};
use mkvs_db::{Namespace, Root, RootType};
use tokio_util::sync::CancellationToken;

fn leaf(key: &str) -> Pointer {
    Pointer::from_node(LeafNode::new(key, vec![0xab; 64]))
}

fn tree(depth: usize, prefix: &str) -> Pointer {
    if depth == 0 {
        return leaf(prefix);
    }
    Pointer::from_node(InternalNode::new(
        Key::default(),
        Depth(0),
        Some(leaf(&format!("{prefix}*"))),
        Some(tree(depth - 1, &format!("{prefix}0"))),
        Some(tree(depth - 1, &format!("{prefix}1"))),
    ))
}

fn bench_codec(c: &mut Criterion) {
    let mut leaf = LeafNode::new("some/key", vec![0xcd; 128]);
    leaf.update_hash();
    let encoded = leaf.marshal_binary().unwrap();

    c.bench_function("leaf_encode", |b| b.iter(|| black_box(&leaf).marshal_binary()));
    c.bench_function("leaf_decode", |b| {
        b.iter(|| Node::unmarshal_binary(black_box(&encoded)))
    });
    c.bench_function("leaf_hash", |b| {
        b.iter(|| {
            let mut leaf = leaf.clone();
            leaf.update_hash();
            leaf.hash
        })
    });
}

fn bench_commit(c: &mut Criterion) {
    let ns = Namespace::from_bytes([1u8; 32]);
    c.bench_function("commit_tree_depth_8", |b| {
        b.iter_with_setup(
            || (MemoryNodeDb::new(ns), tree(8, "")),
            |(db, mut ptr)| {
                let old_root = Root::empty_at(ns, 0, RootType::State);
                let mut batch = db.new_batch(old_root, 0, false).unwrap();
                let hash =
                    commit_tree(&CancellationToken::new(), batch.as_mut(), Some(&mut ptr)).unwrap();
                batch.commit(&Root { hash, ..old_root }).unwrap();
            },
        )
    });
}

criterion_group!(benches, bench_codec, bench_commit);
criterion_main!(benches);
