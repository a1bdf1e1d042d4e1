#![allow(missing_docs)]

use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Once};

use nodetape::{
    storage::{FrameLayout, IndexMetadata, Tape, TapeWriter, REGION_HEADER_BYTES},
    BoundRegion, Label, MapMode, NodeId, NodeSource, NodeStore, RetrieverRegistry, ScalarKind,
    StorageMode, StoreOptions, TapeError, VectorRef,
};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

const DIMS: usize = 16;
const NODES: usize = 300;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("nodetape=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn layout() -> FrameLayout {
    FrameLayout::new(DIMS, ScalarKind::F32, IndexMetadata::derive(8, 8).unwrap()).unwrap()
}

fn options() -> StoreOptions {
    StoreOptions::default().log_histogram(false)
}

struct Dataset {
    image: Vec<u8>,
    offsets: Vec<usize>,
    queries: Vec<Vec<f32>>,
}

fn dataset(seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let layout = layout();
    let mut writer = TapeWriter::new(layout, REGION_HEADER_BYTES);
    for idx in 0..NODES {
        let vector: Vec<f32> = (0..DIMS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let level = layout.metadata.random_level(&mut rng);
        writer
            .push(Label(10_000 + idx as u64), VectorRef::F32(&vector), level)
            .unwrap();
    }
    let offsets = writer.tape().iter().map(|(_, e)| e.offset).collect();
    let queries = (0..8)
        .map(|_| (0..DIMS).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    Dataset {
        image: writer.finish().unwrap(),
        offsets,
        queries,
    }
}

fn write_region(dir: &TempDir, image: &[u8]) -> File {
    let path = dir.path().join("nodes.tape");
    let mut file = File::create(&path).unwrap();
    file.write_all(image).unwrap();
    file.sync_all().unwrap();
    File::options().read(true).write(true).open(&path).unwrap()
}

type OffsetTable = RwLock<Vec<usize>>;

fn lookup(table: &OffsetTable, id: NodeId) -> Option<usize> {
    table.read().get(id.index()).copied()
}

fn table_registry(region: &BoundRegion, offsets: Vec<usize>) -> RetrieverRegistry {
    RetrieverRegistry::register(
        region.handle(),
        Arc::new(RwLock::new(offsets)),
        Some(lookup),
        Some(lookup),
    )
    .unwrap()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Brute-force k-nearest labels by squared L2 distance.
fn exact_search(source: &impl NodeSource, query: &[f32], k: usize) -> Vec<(Label, f32)> {
    let mut scored: Vec<(Label, f32)> = (0..source.len())
        .map(|idx| {
            let node = source.node(NodeId(idx as u64)).unwrap();
            let distance = decode_vector(node.vector_bytes())
                .iter()
                .zip(query)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            (node.label(), distance)
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

#[test]
fn lazy_and_eager_search_agree_on_mapped_file() {
    init_tracing();
    let data = dataset(11);
    let dir = TempDir::new().unwrap();
    let file = write_region(&dir, &data.image);
    let region = BoundRegion::map_file(&file, MapMode::ReadOnly).unwrap();

    let mut eager = NodeStore::new(layout(), options());
    eager.load_eager(&region, NODES).unwrap();
    assert_eq!(eager.mode(), StorageMode::ExternalEager);
    assert!(eager.tape().unwrap().is_exact(region.len()));

    let mut lazy = NodeStore::new(layout(), options());
    lazy.set_retriever(table_registry(&region, data.offsets.clone()))
        .unwrap();
    lazy.load_lazy(&region, NODES).unwrap();
    assert_eq!(lazy.mode(), StorageMode::ExternalLazy);

    let mut owned = NodeStore::new(layout(), options());
    owned.load_owned(data.image.clone(), NODES).unwrap();

    for query in &data.queries {
        let expected = exact_search(&eager, query, 10);
        assert_eq!(expected.len(), 10);
        assert_eq!(exact_search(&lazy, query, 10), expected);
        assert_eq!(exact_search(&owned, query, 10), expected);
    }
}

#[test]
fn lazy_store_without_retriever_is_refused() {
    let data = dataset(3);
    let dir = TempDir::new().unwrap();
    let file = write_region(&dir, &data.image);
    let region = BoundRegion::map_file(&file, MapMode::ReadOnly).unwrap();

    let mut store = NodeStore::new(layout(), options());
    assert!(matches!(
        store.load_lazy(&region, NODES),
        Err(TapeError::Precondition("retriever required"))
    ));

    let empty = RetrieverRegistry::register::<OffsetTable>(
        region.handle(),
        Arc::new(RwLock::new(Vec::new())),
        None,
        None,
    )
    .unwrap();
    assert!(empty.is_empty());
    store.set_retriever(empty).unwrap();
    assert!(matches!(
        store.load_lazy(&region, NODES),
        Err(TapeError::Precondition("retriever required"))
    ));
    assert!(!store.is_loaded());
}

#[test]
fn cross_check_flags_disagreeing_offsets() {
    init_tracing();
    let data = dataset(5);
    let region = BoundRegion::from_vec(data.image.clone());
    let mut offsets = data.offsets.clone();
    offsets[7] = offsets[8];

    let mut store = NodeStore::new(layout(), options().cross_check(true));
    store.set_retriever(table_registry(&region, offsets)).unwrap();
    store.load_eager(&region, NODES).unwrap();

    assert!(store.node(NodeId(6)).is_ok());
    assert!(store.node(NodeId(8)).is_ok());
    match store.node(NodeId(7)) {
        Err(TapeError::Integrity { node, .. }) => assert_eq!(node, NodeId(7)),
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[test]
fn copy_on_write_mapping_keeps_file_untouched() {
    let data = dataset(9);
    let dir = TempDir::new().unwrap();
    let file = write_region(&dir, &data.image);
    let region = BoundRegion::map_file(&file, MapMode::CopyOnWrite).unwrap();

    let mut store = NodeStore::new(layout(), options());
    store.load_eager(&region, NODES).unwrap();
    {
        let mut node = store.node_mut(NodeId(0)).unwrap();
        node.set_neighbors(0, &[NodeId(1), NodeId(2)]).unwrap();
    }
    assert_eq!(
        store.node(NodeId(0)).unwrap().neighbors(0).unwrap(),
        Some(vec![NodeId(1), NodeId(2)])
    );

    let on_disk = std::fs::read(dir.path().join("nodes.tape")).unwrap();
    assert_eq!(on_disk, data.image);
}

#[test]
fn read_only_mapping_refuses_mutation() {
    let data = dataset(13);
    let dir = TempDir::new().unwrap();
    let file = write_region(&dir, &data.image);
    let region = BoundRegion::map_file(&file, MapMode::ReadOnly).unwrap();

    let mut store = NodeStore::new(layout(), options());
    store.load_eager(&region, NODES).unwrap();
    assert!(matches!(
        store.node_mut(NodeId(0)),
        Err(TapeError::ReadOnly)
    ));
}

#[test]
fn shared_mapping_persists_appended_nodes() {
    init_tracing();
    let mut data = dataset(17);
    let spare = layout().frame_size(2);
    data.image.resize(data.image.len() + spare, 0);
    let dir = TempDir::new().unwrap();
    let file = write_region(&dir, &data.image);

    let appended = {
        let region = BoundRegion::map_file(&file, MapMode::Shared).unwrap();
        let mut store = NodeStore::new(layout(), options());
        store.load_eager(&region, NODES).unwrap();
        let vector = [0.5f32; DIMS];
        let id = store
            .append_node(Label(1), VectorRef::F32(&vector), 2)
            .unwrap();
        assert_eq!(store.len(), NODES + 1);
        id
    };
    assert_eq!(appended, NodeId(NODES as u64));

    let reopened = std::fs::read(dir.path().join("nodes.tape")).unwrap();
    let (tape, _) = Tape::build(&reopened, &layout(), NODES + 1, &options()).unwrap();
    assert!(tape.is_exact(reopened.len()));
    let entry = tape.entry(appended).unwrap();
    assert_eq!(entry.level, 2);
}

const fn assert_send_sync<T: Send + Sync>() {}
const _: () = {
    assert_send_sync::<NodeStore>();
    assert_send_sync::<RetrieverRegistry>();
    assert_send_sync::<BoundRegion>();
};

#[test]
fn lazy_store_serves_concurrent_readers() {
    init_tracing();
    let data = dataset(23);
    let region = BoundRegion::from_vec(data.image.clone());
    let mut store = NodeStore::new(layout(), options());
    store
        .set_retriever(table_registry(&region, data.offsets.clone()))
        .unwrap();
    store.load_lazy(&region, NODES).unwrap();

    let store = &store;
    let offsets = &data.offsets;
    std::thread::scope(|scope| {
        for worker in 0..8u64 {
            scope.spawn(move || {
                for pass in 0..50u64 {
                    for step in 0..64u64 {
                        let id = NodeId((worker * 31 + pass * 7 + step * 13) % NODES as u64);
                        let node = store.node(id).unwrap();
                        assert_eq!(node.label(), Label(10_000 + id.0));
                        assert_eq!(node.offset(), offsets[id.index()]);
                    }
                }
            });
        }
    });

    let expected = exact_search(store, &data.queries[0], 5);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| exact_search(store, &data.queries[0], 5)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}
