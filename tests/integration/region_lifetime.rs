#![allow(missing_docs)]

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nodetape::{
    storage::{Accessor, FrameLayout, IndexMetadata, TapeWriter, REGION_HEADER_BYTES},
    BoundRegion, Label, NodeId, NodeSource, NodeStore, RetrieverRegistry, ScalarKind,
    StoreOptions, TapeError, VectorRef,
};

fn layout() -> FrameLayout {
    FrameLayout::new(8, ScalarKind::F32, IndexMetadata::derive(4, 8).unwrap()).unwrap()
}

fn image(levels: &[u32]) -> (Vec<u8>, Vec<usize>) {
    let mut writer = TapeWriter::new(layout(), REGION_HEADER_BYTES);
    for (idx, &level) in levels.iter().enumerate() {
        let vector = [idx as f32; 8];
        writer
            .push(Label(idx as u64), VectorRef::F32(&vector), level)
            .unwrap();
    }
    let offsets = writer.tape().iter().map(|(_, e)| e.offset).collect();
    (writer.finish().unwrap(), offsets)
}

struct Offsets(Vec<usize>);

fn lookup(ctx: &Offsets, id: NodeId) -> Option<usize> {
    ctx.0.get(id.index()).copied()
}

fn registry(region: &BoundRegion, offsets: Vec<usize>) -> RetrieverRegistry {
    RetrieverRegistry::register(
        region.handle(),
        Arc::new(Offsets(offsets)),
        Some(lookup),
        Some(lookup),
    )
    .unwrap()
}

#[test]
fn release_invalidates_store_and_registry() {
    let (bytes, offsets) = image(&[0, 1, 0]);
    let region = BoundRegion::from_vec(bytes);
    let registry = registry(&region, offsets);

    let mut store = NodeStore::new(layout(), StoreOptions::default());
    store.set_retriever(registry.clone()).unwrap();
    store.load_lazy(&region, 3).unwrap();
    assert_eq!(store.node(NodeId(1)).unwrap().label(), Label(1));

    region.release();

    assert!(!registry.region().is_live());
    assert!(matches!(registry.read(NodeId(0)), Err(TapeError::RegionReleased)));
    assert!(matches!(registry.write(NodeId(0)), Err(TapeError::RegionReleased)));
    assert!(matches!(store.node(NodeId(0)), Err(TapeError::RegionReleased)));
    assert!(matches!(
        store.node_mut(NodeId(0)),
        Err(TapeError::RegionReleased)
    ));
}

#[test]
fn eager_store_fails_after_release() {
    let (bytes, _) = image(&[0, 0]);
    let region = BoundRegion::from_vec(bytes);
    let mut store = NodeStore::new(layout(), StoreOptions::default());
    store.load_eager(&region, 2).unwrap();
    assert_eq!(store.len(), 2);
    drop(region);

    assert!(matches!(store.node(NodeId(1)), Err(TapeError::RegionReleased)));
    let vector = [0.0f32; 8];
    assert!(matches!(
        store.append_node(Label(9), VectorRef::F32(&vector), 0),
        Err(TapeError::RegionReleased)
    ));
}

#[test]
fn release_waits_for_outstanding_views() {
    let (bytes, _) = image(&[0]);
    let region = BoundRegion::from_vec(bytes);
    let handle = region.handle();
    let view = handle
        .read_range(NodeId(0), REGION_HEADER_BYTES, 8)
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let releaser = thread::spawn(move || {
        region.release();
        done_tx.send(()).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert!(done_rx.try_recv().is_err());
    assert_eq!(view.data(), &0u64.to_le_bytes());
    drop(view);

    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    releaser.join().unwrap();
    assert!(!handle.is_live());
    assert!(matches!(
        handle.read_range(NodeId(0), REGION_HEADER_BYTES, 8),
        Err(TapeError::RegionReleased)
    ));
}

#[test]
fn one_sided_retriever_is_a_configuration_error() {
    let (bytes, offsets) = image(&[0]);
    let region = BoundRegion::from_vec(bytes);
    let ctx = Arc::new(Offsets(offsets));
    let err = RetrieverRegistry::register(
        region.handle(),
        Arc::clone(&ctx),
        None,
        Some(lookup as Accessor<Offsets>),
    )
    .unwrap_err();
    assert!(matches!(err, TapeError::Configuration("asymmetric retriever")));
}

#[test]
fn retriever_for_another_region_is_rejected() {
    let (bytes, offsets) = image(&[0]);
    let region = BoundRegion::from_vec(bytes.clone());
    let other = BoundRegion::from_vec(bytes);

    let mut store = NodeStore::new(layout(), StoreOptions::default());
    store.load_eager(&region, 1).unwrap();
    assert!(matches!(
        store.set_retriever(registry(&other, offsets)),
        Err(TapeError::Configuration(_))
    ));
}
