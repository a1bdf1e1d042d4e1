#![allow(missing_docs)]

use nodetape::{
    storage::{
        frame, FrameLayout, IndexMetadata, LevelHistogram, RegionHeader, StoreOptions, Tape,
        TapeWriter, REGION_HEADER_BYTES,
    },
    types::{Label, NodeId, ScalarKind, TapeError, VectorRef},
};
use proptest::prelude::*;

fn scenario_layout() -> FrameLayout {
    let metadata = IndexMetadata {
        inverse_log_connectivity: 1.0 / 16f64.ln(),
        connectivity_max_base: 32,
        neighbors_bytes: 32,
        neighbors_base_bytes: 64,
    };
    FrameLayout::new(128, ScalarKind::F32, metadata).expect("layout")
}

fn quiet() -> StoreOptions {
    StoreOptions::default().log_histogram(false)
}

/// Lays frames out by hand, independent of the writer.
fn hand_built(levels: &[i32]) -> Vec<u8> {
    let layout = scenario_layout();
    let mut region = vec![0u8; REGION_HEADER_BYTES];
    for (idx, &level) in levels.iter().enumerate() {
        let size = layout.frame_size(level.max(0) as u32);
        let start = region.len();
        region.resize(start + size, 0);
        region[start..start + 8].copy_from_slice(&(idx as u64 + 1).to_le_bytes());
        region[start + 8..start + 12].copy_from_slice(&512u32.to_le_bytes());
        region[start + 12..start + 16].copy_from_slice(&level.to_le_bytes());
        let vector_at = start + size - 512;
        for (dim, chunk) in region[vector_at..start + size].chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&(dim as f32).to_le_bytes());
        }
    }
    region
}

#[test]
fn scan_of_hand_built_region_matches_layout() {
    let region = hand_built(&[0, 2, 0]);
    assert_eq!(region.len(), 1904);

    let (tape, histogram) = Tape::build(&region, &scenario_layout(), 3, &quiet()).expect("scan");
    let entries: Vec<(usize, usize, u32)> = tape
        .iter()
        .map(|(_, e)| (e.offset, e.frame_size, e.level))
        .collect();
    assert_eq!(entries, vec![(64, 592, 0), (656, 656, 2), (1312, 592, 0)]);
    assert!(tape.is_exact(region.len()));
    assert_eq!(histogram.count(0), 2);
    assert_eq!(histogram.count(2), 1);

    let (node, _) = frame::decode(&region, 656, &scenario_layout()).expect("decode");
    assert_eq!(node.label, Label(2));
    assert_eq!(node.dim, 128);
    assert_eq!(node.level, 2);
}

#[test]
fn writer_output_matches_hand_built_frames() {
    let mut writer = TapeWriter::new(scenario_layout(), REGION_HEADER_BYTES);
    let vector: Vec<f32> = (0..128).map(|dim| dim as f32).collect();
    for (idx, level) in [0u32, 2, 0].into_iter().enumerate() {
        writer
            .push(Label(idx as u64 + 1), VectorRef::F32(&vector), level)
            .expect("push");
    }
    let header = writer.header();
    let written = writer.finish().expect("finish");
    let expected = hand_built(&[0, 2, 0]);
    assert_eq!(&written[REGION_HEADER_BYTES..], &expected[REGION_HEADER_BYTES..]);
    assert_eq!(RegionHeader::read(&written).expect("header"), Some(header));
}

#[test]
fn negative_level_aborts_scan() {
    let region = hand_built(&[0, -1]);
    match Tape::build(&region, &scenario_layout(), 2, &quiet()) {
        Err(TapeError::InvalidLevel { offset, level }) => assert_eq!((offset, level), (656, -1)),
        other => panic!("expected invalid level, got {other:?}"),
    }
}

#[test]
fn dimension_mismatch_reports_frame_offset() {
    let region = hand_built(&[0, 1]);
    let narrow = FrameLayout::new(64, ScalarKind::F32, scenario_layout().metadata).expect("layout");
    match Tape::build(&region, &narrow, 2, &quiet()) {
        Err(TapeError::FormatMismatch {
            offset,
            expected,
            found,
        }) => assert_eq!((offset, expected, found), (64, 256, 512)),
        other => panic!("expected format mismatch, got {other:?}"),
    }
}

#[test]
fn ceiling_level_is_logged_not_fatal() {
    let region = hand_built(&[0, 20, 1]);
    let (tape, histogram) = Tape::build(&region, &scenario_layout(), 3, &quiet()).expect("scan");
    assert_eq!(tape.len(), 3);
    assert_eq!(histogram.anomalous(), 1);
    assert_eq!(histogram.bucketed(), 2);
    assert_eq!(tape.locate(NodeId(2)), Some(64 + 592 + scenario_layout().frame_size(20)));
}

fn scalar_strategy() -> impl Strategy<Value = ScalarKind> {
    prop_oneof![
        Just(ScalarKind::F64),
        Just(ScalarKind::F32),
        Just(ScalarKind::F16),
        Just(ScalarKind::F8),
        Just(ScalarKind::B1x8),
    ]
}

fn zero_vector(scalar: ScalarKind, dims: usize) -> Vec<u8> {
    vec![0u8; scalar.vector_bytes(dims)]
}

fn vector_ref(scalar: ScalarKind, dims: usize, bytes: &[u8]) -> VectorRef<'_> {
    // Zeroed payloads are valid for every scalar kind.
    static F64: [f64; 64] = [0.0; 64];
    static F32: [f32; 64] = [0.0; 64];
    static F16: [u16; 64] = [0; 64];
    static F8: [i8; 64] = [0; 64];
    match scalar {
        ScalarKind::F64 => VectorRef::F64(&F64[..dims]),
        ScalarKind::F32 => VectorRef::F32(&F32[..dims]),
        ScalarKind::F16 => VectorRef::F16(&F16[..dims]),
        ScalarKind::F8 => VectorRef::F8(&F8[..dims]),
        ScalarKind::B1x8 => VectorRef::B1x8(bytes),
    }
}

proptest! {
    #[test]
    fn frames_tile_the_region(
        levels in proptest::collection::vec(0u32..24, 0..40),
        dims in 1usize..64,
        connectivity in 2usize..12,
        id_bytes in 1usize..=8,
        scalar in scalar_strategy(),
    ) {
        let metadata = IndexMetadata::derive(connectivity, id_bytes).unwrap();
        let layout = FrameLayout::new(dims, scalar, metadata).unwrap();
        let payload = zero_vector(scalar, dims);
        let mut writer = TapeWriter::new(layout, REGION_HEADER_BYTES);
        for (idx, &level) in levels.iter().enumerate() {
            writer.push(Label(idx as u64), vector_ref(scalar, dims, &payload), level).unwrap();
        }
        let region = writer.finish().unwrap();

        let (tape, histogram) = Tape::build(&region, &layout, levels.len(), &quiet()).unwrap();
        let sizes: usize = levels.iter().map(|&level| layout.frame_size(level)).sum();
        prop_assert_eq!(REGION_HEADER_BYTES + sizes, region.len());
        prop_assert!(tape.is_exact(region.len()));

        let mut expected_offset = REGION_HEADER_BYTES;
        for ((_, entry), &level) in tape.iter().zip(levels.iter()) {
            prop_assert_eq!(entry.offset, expected_offset);
            prop_assert_eq!(entry.level, level);
            expected_offset += entry.frame_size;
        }

        let ceiling = LevelHistogram::default().max_tracked_level() as u32;
        let anomalous = levels.iter().filter(|&&level| level >= ceiling).count() as u64;
        prop_assert_eq!(histogram.anomalous(), anomalous);
        prop_assert_eq!(histogram.bucketed(), levels.len() as u64 - anomalous);
    }
}
