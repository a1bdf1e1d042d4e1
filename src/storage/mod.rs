//! Node tape storage.
//!
//! Implements the variable-length node frame format, the sequential tape
//! indexer that recovers frame boundaries from the bytes alone, the retriever
//! registry through which caller-owned regions are resolved, and the
//! storage-mode controller that serves node views to a graph engine.

/// Frame codec.
///
/// Encodes and decodes single node frames at arbitrary region offsets.
pub mod frame;

mod header;
mod histogram;
mod layout;
mod options;
mod retriever;
mod store;
mod tape;
mod view;

/// Region header and its fixed size.
pub use header::{RegionHeader, REGION_HEADER_BYTES};

/// Per-level node counts gathered during scans.
pub use histogram::{HistogramReport, LevelHistogram, DEFAULT_MAX_TRACKED_LEVEL};

/// Frame sizing and neighbor-list constants.
pub use layout::{
    FrameLayout, IndexMetadata, DIM_FIELD_BYTES, LABEL_BYTES, LEVEL_FIELD_BYTES,
    NEIGHBOR_COUNT_BYTES, NODE_HEAD_BYTES,
};

/// Store configuration.
pub use options::StoreOptions;

/// Id-to-offset resolution through caller accessors.
pub use retriever::{Accessor, RetrieverRegistry};

/// Storage-mode controller and the node access contract.
pub use store::{NodeSource, NodeStore, StorageMode};

/// Tape indexer and in-memory tape assembly.
pub use tape::{Tape, TapeEntry, TapeWriter};

/// Typed node views.
pub use view::{NodeView, NodeViewMut};

pub use frame::NodeFrame;
