//! Variable-length node frames for graph-based vector indexes, stored in
//! caller-owned or memory-mapped regions.
//!
//! The [`storage::Tape`] indexer recovers node boundaries from the bytes
//! alone, [`storage::RetrieverRegistry`] lets callers resolve nodes through
//! their own accessors, and [`storage::NodeStore`] serves node views in
//! owned, eager, or lazy mode.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::region::{BoundRegion, MapMode, RegionHandle};
pub use storage::{NodeSource, NodeStore, RetrieverRegistry, StorageMode, StoreOptions};
pub use types::{Label, NodeId, Result, ScalarKind, TapeError, VectorRef};
