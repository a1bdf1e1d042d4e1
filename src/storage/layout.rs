use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{Result, ScalarKind, TapeError};

/// Bytes of the fixed frame head: label, dimension field, level field.
pub const NODE_HEAD_BYTES: usize = LABEL_BYTES + DIM_FIELD_BYTES + LEVEL_FIELD_BYTES;
/// Width of the label field.
pub const LABEL_BYTES: usize = 8;
/// Width of the dimension field.
pub const DIM_FIELD_BYTES: usize = 4;
/// Width of the level field.
pub const LEVEL_FIELD_BYTES: usize = 4;
/// Width of the neighbor count that prefixes every neighbor block.
pub const NEIGHBOR_COUNT_BYTES: usize = 4;

/// Layout constants precomputed by the graph engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// `1 / ln(connectivity)`, scales level sampling.
    pub inverse_log_connectivity: f64,
    /// Neighbor capacity of the base layer.
    pub connectivity_max_base: usize,
    /// Size of one upper-layer neighbor block.
    pub neighbors_bytes: usize,
    /// Size of the base-layer neighbor block.
    pub neighbors_base_bytes: usize,
}

impl IndexMetadata {
    /// Derives the constants for `connectivity` neighbors per upper layer and
    /// ids of `id_bytes` bytes. The base layer holds twice as many neighbors.
    pub fn derive(connectivity: usize, id_bytes: usize) -> Result<Self> {
        if connectivity < 2 {
            return Err(TapeError::InvalidArgument(format!(
                "connectivity must be at least 2, got {connectivity}"
            )));
        }
        if id_bytes == 0 || id_bytes > 8 {
            return Err(TapeError::InvalidArgument(format!(
                "id width must be 1..=8 bytes, got {id_bytes}"
            )));
        }
        let connectivity_max_base = connectivity * 2;
        Ok(Self {
            inverse_log_connectivity: 1.0 / (connectivity as f64).ln(),
            connectivity_max_base,
            neighbors_bytes: NEIGHBOR_COUNT_BYTES + id_bytes * connectivity,
            neighbors_base_bytes: NEIGHBOR_COUNT_BYTES + id_bytes * connectivity_max_base,
        })
    }

    /// Samples the level of a node about to be inserted.
    ///
    /// Levels decay geometrically: `floor(-ln(U) / ln(connectivity))`.
    pub fn random_level<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let uniform: f64 = rng.gen_range(f64::EPSILON..1.0);
        let level = -uniform.ln() * self.inverse_log_connectivity;
        level.floor() as u32
    }
}

/// Everything needed to size and interpret one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameLayout {
    /// Configured vector dimensionality.
    pub dimensions: usize,
    /// Stored scalar kind.
    pub scalar: ScalarKind,
    /// Neighbor-list sizing.
    pub metadata: IndexMetadata,
}

impl FrameLayout {
    /// Builds a layout, rejecting empty vectors and empty neighbor blocks.
    pub fn new(dimensions: usize, scalar: ScalarKind, metadata: IndexMetadata) -> Result<Self> {
        if dimensions == 0 {
            return Err(TapeError::InvalidArgument(
                "dimensions must be positive".into(),
            ));
        }
        if metadata.neighbors_base_bytes < NEIGHBOR_COUNT_BYTES
            || metadata.neighbors_bytes < NEIGHBOR_COUNT_BYTES
        {
            return Err(TapeError::InvalidArgument(
                "neighbor blocks must hold at least a count".into(),
            ));
        }
        let layout = Self {
            dimensions,
            scalar,
            metadata,
        };
        if u32::try_from(layout.vector_bytes()).is_err() {
            return Err(TapeError::InvalidArgument(
                "vector width exceeds the dimension field".into(),
            ));
        }
        if layout.checked_frame_size(0).is_none() {
            return Err(TapeError::InvalidArgument(
                "base frame size overflows".into(),
            ));
        }
        Ok(layout)
    }

    /// Vector payload width.
    pub fn vector_bytes(&self) -> usize {
        self.scalar.vector_bytes(self.dimensions)
    }

    /// Size of a frame at `level`, saturating at `usize::MAX`.
    pub fn frame_size(&self, level: u32) -> usize {
        self.checked_frame_size(level).unwrap_or(usize::MAX)
    }

    /// Size of a frame at `level`, or `None` if it does not fit in `usize`.
    ///
    /// Levels read from a region are untrusted, and metadata is caller data.
    pub fn checked_frame_size(&self, level: u32) -> Option<usize> {
        (level as usize)
            .checked_mul(self.metadata.neighbors_bytes)?
            .checked_add(self.metadata.neighbors_base_bytes)?
            .checked_add(NODE_HEAD_BYTES)?
            .checked_add(self.vector_bytes())
    }

    /// Frame-relative range of the neighbor block for `layer` (0 is the base
    /// layer), or `None` when the node does not reach `layer`.
    pub fn neighbors_range(&self, level: u32, layer: u32) -> Option<std::ops::Range<usize>> {
        if layer > level {
            return None;
        }
        let base = NODE_HEAD_BYTES;
        if layer == 0 {
            return Some(base..base + self.metadata.neighbors_base_bytes);
        }
        let start = base
            + self.metadata.neighbors_base_bytes
            + (layer as usize - 1) * self.metadata.neighbors_bytes;
        Some(start..start + self.metadata.neighbors_bytes)
    }

    /// Frame-relative range of the vector payload.
    pub fn vector_range(&self, level: u32) -> std::ops::Range<usize> {
        let start = self.frame_size(level) - self.vector_bytes();
        start..start + self.vector_bytes()
    }

    /// Maximum number of ids a block for `layer` can hold.
    pub fn neighbor_capacity(&self, layer: u32, id_bytes: usize) -> usize {
        let block = if layer == 0 {
            self.metadata.neighbors_base_bytes
        } else {
            self.metadata.neighbors_bytes
        };
        (block - NEIGHBOR_COUNT_BYTES) / id_bytes.max(1)
    }
}
