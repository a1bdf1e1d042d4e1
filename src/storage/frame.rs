//! On-tape record of a single graph node.
//!
//! ```text
//! [label:8][dim:4][level:4][base neighbors][level x upper neighbors][vector]
//! ```
//!
//! The dimension field carries the vector payload width in bytes, which is
//! what the engine records for punned vectors.

use crate::primitives::bytes::{checked_range, le};
use crate::types::{Label, Result, TapeError, VectorRef};

use super::layout::{FrameLayout, LABEL_BYTES, NODE_HEAD_BYTES};

const DIM_AT: usize = LABEL_BYTES;
const LEVEL_AT: usize = LABEL_BYTES + 4;

/// Decoded head of a node frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeFrame {
    /// External label.
    pub label: Label,
    /// Vector dimensionality.
    pub dim: u32,
    /// Hierarchy level; the frame carries `level` upper neighbor blocks.
    pub level: u32,
}

/// Decodes the frame starting at `offset` and returns it with its size.
///
/// The whole frame, not just its head, must lie inside `tape`.
pub fn decode(tape: &[u8], offset: usize, layout: &FrameLayout) -> Result<(NodeFrame, usize)> {
    let head = checked_range(offset, NODE_HEAD_BYTES, tape.len())?;
    let head = &tape[head];
    let label = Label(le::get_u64(head, 0)?);
    let vector_bytes = le::get_u32(head, DIM_AT)? as usize;
    let raw_level = le::get_i32(head, LEVEL_AT)?;

    let expected = layout.vector_bytes();
    if vector_bytes != expected {
        return Err(TapeError::FormatMismatch {
            offset,
            expected,
            found: vector_bytes,
        });
    }
    let level = u32::try_from(raw_level).map_err(|_| TapeError::InvalidLevel {
        offset,
        level: raw_level,
    })?;

    let size = layout
        .checked_frame_size(level)
        .ok_or(TapeError::OutOfBounds {
            offset,
            len: usize::MAX,
            bound: tape.len(),
        })?;
    checked_range(offset, size, tape.len())?;
    Ok((
        NodeFrame {
            label,
            dim: layout.dimensions as u32,
            level,
        },
        size,
    ))
}

/// Decodes a frame that starts at the first byte of `frame`, as handed out by
/// node views.
pub fn decode_head(frame: &[u8], layout: &FrameLayout) -> Result<(NodeFrame, usize)> {
    decode(frame, 0, layout)
}

/// Validates a vector and level against `layout` without writing anything.
pub fn check_input(layout: &FrameLayout, vector: VectorRef<'_>, level: u32) -> Result<()> {
    if vector.kind() != layout.scalar {
        return Err(TapeError::ScalarMismatch {
            expected: layout.scalar,
            found: vector.kind(),
        });
    }
    if vector.byte_len() != layout.vector_bytes() {
        return Err(TapeError::InvalidArgument(format!(
            "vector is {} bytes, layout expects {}",
            vector.byte_len(),
            layout.vector_bytes()
        )));
    }
    if i32::try_from(level).is_err() {
        return Err(TapeError::InvalidArgument(format!(
            "level {level} does not fit the level field"
        )));
    }
    Ok(())
}

/// Writes a fresh frame at `offset` and returns its size.
///
/// Neighbor blocks are zeroed, i.e. every layer starts with no neighbors.
pub fn encode(
    buffer: &mut [u8],
    offset: usize,
    layout: &FrameLayout,
    label: Label,
    vector: VectorRef<'_>,
    level: u32,
) -> Result<usize> {
    check_input(layout, vector, level)?;
    let size = layout.frame_size(level);
    let range = checked_range(offset, size, buffer.len())?;
    let frame = &mut buffer[range];

    le::put_u64(frame, 0, label.0)?;
    le::put_u32(frame, DIM_AT, layout.vector_bytes() as u32)?;
    le::put_i32(frame, LEVEL_AT, level as i32)?;
    let vector_range = layout.vector_range(level);
    frame[NODE_HEAD_BYTES..vector_range.start].fill(0);
    vector.write_le(&mut frame[vector_range]);
    Ok(size)
}
