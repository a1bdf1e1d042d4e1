//! Typed views over a single node frame.

use std::fmt;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::primitives::region::{NodeMut, NodeRef};
use crate::types::{Label, NodeId, Result, TapeError};

use super::frame::NodeFrame;
use super::layout::{FrameLayout, NEIGHBOR_COUNT_BYTES};

/// Shared view of one node, holding the region's read lock.
pub struct NodeView<'a> {
    pub(crate) bytes: NodeRef,
    pub(crate) frame: NodeFrame,
    pub(crate) layout: &'a FrameLayout,
    pub(crate) id_bytes: usize,
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.bytes.id)
            .field("offset", &self.bytes.offset())
            .field("frame", &self.frame)
            .field("len", &self.bytes.data().len())
            .finish()
    }
}

impl NodeView<'_> {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.bytes.id
    }

    /// Decoded frame head.
    pub fn frame(&self) -> NodeFrame {
        self.frame
    }

    /// External label.
    pub fn label(&self) -> Label {
        self.frame.label
    }

    /// Hierarchy level.
    pub fn level(&self) -> u32 {
        self.frame.level
    }

    /// Region offset of the frame.
    pub fn offset(&self) -> usize {
        self.bytes.offset()
    }

    /// The whole frame.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.data()
    }

    /// Little-endian vector payload.
    pub fn vector_bytes(&self) -> &[u8] {
        &self.bytes.data()[self.layout.vector_range(self.frame.level)]
    }

    /// Neighbor ids stored for `layer`, or `None` above the node's level.
    pub fn neighbors(&self, layer: u32) -> Result<Option<Vec<NodeId>>> {
        let Some(range) = self.layout.neighbors_range(self.frame.level, layer) else {
            return Ok(None);
        };
        read_neighbors(&self.bytes.data()[range], self.id_bytes).map(Some)
    }
}

/// Exclusive view of one node, holding the region's write lock.
pub struct NodeViewMut<'a> {
    pub(crate) bytes: NodeMut,
    pub(crate) frame: NodeFrame,
    pub(crate) layout: &'a FrameLayout,
    pub(crate) id_bytes: usize,
}

impl fmt::Debug for NodeViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeViewMut")
            .field("id", &self.bytes.id)
            .field("offset", &self.bytes.offset())
            .field("frame", &self.frame)
            .field("len", &self.bytes.data().len())
            .finish()
    }
}

impl NodeViewMut<'_> {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.bytes.id
    }

    /// Decoded frame head.
    pub fn frame(&self) -> NodeFrame {
        self.frame
    }

    /// Region offset of the frame.
    pub fn offset(&self) -> usize {
        self.bytes.offset()
    }

    /// The whole frame.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.data()
    }

    /// Neighbor ids stored for `layer`, or `None` above the node's level.
    pub fn neighbors(&self, layer: u32) -> Result<Option<Vec<NodeId>>> {
        let Some(range) = self.layout.neighbors_range(self.frame.level, layer) else {
            return Ok(None);
        };
        read_neighbors(&self.bytes.data()[range], self.id_bytes).map(Some)
    }

    /// Replaces the neighbor list of `layer`.
    pub fn set_neighbors(&mut self, layer: u32, ids: &[NodeId]) -> Result<()> {
        let range = self
            .layout
            .neighbors_range(self.frame.level, layer)
            .ok_or_else(|| {
                TapeError::InvalidArgument(format!(
                    "node {} has no layer {layer}",
                    self.bytes.id
                ))
            })?;
        let capacity = self.layout.neighbor_capacity(layer, self.id_bytes);
        if ids.len() > capacity {
            return Err(TapeError::InvalidArgument(format!(
                "{} neighbors exceed layer {layer} capacity {capacity}",
                ids.len()
            )));
        }
        let block = &mut self.bytes.data_mut()[range];
        block.fill(0);
        le::put_u32(block, 0, ids.len() as u32)?;
        for (slot, id) in ids.iter().enumerate() {
            le::put_uint(
                block,
                NEIGHBOR_COUNT_BYTES + slot * self.id_bytes,
                self.id_bytes,
                id.0,
            )?;
        }
        Ok(())
    }

    /// Vector payload, writable in place.
    pub fn vector_bytes_mut(&mut self) -> &mut [u8] {
        let range = self.layout.vector_range(self.frame.level);
        &mut self.bytes.data_mut()[range]
    }
}

fn read_neighbors(block: &[u8], id_bytes: usize) -> Result<Vec<NodeId>> {
    let mut cursor = Cursor::at(block, 0);
    let count = le::get_u32(cursor.take(NEIGHBOR_COUNT_BYTES)?, 0)? as usize;
    let mut ids = Vec::with_capacity(count.min(cursor.remaining() / id_bytes.max(1)));
    for _ in 0..count {
        ids.push(NodeId(le::get_uint(cursor.take(id_bytes)?, 0, id_bytes)?));
    }
    Ok(ids)
}
