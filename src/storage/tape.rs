//! Sequential index over a region of node frames.
//!
//! Frames are variable-length and their size is only known once the head has
//! been decoded, so the tape is recovered by walking the region front to
//! back. The resulting per-node table is kept so later lookups are O(1).

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{Label, NodeId, Result, TapeError, VectorRef};

use super::frame;
use super::header::{RegionHeader, REGION_HEADER_BYTES};
use super::histogram::LevelHistogram;
use super::layout::FrameLayout;
use super::options::StoreOptions;

/// Location of one frame inside its region.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct TapeEntry {
    /// Region offset of the frame.
    pub offset: usize,
    /// Frame size in bytes.
    pub frame_size: usize,
    /// Level recorded on the frame.
    pub level: u32,
}

impl TapeEntry {
    /// Offset one past the frame.
    pub fn end(&self) -> usize {
        self.offset + self.frame_size
    }
}

/// Ordered, gap-free table of frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tape {
    entries: Vec<TapeEntry>,
    header_bytes: usize,
    end: usize,
}

impl Tape {
    /// Creates a tape with no frames.
    pub fn empty(header_bytes: usize) -> Self {
        Self {
            entries: Vec::new(),
            header_bytes,
            end: header_bytes,
        }
    }

    /// Walks `node_count` frames of `region` starting after the header.
    ///
    /// Any decode failure aborts the scan: a frame that cannot be trusted
    /// leaves every later offset unknown. Levels beyond the histogram ceiling
    /// are only logged.
    pub fn build(
        region: &[u8],
        layout: &FrameLayout,
        node_count: usize,
        options: &StoreOptions,
    ) -> Result<(Tape, LevelHistogram)> {
        if options.header_bytes > region.len() {
            return Err(TapeError::OutOfBounds {
                offset: 0,
                len: options.header_bytes,
                bound: region.len(),
            });
        }
        let mut tape = Tape::empty(options.header_bytes);
        tape.entries.reserve(node_count);
        let mut histogram = LevelHistogram::new(options.max_tracked_level);
        let mut progress = options.header_bytes;

        for idx in 0..node_count {
            let (node, frame_size) =
                frame::decode(region, progress, layout).inspect_err(|err| {
                    warn!(node = idx, offset = progress, error = %err, "tape.build.abort");
                })?;
            tape.entries.push(TapeEntry {
                offset: progress,
                frame_size,
                level: node.level,
            });
            histogram.observe(node.level);
            progress += frame_size;
        }
        tape.end = progress;

        info!(
            nodes = node_count,
            tape_bytes = progress,
            tail_bytes = region.len() - progress,
            "tape.build.complete"
        );
        if options.log_histogram {
            histogram.report();
        }
        Ok((tape, histogram))
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the tape holds no frames.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `id`.
    pub fn entry(&self, id: NodeId) -> Option<&TapeEntry> {
        self.entries.get(id.index())
    }

    /// Region offset of `id`'s frame.
    pub fn locate(&self, id: NodeId) -> Option<usize> {
        self.entry(id).map(|entry| entry.offset)
    }

    /// Iterates entries in tape order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TapeEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (NodeId::from(idx), entry))
    }

    /// Reserved header size.
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    /// Offset one past the last frame.
    pub fn end_offset(&self) -> usize {
        self.end
    }

    /// Bytes occupied by frames.
    pub fn frame_bytes(&self) -> usize {
        self.end - self.header_bytes
    }

    /// Whether the frames fill a region of `region_len` bytes exactly.
    pub fn is_exact(&self, region_len: usize) -> bool {
        self.end == region_len
    }

    /// Highest level on the tape and the first node carrying it.
    pub fn top(&self) -> Option<(NodeId, u32)> {
        self.iter()
            .fold(None, |best: Option<(NodeId, u32)>, (id, entry)| match best {
                Some((_, level)) if level >= entry.level => best,
                _ => Some((id, entry.level)),
            })
    }

    /// Appends a frame that must start exactly at [`Tape::end_offset`].
    pub fn push_frame(&mut self, entry: TapeEntry) -> Result<NodeId> {
        if entry.offset != self.end {
            return Err(TapeError::InvalidArgument(format!(
                "frame at {} does not continue the tape ending at {}",
                entry.offset, self.end
            )));
        }
        let id = NodeId::from(self.entries.len());
        self.end = entry.end();
        self.entries.push(entry);
        debug!(node = id.0, offset = entry.offset, level = entry.level, "tape.push_frame");
        Ok(id)
    }
}

/// Assembles a region image in memory, frame by frame.
pub struct TapeWriter {
    layout: FrameLayout,
    buf: Vec<u8>,
    tape: Tape,
}

impl TapeWriter {
    /// Starts an image with `header_bytes` of reserved space.
    pub fn new(layout: FrameLayout, header_bytes: usize) -> Self {
        Self {
            layout,
            buf: vec![0u8; header_bytes],
            tape: Tape::empty(header_bytes),
        }
    }

    /// Appends a node and returns its id.
    pub fn push(&mut self, label: Label, vector: VectorRef<'_>, level: u32) -> Result<NodeId> {
        let offset = self.buf.len();
        self.buf.resize(offset + self.layout.frame_size(level), 0);
        let frame_size = frame::encode(&mut self.buf, offset, &self.layout, label, vector, level)
            .inspect_err(|_| self.buf.truncate(offset))?;
        self.tape.push_frame(TapeEntry {
            offset,
            frame_size,
            level,
        })
    }

    /// Frames written so far.
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Header describing the frames written so far.
    pub fn header(&self) -> RegionHeader {
        let top = self.tape.top();
        RegionHeader {
            scalar: self.layout.scalar,
            dimensions: self.layout.dimensions as u32,
            connectivity: (self.layout.metadata.connectivity_max_base / 2) as u32,
            node_count: self.tape.len() as u64,
            entry: top.map(|(id, _)| id),
            max_level: top.map(|(_, level)| level).unwrap_or(0),
        }
    }

    /// Returns the image; the header is stamped when there is room for it.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.finish_with_spare(0)
    }

    /// Returns the image followed by `spare` zero bytes for later appends.
    pub fn finish_with_spare(mut self, spare: usize) -> Result<Vec<u8>> {
        if self.tape.header_bytes() >= REGION_HEADER_BYTES {
            let header = self.header();
            header.write(&mut self.buf)?;
        }
        self.buf.resize(self.buf.len() + spare, 0);
        Ok(self.buf)
    }
}
