//! Storage-mode controller.
//!
//! A [`NodeStore`] serves node views out of one of three backings:
//!
//! - `Owned`: the store keeps its own heap copy of the tape.
//! - `ExternalEager`: a caller-bound region, scanned completely at load.
//! - `ExternalLazy`: a caller-bound region that is never scanned; every
//!   access resolves through the installed [`RetrieverRegistry`] and the frame
//!   is validated when it is touched.
//!
//! The mode is fixed by the first successful load.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::primitives::region::{BoundRegion, RegionHandle};
use crate::types::{Label, NodeId, Result, TapeError, VectorRef};

use super::frame;
use super::header::{RegionHeader, REGION_HEADER_BYTES};
use super::histogram::LevelHistogram;
use super::layout::FrameLayout;
use super::options::StoreOptions;
use super::retriever::RetrieverRegistry;
use super::tape::{Tape, TapeEntry};
use super::view::{NodeView, NodeViewMut};

/// Where node bytes come from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Store-owned heap bytes.
    Owned,
    /// Caller region, fully indexed at load.
    ExternalEager,
    /// Caller region, resolved per access through a retriever.
    ExternalLazy,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::Owned => "owned",
            StorageMode::ExternalEager => "external-eager",
            StorageMode::ExternalLazy => "external-lazy",
        })
    }
}

/// Node access contract consumed by a graph engine.
pub trait NodeSource {
    /// Number of addressable nodes.
    fn len(&self) -> usize;

    /// Returns `true` when no node is addressable.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Layout every frame follows.
    fn layout(&self) -> &FrameLayout;

    /// Shared view of `id`.
    fn node(&self, id: NodeId) -> Result<NodeView<'_>>;

    /// Exclusive view of `id`. Blocks until all shared views are dropped.
    fn node_mut(&self, id: NodeId) -> Result<NodeViewMut<'_>>;
}

/// Serves graph nodes from owned or caller-bound storage.
#[derive(Debug)]
pub struct NodeStore {
    layout: FrameLayout,
    options: StoreOptions,
    mode: StorageMode,
    loaded: bool,
    owned: Option<BoundRegion>,
    region: Option<RegionHandle>,
    tape: Option<Tape>,
    histogram: Option<LevelHistogram>,
    header: Option<RegionHeader>,
    retriever: Option<RetrieverRegistry>,
    len: usize,
}

impl NodeStore {
    /// Creates an unloaded store in `Owned` mode.
    pub fn new(layout: FrameLayout, options: StoreOptions) -> Self {
        Self {
            layout,
            options,
            mode: StorageMode::Owned,
            loaded: false,
            owned: None,
            region: None,
            tape: None,
            histogram: None,
            header: None,
            retriever: None,
            len: 0,
        }
    }

    /// Current storage mode.
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Whether a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Options the store was created with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Level histogram of the scan; lazy stores have none.
    pub fn histogram(&self) -> Option<&LevelHistogram> {
        self.histogram.as_ref()
    }

    /// Scanned tape; lazy stores have none.
    pub fn tape(&self) -> Option<&Tape> {
        self.tape.as_ref()
    }

    /// Region header, when the region carries one.
    pub fn header(&self) -> Option<&RegionHeader> {
        self.header.as_ref()
    }

    /// Handle to the backing region once loaded.
    pub fn region(&self) -> Option<&RegionHandle> {
        self.region.as_ref()
    }

    /// Installed retriever, if any.
    pub fn retriever(&self) -> Option<&RetrieverRegistry> {
        self.retriever.as_ref()
    }

    /// Copies `bytes` into a store-owned region and scans it.
    pub fn load_owned(&mut self, bytes: Vec<u8>, node_count: usize) -> Result<()> {
        self.ensure_unloaded()?;
        let region = BoundRegion::from_vec(bytes);
        let handle = region.handle();
        self.check_binding(&handle)?;
        let (tape, histogram, header) = self.scan(&handle, node_count)?;
        info!(
            nodes = node_count,
            region_bytes = handle.len(),
            "store.load.owned"
        );
        self.install(StorageMode::Owned, handle, node_count, header);
        self.owned = Some(region);
        self.tape = Some(tape);
        self.histogram = Some(histogram);
        Ok(())
    }

    /// Binds `region` and scans all `node_count` frames immediately.
    pub fn load_eager(&mut self, region: &BoundRegion, node_count: usize) -> Result<()> {
        self.ensure_unloaded()?;
        let handle = region.handle();
        self.check_binding(&handle)?;
        let (tape, histogram, header) = self.scan(&handle, node_count)?;
        info!(
            nodes = node_count,
            region_bytes = handle.len(),
            exact = tape.is_exact(handle.len()),
            retriever = self.active_retriever().is_ok(),
            "store.load.eager"
        );
        self.install(StorageMode::ExternalEager, handle, node_count, header);
        self.tape = Some(tape);
        self.histogram = Some(histogram);
        Ok(())
    }

    /// Binds `region` without scanning it.
    ///
    /// A non-empty retriever bound to the same region must already be
    /// installed; frames are only validated when first accessed.
    pub fn load_lazy(&mut self, region: &BoundRegion, node_count: usize) -> Result<()> {
        self.ensure_unloaded()?;
        if self.active_retriever().is_err() {
            return Err(TapeError::Precondition("retriever required"));
        }
        let handle = region.handle();
        self.check_binding(&handle)?;
        let header = {
            let bytes = handle.read_all()?;
            self.check_header(&bytes, node_count)?
        };
        info!(
            nodes = node_count,
            region_bytes = handle.len(),
            "store.load.lazy"
        );
        self.install(StorageMode::ExternalLazy, handle, node_count, header);
        Ok(())
    }

    /// Installs `registry`. It must resolve into the loaded region, if any.
    ///
    /// An empty registry is accepted except in lazy mode, where it would leave
    /// the store unable to resolve nodes.
    pub fn set_retriever(&mut self, registry: RetrieverRegistry) -> Result<()> {
        if let Some(handle) = &self.region {
            if !registry.region().same_region(handle) {
                return Err(TapeError::Configuration(
                    "retriever bound to a different region",
                ));
            }
        }
        if self.mode == StorageMode::ExternalLazy && registry.is_empty() {
            return Err(TapeError::Precondition("retriever required"));
        }
        debug!(installed = !registry.is_empty(), mode = %self.mode, "store.retriever.set");
        self.retriever = Some(registry);
        Ok(())
    }

    /// Removes the retriever. Refused in lazy mode.
    pub fn clear_retriever(&mut self) -> Result<()> {
        if self.mode == StorageMode::ExternalLazy {
            return Err(TapeError::Precondition("retriever required"));
        }
        self.retriever = None;
        Ok(())
    }

    /// Registry over the current tape, bound to the store's region.
    pub fn tape_retriever(&self) -> Result<RetrieverRegistry> {
        let region = self.live_region()?;
        let tape = self
            .tape
            .as_ref()
            .ok_or(TapeError::Precondition("store has no scanned tape"))?;
        Ok(RetrieverRegistry::from_tape(
            region.clone(),
            Arc::new(tape.clone()),
        ))
    }

    /// Samples a level for a node about to be appended.
    pub fn new_node_level<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.layout.metadata.random_level(rng)
    }

    /// Appends a node after the last frame of the tape.
    ///
    /// Owned regions grow as needed; external regions fail with
    /// [`TapeError::RegionFull`] once the tail is exhausted. An installed
    /// tape snapshot learns the new frame; a caller retriever must be taught
    /// the offset by the caller before the node is read with cross-checking.
    pub fn append_node(&mut self, label: Label, vector: VectorRef<'_>, level: u32) -> Result<NodeId> {
        if !self.loaded {
            return Err(TapeError::Precondition("store not loaded"));
        }
        if self.mode == StorageMode::ExternalLazy {
            return Err(TapeError::Precondition(
                "lazy stores append through append_node_at",
            ));
        }
        frame::check_input(&self.layout, vector, level)?;
        let size = self.layout.frame_size(level);
        let offset = self
            .tape
            .as_ref()
            .map(Tape::end_offset)
            .ok_or(TapeError::Precondition("store has no scanned tape"))?;
        let region_len = self.live_region()?.len();
        let end = offset.checked_add(size).ok_or(TapeError::OutOfBounds {
            offset,
            len: size,
            bound: region_len,
        })?;
        if end > region_len {
            if self.mode == StorageMode::Owned {
                self.grow_owned(end)?;
            } else {
                return Err(TapeError::RegionFull {
                    needed: size,
                    available: region_len.saturating_sub(offset),
                });
            }
        }

        let id = NodeId::from(self.len);
        self.write_frame(id, offset, label, vector, level)?;
        if let Some(tape) = self.tape.as_mut() {
            tape.push_frame(TapeEntry {
                offset,
                frame_size: size,
                level,
            })?;
        }
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.observe(level);
        }
        if let Some(retriever) = self.retriever.as_ref() {
            if !retriever.follow_append(id, offset) {
                debug!(node = id.0, "store.append.retriever_unchanged");
            }
        }
        self.len += 1;
        self.refresh_header(id, level)?;
        debug!(node = id.0, offset, level, "store.append");
        Ok(id)
    }

    /// Writes a node at a caller-chosen offset of a lazy store.
    ///
    /// The retriever must already resolve the next id to `offset` for both
    /// reads and writes; nothing is written otherwise.
    pub fn append_node_at(
        &mut self,
        offset: usize,
        label: Label,
        vector: VectorRef<'_>,
        level: u32,
    ) -> Result<NodeId> {
        if !self.loaded || self.mode != StorageMode::ExternalLazy {
            return Err(TapeError::Precondition(
                "append_node_at requires a lazy store",
            ));
        }
        frame::check_input(&self.layout, vector, level)?;
        let id = NodeId::from(self.len);
        let retriever = self.active_retriever()?;
        let (read, write) = (retriever.read(id)?, retriever.write(id)?);
        if read != offset || write != offset {
            warn!(node = id.0, offset, read, write, "store.append.unresolved");
            return Err(TapeError::Integrity {
                node: id,
                detail: format!(
                    "retriever resolves reads to {read} and writes to {write}, expected {offset}"
                ),
            });
        }
        self.write_frame(id, offset, label, vector, level)?;
        self.len += 1;
        self.refresh_header(id, level)?;
        debug!(node = id.0, offset, level, "store.append");
        Ok(id)
    }

    /// Compares what the retriever resolves for `id` with the scanned tape.
    ///
    /// Passes when no retriever is installed or the store is lazy.
    pub fn cross_check_node(&self, id: NodeId) -> Result<()> {
        let region = self.live_region()?;
        self.check_id(id)?;
        let (Some(tape), Ok(retriever)) = (self.tape.as_ref(), self.active_retriever()) else {
            return Ok(());
        };
        let entry = *tape.entry(id).ok_or(TapeError::NotFound(id))?;
        let bytes = region.read_all()?;
        self.compare(&bytes, id, entry, retriever.read(id)?)?;
        self.compare(&bytes, id, entry, retriever.write(id)?)
    }

    fn ensure_unloaded(&self) -> Result<()> {
        if self.loaded {
            return Err(TapeError::Precondition("storage mode already fixed"));
        }
        Ok(())
    }

    fn check_binding(&self, handle: &RegionHandle) -> Result<()> {
        match &self.retriever {
            Some(registry) if !registry.region().same_region(handle) => Err(
                TapeError::Configuration("retriever bound to a different region"),
            ),
            _ => Ok(()),
        }
    }

    fn install(
        &mut self,
        mode: StorageMode,
        handle: RegionHandle,
        node_count: usize,
        header: Option<RegionHeader>,
    ) {
        self.mode = mode;
        self.region = Some(handle);
        self.len = node_count;
        self.header = header;
        self.loaded = true;
    }

    fn scan(
        &self,
        handle: &RegionHandle,
        node_count: usize,
    ) -> Result<(Tape, LevelHistogram, Option<RegionHeader>)> {
        let bytes = handle.read_all()?;
        let header = self.check_header(&bytes, node_count)?;
        let (tape, histogram) = Tape::build(&bytes, &self.layout, node_count, &self.options)?;
        Ok((tape, histogram, header))
    }

    fn check_header(&self, bytes: &[u8], node_count: usize) -> Result<Option<RegionHeader>> {
        if self.options.header_bytes < REGION_HEADER_BYTES || bytes.len() < REGION_HEADER_BYTES {
            return Ok(None);
        }
        let Some(header) = RegionHeader::read(bytes)? else {
            return Ok(None);
        };
        if header.scalar != self.layout.scalar
            || header.dimensions as usize != self.layout.dimensions
        {
            return Err(TapeError::InvalidArgument(format!(
                "region holds {} x {}, layout expects {} x {}",
                header.dimensions, header.scalar, self.layout.dimensions, self.layout.scalar
            )));
        }
        if header.node_count != node_count as u64 {
            warn!(
                header = header.node_count,
                requested = node_count,
                "store.load.count_mismatch"
            );
        }
        Ok(Some(header))
    }

    fn live_region(&self) -> Result<&RegionHandle> {
        match (&self.region, self.loaded) {
            (Some(region), true) if region.is_live() => Ok(region),
            (Some(_), true) => Err(TapeError::RegionReleased),
            _ => Err(TapeError::Precondition("store not loaded")),
        }
    }

    fn active_retriever(&self) -> Result<&RetrieverRegistry> {
        self.retriever
            .as_ref()
            .filter(|registry| !registry.is_empty())
            .ok_or(TapeError::Precondition("retriever required"))
    }

    fn check_id(&self, id: NodeId) -> Result<()> {
        if id.index() >= self.len {
            return Err(TapeError::NotFound(id));
        }
        Ok(())
    }

    fn tape_entry(&self, id: NodeId) -> Result<TapeEntry> {
        self.tape
            .as_ref()
            .and_then(|tape| tape.entry(id))
            .copied()
            .ok_or(TapeError::NotFound(id))
    }

    fn cross_checking(&self) -> Option<&RetrieverRegistry> {
        if self.options.cross_check {
            self.active_retriever().ok()
        } else {
            None
        }
    }

    fn frame_range(&self, bytes: &[u8], offset: usize) -> Result<Range<usize>> {
        let (_, size) = frame::decode(bytes, offset, &self.layout)?;
        Ok(offset..offset + size)
    }

    /// Resolved offsets may differ from the tape as long as they hold the
    /// same frame bytes.
    fn compare(&self, bytes: &[u8], id: NodeId, entry: TapeEntry, resolved: usize) -> Result<()> {
        if resolved == entry.offset {
            return Ok(());
        }
        let scanned = &bytes[entry.offset..entry.end()];
        let matches = self
            .frame_range(bytes, resolved)
            .map(|range| &bytes[range] == scanned)
            .unwrap_or(false);
        if matches {
            return Ok(());
        }
        warn!(
            node = id.0,
            scanned = entry.offset,
            resolved,
            "store.cross_check.mismatch"
        );
        Err(TapeError::Integrity {
            node: id,
            detail: format!(
                "retriever resolves offset {resolved}, tape holds the node at {}",
                entry.offset
            ),
        })
    }

    fn write_frame(
        &self,
        id: NodeId,
        offset: usize,
        label: Label,
        vector: VectorRef<'_>,
        level: u32,
    ) -> Result<()> {
        let size = self.layout.frame_size(level);
        let mut node = self.live_region()?.write_range(id, offset, size)?;
        frame::encode(&mut node, 0, &self.layout, label, vector, level)?;
        Ok(())
    }

    fn grow_owned(&mut self, needed_end: usize) -> Result<()> {
        let old = self
            .owned
            .as_ref()
            .ok_or(TapeError::Precondition("store does not own its region"))?;
        let new_len = needed_end.max(old.len().saturating_mul(2));
        let mut bytes = old.with_bytes_ref(|bytes| bytes.to_vec())?;
        bytes.resize(new_len, 0);
        let region = BoundRegion::from_vec(bytes);
        info!(from = old.len(), to = new_len, "store.grow");
        if self.retriever.take().is_some() {
            warn!("store.grow.retriever_detached");
        }
        self.region = Some(region.handle());
        self.owned = Some(region);
        Ok(())
    }

    fn refresh_header(&mut self, id: NodeId, level: u32) -> Result<()> {
        let Some(header) = self.header.as_mut() else {
            return Ok(());
        };
        header.node_count = self.len as u64;
        if header.entry.is_none() || level > header.max_level {
            header.entry = Some(id);
            header.max_level = level;
        }
        let header = *header;
        // The header rewrite belongs to the insertion of `id`.
        let mut bytes = self
            .live_region()?
            .write_range(id, 0, REGION_HEADER_BYTES)?;
        header.write(&mut bytes)
    }
}

impl NodeSource for NodeStore {
    fn len(&self) -> usize {
        self.len
    }

    fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    fn node(&self, id: NodeId) -> Result<NodeView<'_>> {
        let region = self.live_region()?;
        self.check_id(id)?;
        let bytes = match self.mode {
            StorageMode::ExternalLazy => {
                let offset = self.active_retriever()?.read(id)?;
                region.read_located(id, |bytes| self.frame_range(bytes, offset))?
            }
            StorageMode::Owned | StorageMode::ExternalEager => {
                let entry = self.tape_entry(id)?;
                let cross = self.cross_checking();
                region.read_located(id, |bytes| {
                    if let Some(retriever) = cross {
                        self.compare(bytes, id, entry, retriever.read(id)?)?;
                    }
                    Ok(entry.offset..entry.end())
                })?
            }
        };
        let (frame, _) = frame::decode_head(&bytes, &self.layout)?;
        Ok(NodeView {
            bytes,
            frame,
            layout: &self.layout,
            id_bytes: self.options.id_bytes,
        })
    }

    fn node_mut(&self, id: NodeId) -> Result<NodeViewMut<'_>> {
        let region = self.live_region()?;
        self.check_id(id)?;
        let bytes = match self.mode {
            StorageMode::ExternalLazy => {
                let offset = self.active_retriever()?.write(id)?;
                region.write_located(id, |bytes| self.frame_range(bytes, offset))?
            }
            StorageMode::Owned | StorageMode::ExternalEager => {
                let entry = self.tape_entry(id)?;
                let cross = self.cross_checking();
                region.write_located(id, |bytes| {
                    if let Some(retriever) = cross {
                        self.compare(bytes, id, entry, retriever.write(id)?)?;
                    }
                    Ok(entry.offset..entry.end())
                })?
            }
        };
        let (frame, _) = frame::decode_head(&bytes, &self.layout)?;
        Ok(NodeViewMut {
            bytes,
            frame,
            layout: &self.layout,
            id_bytes: self.options.id_bytes,
        })
    }
}
