#![allow(unsafe_code)]

//! Caller-owned byte regions and the node views handed out over them.
//!
//! A [`BoundRegion`] owns the bytes (heap or memory map) for as long as the
//! caller keeps it. Everything built on top of it holds a [`RegionHandle`],
//! which only weakly references the bytes: once the region is released or
//! dropped, every handle reports [`TapeError::RegionReleased`] instead of
//! touching freed memory.

use std::fmt;
use std::fs::File;
use std::ops::{Deref, DerefMut, Range};
use std::sync::{Arc, Weak};

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};
use tracing::debug;

use crate::primitives::bytes::checked_range;
use crate::types::{NodeId, Result, TapeError};

/// How a file is mapped into a region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapMode {
    /// Shared read-only mapping. Mutable node access fails.
    ReadOnly,
    /// Private writable mapping; writes never reach the file.
    CopyOnWrite,
    /// Shared writable mapping; writes reach the file.
    Shared,
}

enum RegionBytes {
    Heap(Box<[u8]>),
    Mapped(Mmap),
    MappedMut(MmapMut),
}

impl RegionBytes {
    fn as_slice(&self) -> &[u8] {
        match self {
            RegionBytes::Heap(buf) => &buf[..],
            RegionBytes::Mapped(map) => &map[..],
            RegionBytes::MappedMut(map) => &map[..],
        }
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            RegionBytes::Heap(buf) => Some(&mut buf[..]),
            RegionBytes::Mapped(_) => None,
            RegionBytes::MappedMut(map) => Some(&mut map[..]),
        }
    }
}

/// Region contents; `Released` once the owner let go of the bytes.
enum RegionState {
    Live(RegionBytes),
    Released,
}

impl RegionState {
    fn bytes(&self) -> Result<&[u8]> {
        match self {
            RegionState::Live(bytes) => Ok(bytes.as_slice()),
            RegionState::Released => Err(TapeError::RegionReleased),
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match self {
            RegionState::Live(bytes) => bytes.as_mut_slice().ok_or(TapeError::ReadOnly),
            RegionState::Released => Err(TapeError::RegionReleased),
        }
    }
}

type SharedState = RwLock<RegionState>;

/// Owner of a byte region holding a node tape.
///
/// The region is never resized. Dropping it, or calling
/// [`BoundRegion::release`], invalidates all handles.
pub struct BoundRegion {
    state: Arc<SharedState>,
    len: usize,
    writable: bool,
}

impl BoundRegion {
    /// Wraps heap bytes.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self::with_bytes(RegionBytes::Heap(bytes.into_boxed_slice()), len, true)
    }

    /// Maps `file` in its entirety.
    pub fn map_file(file: &File, mode: MapMode) -> Result<Self> {
        // SAFETY: the mapping is owned by this region and only exposed through
        // bounds-checked views; the caller keeps the file unmodified by other
        // processes for the lifetime of the region.
        let region = unsafe {
            match mode {
                MapMode::ReadOnly => {
                    let map = MmapOptions::new().map(file)?;
                    let len = map.len();
                    Self::with_bytes(RegionBytes::Mapped(map), len, false)
                }
                MapMode::CopyOnWrite => {
                    let map = MmapOptions::new().map_copy(file)?;
                    let len = map.len();
                    Self::with_bytes(RegionBytes::MappedMut(map), len, true)
                }
                MapMode::Shared => {
                    let map = MmapOptions::new().map_mut(file)?;
                    let len = map.len();
                    Self::with_bytes(RegionBytes::MappedMut(map), len, true)
                }
            }
        };
        debug!(len = region.len, ?mode, "region.map_file");
        Ok(region)
    }

    fn with_bytes(bytes: RegionBytes, len: usize, writable: bool) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegionState::Live(bytes))),
            len,
            writable,
        }
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether mutable node views may be taken.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns a weak handle for tapes, registries, and stores.
    pub fn handle(&self) -> RegionHandle {
        RegionHandle {
            state: Arc::downgrade(&self.state),
            len: self.len,
            writable: self.writable,
        }
    }

    /// Runs `f` over the whole region.
    pub fn with_bytes_ref<T>(&self, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
        let guard = self.state.read();
        Ok(f(guard.bytes()?))
    }

    /// Runs `f` over the whole region mutably.
    pub fn with_bytes_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> Result<T> {
        let mut guard = self.state.write();
        Ok(f(guard.bytes_mut()?))
    }

    /// Unmaps or frees the bytes. Blocks until outstanding views are dropped.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BoundRegion {
    fn drop(&mut self) {
        let mut guard = self.state.write();
        *guard = RegionState::Released;
        debug!(len = self.len, "region.released");
    }
}

impl fmt::Debug for BoundRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRegion")
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}

/// Weak reference to a [`BoundRegion`].
#[derive(Clone)]
pub struct RegionHandle {
    state: Weak<SharedState>,
    len: usize,
    writable: bool,
}

impl RegionHandle {
    /// Length of the referenced region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the region is still bound.
    pub fn is_live(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => state
                .try_read()
                .map_or(true, |guard| matches!(*guard, RegionState::Live(_))),
            None => false,
        }
    }

    /// Whether `other` refers to the same region.
    pub fn same_region(&self, other: &RegionHandle) -> bool {
        Weak::ptr_eq(&self.state, &other.state)
    }

    /// Whether this handle refers to `region`.
    pub fn refers_to(&self, region: &BoundRegion) -> bool {
        self.state.as_ptr() == Arc::as_ptr(&region.state)
    }

    fn upgrade(&self) -> Result<Arc<SharedState>> {
        self.state.upgrade().ok_or(TapeError::RegionReleased)
    }

    /// Shared view of `offset..offset + len`.
    pub fn read_range(&self, id: NodeId, offset: usize, len: usize) -> Result<NodeRef> {
        let range = checked_range(offset, len, self.len)?;
        let guard = self.upgrade()?.read_arc();
        guard.bytes()?;
        Ok(NodeRef { id, guard, range })
    }

    /// Exclusive view of `offset..offset + len`.
    pub fn write_range(&self, id: NodeId, offset: usize, len: usize) -> Result<NodeMut> {
        if !self.writable {
            return Err(TapeError::ReadOnly);
        }
        let range = checked_range(offset, len, self.len)?;
        let mut guard = self.upgrade()?.write_arc();
        guard.bytes_mut()?;
        Ok(NodeMut { id, guard, range })
    }

    /// Shared view of a range chosen by `locate` while the lock is held.
    ///
    /// `locate` sees the whole region, so the range can be derived from the
    /// bytes themselves without a second lock acquisition.
    pub fn read_located(
        &self,
        id: NodeId,
        locate: impl FnOnce(&[u8]) -> Result<Range<usize>>,
    ) -> Result<NodeRef> {
        let guard = self.upgrade()?.read_arc();
        let range = located(guard.bytes()?, locate)?;
        Ok(NodeRef { id, guard, range })
    }

    /// Exclusive view of a range chosen by `locate` while the lock is held.
    pub fn write_located(
        &self,
        id: NodeId,
        locate: impl FnOnce(&[u8]) -> Result<Range<usize>>,
    ) -> Result<NodeMut> {
        if !self.writable {
            return Err(TapeError::ReadOnly);
        }
        let mut guard = self.upgrade()?.write_arc();
        let range = located(guard.bytes_mut()?, locate)?;
        Ok(NodeMut { id, guard, range })
    }

    /// Shared view of the whole region.
    pub fn read_all(&self) -> Result<RegionRef> {
        let guard = self.upgrade()?.read_arc();
        guard.bytes()?;
        Ok(RegionRef { guard })
    }
}

fn located(
    bytes: &[u8],
    locate: impl FnOnce(&[u8]) -> Result<Range<usize>>,
) -> Result<Range<usize>> {
    let range = locate(bytes)?;
    checked_range(range.start, range.len(), bytes.len())
}

impl fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionHandle")
            .field("len", &self.len)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Shared view of a whole region; holds the region's read lock.
pub struct RegionRef {
    guard: ArcRwLockReadGuard<RawRwLock, RegionState>,
}

impl Deref for RegionRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.bytes().unwrap_or(&[])
    }
}

/// Shared view of one node's bytes.
///
/// Holds the region's read lock: any number of `NodeRef`s may coexist, but
/// a [`NodeMut`] waits until all of them are dropped.
pub struct NodeRef {
    /// Node the bytes belong to.
    pub id: NodeId,
    guard: ArcRwLockReadGuard<RawRwLock, RegionState>,
    range: Range<usize>,
}

impl NodeRef {
    /// Returns the node bytes.
    pub fn data(&self) -> &[u8] {
        // The range was checked against the live region when the guard was taken.
        match self.guard.bytes() {
            Ok(bytes) => &bytes[self.range.clone()],
            Err(_) => &[],
        }
    }

    /// Region offset of the first byte.
    pub fn offset(&self) -> usize {
        self.range.start
    }
}

impl Deref for NodeRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

/// Exclusive view of one node's bytes.
pub struct NodeMut {
    /// Node the bytes belong to.
    pub id: NodeId,
    guard: ArcRwLockWriteGuard<RawRwLock, RegionState>,
    range: Range<usize>,
}

impl NodeMut {
    /// Returns the node bytes.
    pub fn data(&self) -> &[u8] {
        match self.guard.bytes() {
            Ok(bytes) => &bytes[self.range.clone()],
            Err(_) => &[],
        }
    }

    /// Returns the node bytes mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let range = self.range.clone();
        match self.guard.bytes_mut() {
            Ok(bytes) => &mut bytes[range],
            Err(_) => &mut [],
        }
    }

    /// Region offset of the first byte.
    pub fn offset(&self) -> usize {
        self.range.start
    }
}

impl Deref for NodeMut {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl DerefMut for NodeMut {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}
