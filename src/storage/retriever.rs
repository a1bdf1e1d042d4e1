//! Caller-supplied resolution of node ids to frame offsets.
//!
//! A registry pairs an opaque context with a read and a write accessor. The
//! accessors run on every node access in lazy mode, so they must be cheap and
//! free of side effects visible to other readers.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::primitives::region::RegionHandle;
use crate::types::{NodeId, Result, TapeError};

use super::tape::Tape;

/// Accessor signature over a caller context: returns the frame start offset.
pub type Accessor<C> = fn(&C, NodeId) -> Option<usize>;

type Resolver = Arc<dyn Fn(NodeId) -> Option<usize> + Send + Sync>;

#[derive(Clone)]
struct Accessors {
    read: Resolver,
    write: Resolver,
}

/// Read and write accessors bound to one region.
#[derive(Clone)]
pub struct RetrieverRegistry {
    region: RegionHandle,
    accessors: Option<Accessors>,
    tape_table: Option<Arc<RwLock<Vec<usize>>>>,
}

impl RetrieverRegistry {
    /// Installs `read` and `write` over `context`.
    ///
    /// Both accessors or neither: supplying only one is a configuration error
    /// because reads and writes would resolve through different paths.
    /// Supplying neither yields an empty registry.
    pub fn register<C>(
        region: RegionHandle,
        context: Arc<C>,
        read: Option<Accessor<C>>,
        write: Option<Accessor<C>>,
    ) -> Result<Self>
    where
        C: Send + Sync + 'static,
    {
        let accessors = match (read, write) {
            (Some(read), Some(write)) => {
                let read_ctx = Arc::clone(&context);
                let write_ctx = context;
                Some(Accessors {
                    read: Arc::new(move |id| read(&read_ctx, id)),
                    write: Arc::new(move |id| write(&write_ctx, id)),
                })
            }
            (None, None) => None,
            _ => return Err(TapeError::Configuration("asymmetric retriever")),
        };
        debug!(installed = accessors.is_some(), "retriever.register");
        Ok(Self {
            region,
            accessors,
            tape_table: None,
        })
    }

    /// Builds a registry from closures.
    pub fn from_fns<R, W>(region: RegionHandle, read: R, write: W) -> Self
    where
        R: Fn(NodeId) -> Option<usize> + Send + Sync + 'static,
        W: Fn(NodeId) -> Option<usize> + Send + Sync + 'static,
    {
        Self {
            region,
            accessors: Some(Accessors {
                read: Arc::new(read),
                write: Arc::new(write),
            }),
            tape_table: None,
        }
    }

    /// Resolves ids through the location table of a scanned tape.
    ///
    /// The table is copied at construction. Once installed on a store it
    /// follows frames that store appends; other writers are not seen.
    pub fn from_tape(region: RegionHandle, tape: Arc<Tape>) -> Self {
        fn locate(table: &RwLock<Vec<usize>>, id: NodeId) -> Option<usize> {
            table.read().get(id.index()).copied()
        }
        let table = Arc::new(RwLock::new(
            tape.iter().map(|(_, entry)| entry.offset).collect::<Vec<_>>(),
        ));
        let mut registry = Self::from_fns(
            region,
            {
                let table = Arc::clone(&table);
                move |id| locate(&table, id)
            },
            {
                let table = Arc::clone(&table);
                move |id| locate(&table, id)
            },
        );
        registry.tape_table = Some(table);
        registry
    }

    /// Returns `true` for registries built by [`RetrieverRegistry::from_tape`].
    pub fn is_tape_snapshot(&self) -> bool {
        self.tape_table.is_some()
    }

    /// Records the frame of a freshly appended node in a tape snapshot.
    ///
    /// Only the next id is accepted. Returns `false` for caller registries,
    /// which resolve appended nodes on their own.
    pub(crate) fn follow_append(&self, id: NodeId, offset: usize) -> bool {
        let Some(table) = self.tape_table.as_ref() else {
            return false;
        };
        let mut table = table.write();
        if table.len() != id.index() {
            return false;
        }
        table.push(offset);
        true
    }

    /// Registry with no accessors.
    pub fn empty(region: RegionHandle) -> Self {
        Self {
            region,
            accessors: None,
            tape_table: None,
        }
    }

    /// Returns `true` when no accessors are installed.
    pub fn is_empty(&self) -> bool {
        self.accessors.is_none()
    }

    /// Region the accessors resolve into.
    pub fn region(&self) -> &RegionHandle {
        &self.region
    }

    /// Frame offset for reading `id`.
    pub fn read(&self, id: NodeId) -> Result<usize> {
        self.resolve(id, |accessors| &accessors.read)
    }

    /// Frame offset for writing `id`.
    pub fn write(&self, id: NodeId) -> Result<usize> {
        self.resolve(id, |accessors| &accessors.write)
    }

    fn resolve(&self, id: NodeId, pick: impl FnOnce(&Accessors) -> &Resolver) -> Result<usize> {
        let accessors = self
            .accessors
            .as_ref()
            .ok_or(TapeError::Precondition("retriever required"))?;
        if !self.region.is_live() {
            return Err(TapeError::RegionReleased);
        }
        let offset = pick(accessors)(id).ok_or(TapeError::NotFound(id))?;
        if offset >= self.region.len() {
            return Err(TapeError::OutOfBounds {
                offset,
                len: 1,
                bound: self.region.len(),
            });
        }
        Ok(offset)
    }
}

impl fmt::Debug for RetrieverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrieverRegistry")
            .field("region", &self.region)
            .field("installed", &self.accessors.is_some())
            .field("tape_snapshot", &self.is_tape_snapshot())
            .finish()
    }
}
