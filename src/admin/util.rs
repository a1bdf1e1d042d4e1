use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::primitives::region::{BoundRegion, MapMode};
use crate::storage::{FrameLayout, IndexMetadata, NodeStore, RegionHeader, REGION_HEADER_BYTES};

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// A mapped region together with an eager store over it.
///
/// Field order matters: the store drops before the region it borrows.
pub struct StoreHandle {
    /// Eagerly indexed store.
    pub store: NodeStore,
    /// Backing file mapping.
    pub region: BoundRegion,
    /// Header found in the region, if any.
    pub header: Option<RegionHeader>,
    /// Path of the mapped file.
    pub path: PathBuf,
}

/// Maps the file at `path` according to `opts.map_mode`.
///
/// # Errors
///
/// Returns an error if the file does not exist or cannot be mapped.
pub fn open_region(path: &Path, opts: &AdminOpenOptions) -> Result<BoundRegion> {
    if !path.exists() {
        return Err(AdminError::missing_region(path));
    }
    let file = OpenOptions::new()
        .read(true)
        .write(opts.map_mode == MapMode::Shared)
        .open(path)?;
    let region = BoundRegion::map_file(&file, opts.map_mode)?;
    debug!(path = %path.display(), len = region.len(), "admin.open_region");
    Ok(region)
}

/// Maps the file at `path` and indexes it eagerly.
///
/// The layout comes from the region header, with any field set in `opts`
/// taking precedence.
///
/// # Errors
///
/// Returns an error if the layout cannot be determined or the scan fails.
pub fn open_store(path: &Path, opts: &AdminOpenOptions) -> Result<StoreHandle> {
    let region = open_region(path, opts)?;
    let header = if region.len() >= REGION_HEADER_BYTES {
        region.with_bytes_ref(RegionHeader::read)??
    } else {
        None
    };

    let dimensions = opts
        .dimensions
        .or(header.map(|h| h.dimensions as usize))
        .ok_or_else(|| AdminError::unresolved("dimensions"))?;
    let scalar = opts
        .scalar
        .or(header.map(|h| h.scalar))
        .ok_or_else(|| AdminError::unresolved("scalar"))?;
    let connectivity = opts
        .connectivity
        .or(header.map(|h| h.connectivity as usize))
        .ok_or_else(|| AdminError::unresolved("connectivity"))?;
    let node_count = opts
        .node_count
        .or(header.map(|h| h.node_count as usize))
        .ok_or_else(|| AdminError::unresolved("node count"))?;

    let metadata = IndexMetadata::derive(connectivity, opts.store.id_bytes)?;
    let layout = FrameLayout::new(dimensions, scalar, metadata)?;
    let mut store = NodeStore::new(layout, opts.store.clone());
    store
        .load_eager(&region, node_count)
        .map_err(|err| AdminError::index(path, err))?;
    Ok(StoreHandle {
        store,
        region,
        header,
        path: path.to_path_buf(),
    })
}
