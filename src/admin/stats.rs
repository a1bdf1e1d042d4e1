use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::storage::{HistogramReport, NodeSource, NodeStore, StorageMode};
use crate::types::ScalarKind;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;

/// Summary of a store and the file behind it.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Frame layout.
    pub layout: LayoutStatsSection,
    /// Tape occupancy.
    pub tape: TapeStatsSection,
    /// Region header, when present.
    pub header: Option<HeaderStatsSection>,
    /// Level distribution; absent for lazy stores.
    pub histogram: Option<HistogramReport>,
    /// Backing file; absent for stores opened in memory.
    pub filesystem: Option<FilesystemStats>,
}

/// Layout constants the frames were sized with.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutStatsSection {
    pub dimensions: usize,
    pub scalar: ScalarKind,
    pub vector_bytes: usize,
    pub connectivity_max_base: usize,
    pub neighbors_bytes: usize,
    pub neighbors_base_bytes: usize,
    pub base_frame_bytes: usize,
}

/// How much of the region the tape covers.
#[derive(Debug, Clone, Serialize)]
pub struct TapeStatsSection {
    pub mode: StorageMode,
    pub nodes: usize,
    pub region_bytes: usize,
    pub header_bytes: usize,
    /// `None` when no tape was scanned.
    pub frame_bytes: Option<usize>,
    pub tail_bytes: Option<usize>,
    pub average_frame_bytes: Option<f64>,
    pub exact: Option<bool>,
}

/// Contents of the region header.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderStatsSection {
    pub node_count: u64,
    pub connectivity: u32,
    pub entry: Option<u64>,
    pub max_level: u32,
}

/// File metadata.
#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub path: String,
    pub size_bytes: u64,
}

/// Maps the region at `path` and reports on it.
pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let path = path.as_ref();
    let handle = open_store(path, opts)?;
    let file_meta = fs::metadata(path)?;
    let mut report = store_stats(&handle.store);
    report.filesystem = Some(FilesystemStats {
        path: handle.path.display().to_string(),
        size_bytes: file_meta.len(),
    });
    Ok(report)
}

/// Reports on a loaded or unloaded store.
pub fn store_stats(store: &NodeStore) -> StatsReport {
    let layout = store.layout();
    let region_bytes = store.region().map(|r| r.len()).unwrap_or(0);
    let tape = store.tape();
    let frame_bytes = tape.map(|t| t.frame_bytes());

    let layout_section = LayoutStatsSection {
        dimensions: layout.dimensions,
        scalar: layout.scalar,
        vector_bytes: layout.vector_bytes(),
        connectivity_max_base: layout.metadata.connectivity_max_base,
        neighbors_bytes: layout.metadata.neighbors_bytes,
        neighbors_base_bytes: layout.metadata.neighbors_base_bytes,
        base_frame_bytes: layout.frame_size(0),
    };

    let tape_section = TapeStatsSection {
        mode: store.mode(),
        nodes: store.len(),
        region_bytes,
        header_bytes: store.options().header_bytes,
        frame_bytes,
        tail_bytes: tape.map(|t| region_bytes.saturating_sub(t.end_offset())),
        average_frame_bytes: frame_bytes
            .filter(|_| store.len() > 0)
            .map(|bytes| bytes as f64 / store.len() as f64),
        exact: tape.map(|t| t.is_exact(region_bytes)),
    };

    let header_section = store.header().map(|h| HeaderStatsSection {
        node_count: h.node_count,
        connectivity: h.connectivity,
        entry: h.entry.map(|id| id.0),
        max_level: h.max_level,
    });

    StatsReport {
        layout: layout_section,
        tape: tape_section,
        header: header_section,
        histogram: store.histogram().map(|h| h.snapshot()),
        filesystem: None,
    }
}
