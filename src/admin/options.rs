use crate::primitives::region::MapMode;
use crate::storage::StoreOptions;
use crate::types::ScalarKind;

/// Options used when opening a region file for administrative commands.
///
/// Layout fields left as `None` are taken from the region header.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Store configuration applied to the opened region.
    pub store: StoreOptions,
    /// How the file is mapped.
    pub map_mode: MapMode,
    /// Vector dimensionality.
    pub dimensions: Option<usize>,
    /// Stored scalar kind.
    pub scalar: Option<ScalarKind>,
    /// Upper-layer connectivity.
    pub connectivity: Option<usize>,
    /// Number of frames to index.
    pub node_count: Option<usize>,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            store: StoreOptions::default(),
            map_mode: MapMode::ReadOnly,
            dimensions: None,
            scalar: None,
            connectivity: None,
            node_count: None,
        }
    }
}
