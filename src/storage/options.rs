use serde::{Deserialize, Serialize};

use super::header::REGION_HEADER_BYTES;
use super::histogram::DEFAULT_MAX_TRACKED_LEVEL;

/// Configuration supplied when creating a [`super::NodeStore`] or scanning a tape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Bytes reserved ahead of the first frame.
    pub header_bytes: usize,
    /// Levels at or above this are logged and left out of the histogram.
    pub max_tracked_level: usize,
    /// Compare retriever-resolved bytes with the scanned tape on every eager access.
    pub cross_check: bool,
    /// Emit the level histogram once a scan completes.
    pub log_histogram: bool,
    /// Width of a neighbor id inside neighbor blocks.
    pub id_bytes: usize,
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self {
            header_bytes: REGION_HEADER_BYTES,
            max_tracked_level: DEFAULT_MAX_TRACKED_LEVEL,
            cross_check: false,
            log_histogram: true,
            id_bytes: 8,
        }
    }

    /// Sets the reserved header size.
    pub fn header_bytes(mut self, bytes: usize) -> Self {
        self.header_bytes = bytes;
        self
    }

    /// Sets the histogram ceiling.
    pub fn max_tracked_level(mut self, level: usize) -> Self {
        self.max_tracked_level = level;
        self
    }

    /// Enables or disables retriever cross-checking.
    pub fn cross_check(mut self, enabled: bool) -> Self {
        self.cross_check = enabled;
        self
    }

    /// Enables or disables histogram logging.
    pub fn log_histogram(mut self, enabled: bool) -> Self {
        self.log_histogram = enabled;
        self
    }

    /// Sets the neighbor id width.
    pub fn id_bytes(mut self, bytes: usize) -> Self {
        self.id_bytes = bytes;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}
