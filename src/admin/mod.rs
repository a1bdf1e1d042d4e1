#![forbid(unsafe_code)]

//! Region administration utilities.
//!
//! Opens region files for inspection, reports on tape occupancy and level
//! distribution, and verifies frames and retriever resolutions.

mod error;
mod options;
mod stats;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Configuration options for opening a region in admin mode.
pub use options::AdminOpenOptions;

/// Statistics collection and reporting.
///
/// Summarizes layout, tape occupancy, header contents, and the level
/// histogram of a store.
pub use stats::{
    stats, store_stats, FilesystemStats, HeaderStatsSection, LayoutStatsSection, StatsReport,
    TapeStatsSection,
};

/// Tape and retriever verification.
///
/// Reports frames that fail to decode, dangling neighbor ids, overlapping
/// frames, and retriever resolutions that disagree with the tape.
pub use verify::{
    verify, verify_store, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity,
};

/// Utility functions for opening region files.
pub use util::{open_region, open_store, StoreHandle};
