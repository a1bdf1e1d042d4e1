use serde::Serialize;
use tracing::{info, warn};

/// Levels at or above this are not bucketed by default.
pub const DEFAULT_MAX_TRACKED_LEVEL: usize = 20;

/// Per-level node counts gathered during a tape scan.
///
/// A healthy hierarchy decays roughly geometrically from level 0 upward.
/// The histogram is diagnostic only; nothing gates on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelHistogram {
    buckets: Vec<u64>,
    anomalous: u64,
}

/// Serializable snapshot of a [`LevelHistogram`].
#[derive(Clone, Debug, Serialize)]
pub struct HistogramReport {
    /// Count per level, index = level.
    pub buckets: Vec<u64>,
    /// Nodes whose level was at or above the tracked ceiling.
    pub anomalous: u64,
    /// All observed nodes.
    pub total: u64,
}

impl LevelHistogram {
    /// Creates a histogram that tracks levels below `max_tracked_level`.
    pub fn new(max_tracked_level: usize) -> Self {
        Self {
            buckets: vec![0; max_tracked_level],
            anomalous: 0,
        }
    }

    /// Records one node.
    pub fn observe(&mut self, level: u32) {
        match self.buckets.get_mut(level as usize) {
            Some(bucket) => *bucket += 1,
            None => {
                self.anomalous += 1;
                warn!(
                    level,
                    ceiling = self.buckets.len(),
                    "tape.histogram.large_level"
                );
            }
        }
    }

    /// Count recorded for `level`.
    pub fn count(&self, level: usize) -> u64 {
        self.buckets.get(level).copied().unwrap_or(0)
    }

    /// Nodes excluded from the buckets.
    pub fn anomalous(&self) -> u64 {
        self.anomalous
    }

    /// Sum of all buckets.
    pub fn bucketed(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// The tracked ceiling.
    pub fn max_tracked_level(&self) -> usize {
        self.buckets.len()
    }

    /// Logs one event per level and returns the counts.
    pub fn report(&self) -> HistogramReport {
        for (level, count) in self.buckets.iter().enumerate() {
            info!(level, count, "tape.histogram.level");
        }
        if self.anomalous > 0 {
            info!(anomalous = self.anomalous, "tape.histogram.anomalous");
        }
        self.snapshot()
    }

    /// Returns the counts without logging.
    pub fn snapshot(&self) -> HistogramReport {
        HistogramReport {
            buckets: self.buckets.clone(),
            anomalous: self.anomalous,
            total: self.bucketed() + self.anomalous,
        }
    }
}

impl Default for LevelHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_LEVEL)
    }
}
