use std::path::Path;

use serde::Serialize;

use crate::storage::{NodeSource, NodeStore, StorageMode};
use crate::types::NodeId;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_store;
use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Header and tape bookkeeping only.
    Fast,
    /// Every frame, neighbor list, and retriever resolution.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating corruption or a misconfigured retriever.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Counters collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Frames successfully decoded.
    pub nodes_checked: u64,
    /// Neighbor ids examined across all layers.
    pub neighbor_links: u64,
    /// Highest level seen.
    pub max_level: u32,
    /// Bytes covered by the checked frames.
    pub frame_bytes: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Storage mode of the verified store.
    pub mode: StorageMode,
    /// Whether verification passed without errors.
    pub success: bool,
    /// Issues discovered during verification, capped at 32.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the frames examined.
    pub counts: VerifyCounts,
}

/// Maps the region at `path`, indexes it, and verifies it.
///
/// # Errors
///
/// Returns an error if the region cannot be opened or scanned. Problems found
/// after a successful scan are reported as findings instead.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let handle = open_store(path.as_ref(), opts)?;
    Ok(verify_store(&handle.store, level))
}

/// Verifies a loaded store.
///
/// Eager and owned stores are checked against their scanned tape, including
/// every retriever resolution when a retriever is installed. Lazy stores
/// resolve every node through the retriever and must yield frames that
/// neither fail to decode nor overlap.
pub fn verify_store(store: &NodeStore, level: VerifyLevel) -> VerifyReport {
    let mut findings = Findings::default();
    let mut counts = VerifyCounts::default();

    let Some(region) = store.region().filter(|_| store.is_loaded()) else {
        findings.error("store is not loaded");
        return findings.into_report(level, store.mode(), counts);
    };
    if !region.is_live() {
        findings.error("bound region has been released");
        return findings.into_report(level, store.mode(), counts);
    }

    if let Some(header) = store.header() {
        if header.node_count != store.len() as u64 {
            findings.warning(format!(
                "header records {} nodes, store indexes {}",
                header.node_count,
                store.len()
            ));
        }
    }
    if let Some(tape) = store.tape() {
        if !tape.is_exact(region.len()) {
            findings.info(format!(
                "{} unused bytes after the last frame",
                region.len() - tape.end_offset()
            ));
        }
    }
    if let Some(histogram) = store.histogram() {
        if histogram.anomalous() > 0 {
            findings.warning(format!(
                "{} nodes at or above level {}",
                histogram.anomalous(),
                histogram.max_tracked_level()
            ));
        }
    }

    if matches!(level, VerifyLevel::Full) {
        check_frames(store, &mut findings, &mut counts);
        if let (Some(header), true) = (store.header(), counts.nodes_checked > 0) {
            if header.max_level != counts.max_level {
                findings.warning(format!(
                    "header records max level {}, frames reach {}",
                    header.max_level, counts.max_level
                ));
            }
        }
    }

    findings.into_report(level, store.mode(), counts)
}

fn check_frames(store: &NodeStore, findings: &mut Findings, counts: &mut VerifyCounts) {
    let mut spans = Vec::with_capacity(store.len());
    for idx in 0..store.len() {
        let id = NodeId::from(idx);
        let node = match store.node(id) {
            Ok(node) => node,
            Err(err) => {
                findings.error(format!("node {id}: {err}"));
                continue;
            }
        };
        counts.nodes_checked += 1;
        counts.frame_bytes += node.bytes().len() as u64;
        counts.max_level = counts.max_level.max(node.level());
        spans.push((node.offset(), node.offset() + node.bytes().len(), id));

        for layer in 0..=node.level() {
            match node.neighbors(layer) {
                Ok(Some(neighbors)) => {
                    counts.neighbor_links += neighbors.len() as u64;
                    for neighbor in neighbors {
                        if neighbor.index() >= store.len() {
                            findings.error(format!(
                                "node {id} layer {layer} references missing node {neighbor}"
                            ));
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => findings.error(format!("node {id} layer {layer}: {err}")),
            }
        }
        drop(node);

        if store.mode() != StorageMode::ExternalLazy {
            if let Err(err) = store.cross_check_node(id) {
                findings.error(format!("node {id}: {err}"));
            }
        }
    }

    spans.sort_unstable();
    for pair in spans.windows(2) {
        let ((_, end, left), (start, _, right)) = (pair[0], pair[1]);
        if start < end {
            findings.error(format!("frames of nodes {left} and {right} overlap"));
        }
    }
}

#[derive(Default)]
struct Findings {
    entries: Vec<VerifyFinding>,
    errors: usize,
}

impl Findings {
    fn push(&mut self, severity: VerifySeverity, message: String) {
        if severity == VerifySeverity::Error {
            self.errors += 1;
        }
        if self.entries.len() < MAX_FINDINGS {
            self.entries.push(VerifyFinding { severity, message });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Error, message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Warning, message.into());
    }

    fn info(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Info, message.into());
    }

    fn into_report(self, level: VerifyLevel, mode: StorageMode, counts: VerifyCounts) -> VerifyReport {
        VerifyReport {
            level,
            mode,
            success: self.errors == 0,
            findings: self.entries,
            counts,
        }
    }
}
