#![forbid(unsafe_code)]

//! Identifiers, scalar kinds, and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sequential 0-based node id, assigned in tape order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct NodeId(pub u64);

/// External label stored in the first eight bytes of every frame.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct Label(pub u64);

impl NodeId {
    /// Returns the id as a table index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        NodeId(value as u64)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Element type of the vectors stored on a tape.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// IEEE double precision.
    F64,
    /// IEEE single precision.
    F32,
    /// IEEE half precision, carried as raw bits.
    F16,
    /// Signed 8-bit fixed point.
    F8,
    /// Bit vectors packed eight dimensions per byte.
    B1x8,
}

impl ScalarKind {
    /// Bytes occupied by one stored scalar.
    pub const fn bytes_per_scalar(self) -> usize {
        match self {
            ScalarKind::F64 => 8,
            ScalarKind::F32 => 4,
            ScalarKind::F16 => 2,
            ScalarKind::F8 => 1,
            ScalarKind::B1x8 => 1,
        }
    }

    /// Payload width in bytes of a vector with `dimensions` components.
    pub const fn vector_bytes(self, dimensions: usize) -> usize {
        match self {
            ScalarKind::B1x8 => dimensions.div_ceil(8),
            ScalarKind::F64 | ScalarKind::F32 | ScalarKind::F16 | ScalarKind::F8 => {
                dimensions * self.bytes_per_scalar()
            }
        }
    }

    /// On-disk tag used by the region header.
    pub const fn to_byte(self) -> u8 {
        match self {
            ScalarKind::F64 => 1,
            ScalarKind::F32 => 2,
            ScalarKind::F16 => 3,
            ScalarKind::F8 => 4,
            ScalarKind::B1x8 => 5,
        }
    }

    /// Parses a header tag.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(ScalarKind::F64),
            2 => Ok(ScalarKind::F32),
            3 => Ok(ScalarKind::F16),
            4 => Ok(ScalarKind::F8),
            5 => Ok(ScalarKind::B1x8),
            other => Err(TapeError::InvalidArgument(format!(
                "unknown scalar kind tag 0x{other:02X}"
            ))),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::F64 => "f64",
            ScalarKind::F32 => "f32",
            ScalarKind::F16 => "f16",
            ScalarKind::F8 => "f8",
            ScalarKind::B1x8 => "b1x8",
        };
        f.write_str(name)
    }
}

/// A borrowed vector tagged with its scalar kind.
#[derive(Copy, Clone, Debug)]
pub enum VectorRef<'a> {
    /// Double precision components.
    F64(&'a [f64]),
    /// Single precision components.
    F32(&'a [f32]),
    /// Half precision components as raw bits.
    F16(&'a [u16]),
    /// 8-bit components.
    F8(&'a [i8]),
    /// Packed bits, eight dimensions per byte.
    B1x8(&'a [u8]),
}

impl VectorRef<'_> {
    /// Scalar kind of the components.
    pub fn kind(&self) -> ScalarKind {
        match self {
            VectorRef::F64(_) => ScalarKind::F64,
            VectorRef::F32(_) => ScalarKind::F32,
            VectorRef::F16(_) => ScalarKind::F16,
            VectorRef::F8(_) => ScalarKind::F8,
            VectorRef::B1x8(_) => ScalarKind::B1x8,
        }
    }

    /// Encoded width in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            VectorRef::F64(v) => v.len() * 8,
            VectorRef::F32(v) => v.len() * 4,
            VectorRef::F16(v) => v.len() * 2,
            VectorRef::F8(v) => v.len(),
            VectorRef::B1x8(v) => v.len(),
        }
    }

    /// Writes the little-endian encoding into `dst`, which must be exactly
    /// [`VectorRef::byte_len`] bytes.
    pub fn write_le(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.byte_len());
        match self {
            VectorRef::F64(v) => {
                for (chunk, x) in dst.chunks_exact_mut(8).zip(v.iter()) {
                    chunk.copy_from_slice(&x.to_le_bytes());
                }
            }
            VectorRef::F32(v) => {
                for (chunk, x) in dst.chunks_exact_mut(4).zip(v.iter()) {
                    chunk.copy_from_slice(&x.to_le_bytes());
                }
            }
            VectorRef::F16(v) => {
                for (chunk, x) in dst.chunks_exact_mut(2).zip(v.iter()) {
                    chunk.copy_from_slice(&x.to_le_bytes());
                }
            }
            VectorRef::F8(v) => {
                for (slot, x) in dst.iter_mut().zip(v.iter()) {
                    *slot = x.to_le_bytes()[0];
                }
            }
            VectorRef::B1x8(v) => dst.copy_from_slice(v),
        }
    }
}

/// Errors raised while indexing, resolving, or mutating node frames.
#[derive(thiserror::Error, Debug)]
pub enum TapeError {
    /// I/O failure while opening or mapping a region.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The dimension field of a frame disagrees with the configured layout.
    #[error("format mismatch at offset {offset}: expected {expected} vector bytes, found {found}")]
    FormatMismatch {
        /// Frame start offset.
        offset: usize,
        /// Vector bytes implied by the layout.
        expected: usize,
        /// Vector bytes recorded on the frame.
        found: usize,
    },
    /// A frame or field extends past the end of its region.
    #[error("range {offset}+{len} exceeds region of {bound} bytes")]
    OutOfBounds {
        /// Start of the requested range.
        offset: usize,
        /// Length of the requested range.
        len: usize,
        /// Length of the region.
        bound: usize,
    },
    /// A frame carries a negative level.
    #[error("invalid level {level} at offset {offset}")]
    InvalidLevel {
        /// Frame start offset.
        offset: usize,
        /// Raw level field.
        level: i32,
    },
    /// Retriever or store wiring is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(&'static str),
    /// Operation called out of order.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    /// Retriever-resolved bytes disagree with the scanned tape.
    #[error("integrity error on node {node}: {detail}")]
    Integrity {
        /// Node being checked.
        node: NodeId,
        /// What differed.
        detail: String,
    },
    /// The bound region was released while still referenced.
    #[error("bound region has been released")]
    RegionReleased,
    /// No room left in the region for an appended frame.
    #[error("region full: need {needed} bytes, {available} available")]
    RegionFull {
        /// Bytes required by the frame.
        needed: usize,
        /// Bytes left after the tape.
        available: usize,
    },
    /// A region mapped read-only was asked for mutable access.
    #[error("region is read-only")]
    ReadOnly,
    /// Node id is unknown to the store or its retriever.
    #[error("node {0} not found")]
    NotFound(NodeId),
    /// Vector scalar kind differs from the layout.
    #[error("scalar mismatch: layout stores {expected}, vector is {found}")]
    ScalarMismatch {
        /// Scalar kind of the layout.
        expected: ScalarKind,
        /// Scalar kind of the supplied vector.
        found: ScalarKind,
    },
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TapeError>;
