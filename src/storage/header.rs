use tracing::debug;

use crate::primitives::bytes::le;
use crate::types::{NodeId, Result, ScalarKind, TapeError};

/// Bytes reserved ahead of the first frame.
pub const REGION_HEADER_BYTES: usize = 64;

const MAGIC: &[u8; 8] = b"NODETAPE";
const VERSION_MAJOR: u16 = 1;
const VERSION_MINOR: u16 = 0;

/// File-level metadata kept in the reserved region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    /// Scalar kind of every stored vector.
    pub scalar: ScalarKind,
    /// Vector dimensionality.
    pub dimensions: u32,
    /// Upper-layer connectivity the tape was built with.
    pub connectivity: u32,
    /// Number of frames on the tape.
    pub node_count: u64,
    /// Graph entry point, if any node exists.
    pub entry: Option<NodeId>,
    /// Highest level of any node.
    pub max_level: u32,
}

impl RegionHeader {
    /// Reads the header.
    ///
    /// An all-zero header means none was written. A header carrying another
    /// magic belongs to the engine that owns the file and also reads as
    /// absent; only headers stamped by [`RegionHeader::write`] are validated.
    pub fn read(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < REGION_HEADER_BYTES {
            return Err(TapeError::OutOfBounds {
                offset: 0,
                len: REGION_HEADER_BYTES,
                bound: data.len(),
            });
        }
        if data[..MAGIC.len()].iter().all(|&b| b == 0) {
            return Ok(None);
        }
        if &data[..MAGIC.len()] != MAGIC {
            debug!(
                magic = %String::from_utf8_lossy(&data[..MAGIC.len()]),
                "region.header.foreign"
            );
            return Ok(None);
        }
        let major = le::get_u16(data, 8)?;
        let minor = le::get_u16(data, 10)?;
        if major != VERSION_MAJOR || minor != VERSION_MINOR {
            return Err(TapeError::InvalidArgument(format!(
                "unsupported region header version {major}.{minor}"
            )));
        }
        let scalar = ScalarKind::from_byte(data[12])?;
        let dimensions = le::get_u32(data, 16)?;
        let connectivity = le::get_u32(data, 20)?;
        let node_count = le::get_u64(data, 24)?;
        let entry = le::get_u64(data, 32)?;
        let max_level = le::get_u32(data, 40)?;
        Ok(Some(Self {
            scalar,
            dimensions,
            connectivity,
            node_count,
            entry: if node_count == 0 {
                None
            } else {
                Some(NodeId(entry))
            },
            max_level,
        }))
    }

    /// Writes the header into the first [`REGION_HEADER_BYTES`] of `data`.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < REGION_HEADER_BYTES {
            return Err(TapeError::OutOfBounds {
                offset: 0,
                len: REGION_HEADER_BYTES,
                bound: data.len(),
            });
        }
        let header = &mut data[..REGION_HEADER_BYTES];
        header.fill(0);
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        le::put_u16(header, 8, VERSION_MAJOR)?;
        le::put_u16(header, 10, VERSION_MINOR)?;
        header[12] = self.scalar.to_byte();
        le::put_u32(header, 16, self.dimensions)?;
        le::put_u32(header, 20, self.connectivity)?;
        le::put_u64(header, 24, self.node_count)?;
        le::put_u64(header, 32, self.entry.map(|id| id.0).unwrap_or(0))?;
        le::put_u32(header, 40, self.max_level)?;
        Ok(())
    }
}
