#![forbid(unsafe_code)]
//! Bounds-checked little-endian field access over region bytes.

use core::ops::Range;

use crate::types::{Result, TapeError};

/// Validates that `offset..offset + len` lies inside a region of `bound` bytes.
pub fn checked_range(offset: usize, len: usize, bound: usize) -> Result<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= bound => Ok(offset..end),
        _ => Err(TapeError::OutOfBounds { offset, len, bound }),
    }
}

pub mod le {
    //! Fixed-width little-endian readers and writers.

    use core::convert::TryInto;

    use super::checked_range;
    use crate::types::Result;

    /// Reads a u32 at `at`.
    pub fn get_u32(src: &[u8], at: usize) -> Result<u32> {
        let range = checked_range(at, 4, src.len())?;
        let bytes: [u8; 4] = src[range].as_ref().try_into().unwrap_or([0; 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads an i32 at `at`.
    pub fn get_i32(src: &[u8], at: usize) -> Result<i32> {
        get_u32(src, at).map(|v| v as i32)
    }

    /// Reads a u64 at `at`.
    pub fn get_u64(src: &[u8], at: usize) -> Result<u64> {
        let range = checked_range(at, 8, src.len())?;
        let bytes: [u8; 8] = src[range].as_ref().try_into().unwrap_or([0; 8]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads a u16 at `at`.
    pub fn get_u16(src: &[u8], at: usize) -> Result<u16> {
        let range = checked_range(at, 2, src.len())?;
        Ok(u16::from_le_bytes([src[range.start], src[range.start + 1]]))
    }

    /// Writes a u32 at `at`.
    pub fn put_u32(dst: &mut [u8], at: usize, v: u32) -> Result<()> {
        let range = checked_range(at, 4, dst.len())?;
        dst[range].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes an i32 at `at`.
    pub fn put_i32(dst: &mut [u8], at: usize, v: i32) -> Result<()> {
        put_u32(dst, at, v as u32)
    }

    /// Writes a u64 at `at`.
    pub fn put_u64(dst: &mut [u8], at: usize, v: u64) -> Result<()> {
        let range = checked_range(at, 8, dst.len())?;
        dst[range].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Writes a u16 at `at`.
    pub fn put_u16(dst: &mut [u8], at: usize, v: u16) -> Result<()> {
        let range = checked_range(at, 2, dst.len())?;
        dst[range].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads an unsigned integer of `width` bytes (at most 8).
    pub fn get_uint(src: &[u8], at: usize, width: usize) -> Result<u64> {
        let range = checked_range(at, width.min(8), src.len())?;
        let mut bytes = [0u8; 8];
        bytes[..range.len()].copy_from_slice(&src[range]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes the low `width` bytes of `v` (at most 8).
    pub fn put_uint(dst: &mut [u8], at: usize, width: usize, v: u64) -> Result<()> {
        let range = checked_range(at, width.min(8), dst.len())?;
        let len = range.len();
        dst[range].copy_from_slice(&v.to_le_bytes()[..len]);
        Ok(())
    }
}

pub mod buf {
    //! A slice-backed cursor that advances through a tape.

    use core::fmt;

    use super::checked_range;
    use crate::types::Result;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a cursor positioned at `off`.
        pub fn at(buf: &'a [u8], off: usize) -> Self {
            Self { buf, off }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let range = checked_range(self.off, n, self.buf.len())?;
            self.off = range.end;
            Ok(&self.buf[range])
        }

        /// Moves the cursor forward without reading.
        pub fn skip(&mut self, n: usize) -> Result<()> {
            self.take(n).map(|_| ())
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl fmt::Debug for Cursor<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
