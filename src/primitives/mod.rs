//! Low-level primitives the tape is built on.

/// Byte-level utilities.
///
/// Bounds-checked little-endian field access and a slice cursor.
pub mod bytes;

/// Caller-owned byte regions.
///
/// Heap or memory-mapped bytes with use-after-release detection and
/// lock-holding node views.
pub mod region;
