//! Targets under test.
//!
//! A target is a seekable byte range of known capacity and logical sector size,
//! usually the block device node of a USB mass storage device.

use std::{
    fmt,
    io::{Read, Result, Seek, Write},
};

pub mod block;
pub use block::{ensure_unmounted, mount_point, BlockDevice, OpenFlags};

pub mod mem;
pub use mem::MemTarget;

/// Sector size assumed for targets that do not report one.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Block-like resource under test.
///
/// Vectored transfers go through [`Read::read_vectored`] and
/// [`Write::write_vectored`] and must be issued as a single operation.
/// Closing happens on drop.
pub trait Target: Read + Write + Seek + fmt::Debug + Send {
    /// Total addressable bytes.
    fn capacity(&self) -> Result<u64>;

    /// Logical sector size in bytes.
    fn block_size(&self) -> Result<u32>;

    /// Flush all written data to the medium.
    fn sync(&mut self) -> Result<()>;
}
