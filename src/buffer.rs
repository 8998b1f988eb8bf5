//! Transfer buffers.

use rand::{rngs::SmallRng, RngCore, SeedableRng};
use std::{
    alloc::{self, Layout},
    fmt,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice,
};

use crate::{Error, Result};

/// Fill byte used for the transmit buffer unless configured otherwise.
pub const DEFAULT_FILL: u8 = 0x55;

/// Fixed palette for pattern tests.
///
/// Taken from the Linux x86 memtest patterns.
pub const PATTERNS: [u8; 16] =
    [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

/// Owned, zero-initialized byte buffer with a fixed alignment.
///
/// Direct I/O requires the memory of a transfer to be aligned to the logical
/// block size of the device, page alignment satisfies every block device.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocates a zeroed buffer of `len` bytes aligned to `align`.
    ///
    /// `align` must be a power of two.
    pub fn new(len: usize, align: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidConfig("buffer size must not be zero".into()));
        }

        let layout = Layout::from_size_align(len, align)
            .map_err(|err| Error::InvalidConfig(format!("invalid buffer layout: {err}")))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else { alloc::handle_alloc_error(layout) };

        Ok(Self { ptr, layout })
    }

    /// Allocates a zeroed buffer of `len` bytes aligned to the system page size.
    pub fn page_aligned(len: usize) -> Result<Self> {
        Self::new(len, crate::page_size())
    }

    /// Alignment of the buffer.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Sets every byte to `value`.
    pub fn fill(&mut self, value: u8) {
        self[..].fill(value);
    }

    /// Sets every byte to zero.
    pub fn clear(&mut self) {
        self.fill(0);
    }

    /// Fills the buffer with a deterministic pseudo-random sequence derived from `seed`.
    pub fn fill_random(&mut self, seed: u64) {
        SmallRng::seed_from_u64(seed).fill_bytes(self);
    }

    /// Initializes the buffer according to `fill`.
    pub fn apply(&mut self, fill: Fill) {
        match fill {
            Fill::Constant(value) => self.fill(value),
            Fill::Random { seed } => self.fill_random(seed),
        }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes and uniquely borrowed.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl AsRef<[u8]> for AlignedBuf {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for AlignedBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AlignedBuf").field("len", &self.len()).field("align", &self.align()).finish()
    }
}

/// Initial content of the transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(serde::Deserialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "kebab-case"))]
pub enum Fill {
    /// Every byte set to the same value.
    Constant(u8),
    /// Seeded pseudo-random sequence.
    Random {
        /// Generator seed.
        seed: u64,
    },
}

impl Default for Fill {
    fn default() -> Self {
        Self::Constant(DEFAULT_FILL)
    }
}
