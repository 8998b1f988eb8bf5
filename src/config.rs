//! Test configuration.

use std::path::PathBuf;

use crate::{buffer::PATTERNS, catalog::TestId, target::OpenFlags, Error, Fill, Result};

/// Buffer size used when none is configured.
pub const DEFAULT_SIZE: usize = 65536;

/// Iteration count used when none is configured.
pub const DEFAULT_COUNT: u32 = 100;

/// How boundary tests judge a read that returns data before hitting the end of the target.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(serde::Deserialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "lowercase"))]
pub enum BoundaryPolicy {
    /// Running into the end of the target counts as rejection,
    /// even if the sectors before it were returned.
    #[default]
    Lenient,
    /// Any returned byte counts as the target accepting the overrun.
    Strict,
}

/// Configuration of a test run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Target to test.
    pub device: PathBuf,
    /// Numeric test identifier.
    pub test: u32,
    /// Size of the transmit and receive buffers in bytes.
    ///
    /// Must be a non-zero multiple of the page size.
    pub size: usize,
    /// Iteration count.
    pub count: u32,
    /// Index into [`PATTERNS`] for the pattern test.
    pub pattern: usize,
    /// Flags for opening the target.
    pub flags: OpenFlags,
    /// Initial transmit buffer content.
    pub fill: Fill,
    /// Judgement of partial reads in boundary tests.
    pub boundary: BoundaryPolicy,
    /// Print a progress line after every iteration.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: PathBuf::new(),
            test: TestId::Simple.number(),
            size: DEFAULT_SIZE,
            count: DEFAULT_COUNT,
            pattern: 0,
            flags: OpenFlags::default(),
            fill: Fill::default(),
            boundary: BoundaryPolicy::default(),
            progress: true,
        }
    }
}

impl Config {
    /// Creates the default configuration for testing `device`.
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self { device: device.into(), ..Default::default() }
    }

    /// Checks values that do not depend on the target.
    pub fn validate(&self) -> Result<()> {
        let page_size = crate::page_size();

        if self.size == 0 {
            return Err(Error::InvalidConfig("buffer size must not be zero".into()));
        }
        if self.size % page_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer size {} is not a multiple of the page size {page_size}",
                self.size
            )));
        }
        if self.count == 0 {
            return Err(Error::InvalidConfig("iteration count must not be zero".into()));
        }
        if self.pattern >= PATTERNS.len() {
            return Err(Error::InvalidConfig(format!(
                "pattern {} out of range, {} patterns available",
                self.pattern,
                PATTERNS.len()
            )));
        }

        Ok(())
    }
}

/// Parses a byte count with an optional `k`, `M` or `G` suffix (binary multiples).
pub fn parse_size(value: &str) -> Result<usize> {
    let value = value.trim();
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    let (number, suffix) = value.split_at(digits);

    let mult: usize = match suffix {
        "" => 1,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        other => return Err(Error::InvalidConfig(format!("unknown size suffix '{other}'"))),
    };

    let number: usize =
        number.parse().map_err(|_| Error::InvalidConfig(format!("invalid size '{value}'")))?;
    if number == 0 {
        return Err(Error::InvalidConfig("size must not be zero".into()));
    }

    number.checked_mul(mult).ok_or_else(|| Error::InvalidConfig(format!("size '{value}' is too large")))
}
