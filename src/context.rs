//! Storage test context.

use std::{
    fmt,
    io::{self, Seek, Write},
};

use crate::{
    buffer::{AlignedBuf, PATTERNS},
    config::{BoundaryPolicy, Config},
    report::Throughput,
    target::Target,
    Error, Result,
};

/// Session state of a test run.
///
/// Owns the target and both transfer buffers. Everything is released on drop,
/// on every exit path.
pub struct Context {
    /// Bytes read back and verified so far.
    pub(crate) transferred: u64,
    /// Addressable bytes of the target.
    pub(crate) partition_size: u64,
    /// Bytes left before the write cursor wraps to the start.
    pub(crate) partition_remaining: u64,
    pub(crate) read_tput: Throughput,
    pub(crate) write_tput: Throughput,
    pub(crate) target: Box<dyn Target>,
    pub(crate) count: u32,
    pub(crate) sector_size: u32,
    pub(crate) pattern: usize,
    pub(crate) size: usize,
    /// Cursor position after the most recent operation.
    pub(crate) offset: u64,
    pub(crate) tx: AlignedBuf,
    pub(crate) rx: AlignedBuf,
    pub(crate) boundary: BoundaryPolicy,
    pub(crate) progress: bool,
    out: Box<dyn Write + Send>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("target", &self.target)
            .field("transferred", &self.transferred)
            .field("partition_size", &self.partition_size)
            .field("partition_remaining", &self.partition_remaining)
            .field("sector_size", &self.sector_size)
            .field("size", &self.size)
            .field("count", &self.count)
            .field("offset", &self.offset)
            .finish()
    }
}

impl Context {
    /// Creates the context for testing `target` as configured.
    ///
    /// Queries the geometry of the target and allocates page-aligned buffers.
    pub fn new(target: impl Target + 'static, config: &Config) -> Result<Self> {
        config.validate()?;
        let mut target: Box<dyn Target> = Box::new(target);

        let capacity = target.capacity().map_err(Error::io("query capacity"))?;
        if capacity == 0 {
            return Err(Error::Geometry("capacity is zero".into()));
        }

        let sector_size = target.block_size().map_err(Error::io("query sector size"))?;
        if sector_size == 0 {
            return Err(Error::Geometry("sector size is zero".into()));
        }

        if config.size as u64 > capacity {
            return Err(Error::InvalidConfig(format!(
                "buffer size {} exceeds target capacity {capacity}",
                config.size
            )));
        }

        let offset = target.stream_position().map_err(|source| Error::Seek { offset: 0, source })?;

        let mut tx = AlignedBuf::page_aligned(config.size)?;
        tx.apply(config.fill);
        let rx = AlignedBuf::page_aligned(config.size)?;

        log::debug!(
            "testing {target:?}: capacity {capacity} bytes, sector size {sector_size}, buffer size {}, {} iterations",
            config.size,
            config.count
        );

        Ok(Self {
            transferred: 0,
            partition_size: capacity,
            partition_remaining: capacity,
            read_tput: Throughput::default(),
            write_tput: Throughput::default(),
            target,
            count: config.count,
            sector_size,
            pattern: config.pattern,
            size: config.size,
            offset,
            tx,
            rx,
            boundary: config.boundary,
            progress: config.progress,
            out: Box::new(io::stdout()),
        })
    }

    /// Directs progress and result lines to `out` instead of standard output.
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    /// Bytes read back and verified so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Addressable bytes of the target.
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// Bytes left before the write cursor wraps to the start.
    pub fn partition_remaining(&self) -> u64 {
        self.partition_remaining
    }

    /// Accumulated read throughput.
    pub fn read_throughput(&self) -> Throughput {
        self.read_tput
    }

    /// Accumulated write throughput.
    pub fn write_throughput(&self) -> Throughput {
        self.write_tput
    }

    /// Iteration count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Logical sector size of the target.
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Size of the transfer buffers.
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Cursor position after the most recent operation.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill byte selected for the pattern test.
    pub fn pattern_byte(&self) -> u8 {
        PATTERNS[self.pattern]
    }

    /// Judgement of partial reads in boundary tests.
    pub fn boundary_policy(&self) -> BoundaryPolicy {
        self.boundary
    }

    /// Transmit buffer.
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    /// Receive buffer.
    pub fn rx(&self) -> &[u8] {
        &self.rx
    }

    /// Flushes written data of the target to the medium.
    pub fn sync(&mut self) -> Result<()> {
        log::debug!("syncing {:?}", self.target);
        self.target.sync().map_err(Error::io("sync"))
    }

    /// Writes `text` to the output, followed by a newline if `newline` is set.
    pub(crate) fn emit(&mut self, text: &str, newline: bool) {
        let res = if newline { writeln!(self.out, "{text}") } else { write!(self.out, "{text}") };
        if let Err(err) = res.and_then(|()| self.out.flush()) {
            log::warn!("cannot write output: {err}");
        }
    }
}
