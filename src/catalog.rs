//! Test catalog and dispatcher.
//!
//! Every iteration of a round-trip test positions the cursor, writes, moves
//! back to where the write started, reads, verifies and reports. The first
//! failure aborts the loop and fails the test.

use std::{fmt, str::FromStr};
use strum::IntoEnumIterator;

use crate::{
    config::BoundaryPolicy,
    transfer::{layout, sector_segments, Segment},
    Context, Error, Result,
};

/// Test identifier.
///
/// Numbers match the test numbers of the command line tool.
#[derive(Debug, strum::Display, strum::EnumString, strum::EnumIter, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum TestId {
    /// Whole buffer at a time.
    #[strum(serialize = "simple")]
    Simple = 0,
    /// 1 sector at a time.
    #[strum(serialize = "1sect")]
    Sectors1 = 1,
    /// 8 sectors at a time.
    #[strum(serialize = "8sect")]
    Sectors8 = 2,
    /// 32 sectors at a time.
    #[strum(serialize = "32sect")]
    Sectors32 = 3,
    /// 64 sectors at a time.
    #[strum(serialize = "64sect")]
    Sectors64 = 4,
    /// Scatter-gather 2 sectors at a time.
    #[strum(serialize = "sg-2sect")]
    Sg2 = 5,
    /// Scatter-gather 8 sectors at a time.
    #[strum(serialize = "sg-8sect")]
    Sg8 = 6,
    /// Scatter-gather 32 sectors at a time.
    #[strum(serialize = "sg-32sect")]
    Sg32 = 7,
    /// Scatter-gather 64 sectors at a time.
    #[strum(serialize = "sg-64sect")]
    Sg64 = 8,
    /// Scatter-gather 128 sectors at a time.
    #[strum(serialize = "sg-128sect")]
    Sg128 = 9,
    /// Read extending over the last sector.
    #[strum(serialize = "read-past-last")]
    ReadPastLast = 10,
    /// Seek beyond the end of the device.
    #[strum(serialize = "lseek-past-last")]
    LseekPastLast = 11,
    /// Write extending over the last sector.
    #[strum(serialize = "write-past-last")]
    WritePastLast = 12,
    /// Contiguous write, scatter-gather read of uneven segments.
    #[strum(serialize = "sg-random-read")]
    SgRandomRead = 13,
    /// Scatter-gather write of uneven segments, contiguous read.
    #[strum(serialize = "sg-random-write")]
    SgRandomWrite = 14,
    /// Scatter-gather write and read of uneven segments.
    #[strum(serialize = "sg-random-both")]
    SgRandomBoth = 15,
    /// Known byte patterns.
    #[strum(serialize = "patterns")]
    Patterns = 18,
}

impl TestId {
    /// Test number.
    pub fn number(self) -> u32 {
        self as u32
    }

    /// Looks up a test by number.
    pub fn from_number(number: u32) -> Option<Self> {
        Self::iter().find(|id| id.number() == number)
    }

    /// One line description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Simple => "write, read and verify the whole buffer",
            Self::Sectors1 => "write, read and verify 1 sector at a time",
            Self::Sectors8 => "write, read and verify 8 sectors at a time",
            Self::Sectors32 => "write, read and verify 32 sectors at a time",
            Self::Sectors64 => "write, read and verify 64 sectors at a time",
            Self::Sg2 => "scatter-gather write, read and verify 2 sectors",
            Self::Sg8 => "scatter-gather write, read and verify 8 sectors",
            Self::Sg32 => "scatter-gather write, read and verify 32 sectors",
            Self::Sg64 => "scatter-gather write, read and verify 64 sectors",
            Self::Sg128 => "scatter-gather write, read and verify 128 sectors",
            Self::ReadPastLast => "read over the last sector must fail",
            Self::LseekPastLast => "seek beyond the last sector must fail",
            Self::WritePastLast => "write over the last sector must fail",
            Self::SgRandomRead => "contiguous write, read in uneven segments",
            Self::SgRandomWrite => "write in uneven segments, contiguous read",
            Self::SgRandomBoth => "write and read in uneven segments",
            Self::Patterns => "write, read and verify a known pattern",
        }
    }
}

/// Parses a test given by number or name into its number.
///
/// Unknown numbers are passed through, so that the dispatcher can report them.
pub fn parse_test(value: &str) -> Result<u32> {
    let value = value.trim();
    if let Ok(number) = value.parse() {
        return Ok(number);
    }
    TestId::from_str(value)
        .map(TestId::number)
        .map_err(|_| Error::InvalidConfig(format!("unknown test '{value}'")))
}

/// Test case implementation.
pub trait TestCase: fmt::Debug + Send + Sync {
    /// Runs the configured number of iterations, reporting progress as `id`.
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()>;
}

/// Length of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// The whole buffer.
    Buffer,
    /// Number of sectors.
    Sectors(u32),
}

impl Length {
    fn bytes(self, ctx: &Context) -> usize {
        match self {
            Self::Buffer => ctx.size,
            Self::Sectors(n) => n as usize * ctx.sector_size as usize,
        }
    }
}

/// Shape of one side of a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Sequential transfer of one region.
    Contiguous,
    /// Single vectored transfer of consecutive segments, given in sectors.
    Vectored(&'static [u32]),
}

impl Shape {
    fn segments(self, ctx: &Context, len: usize) -> Result<Option<Vec<Segment>>> {
        let Self::Vectored(sectors) = self else { return Ok(None) };

        let segments = sector_segments(sectors, ctx.sector_size);
        let total: usize = segments.iter().map(|s| s.len).sum();
        if total != len {
            return Err(Error::InvalidConfig(format!("segment layout covers {total} bytes instead of {len}")));
        }

        Ok(Some(segments))
    }
}

fn send(ctx: &mut Context, segments: Option<&[Segment]>, len: usize) -> Result<()> {
    match segments {
        Some(segments) => ctx.write_segments(segments),
        None => ctx.write(len),
    }
}

fn receive(ctx: &mut Context, segments: Option<&[Segment]>, len: usize) -> Result<()> {
    match segments {
        Some(segments) => ctx.read_segments(segments),
        None => ctx.read(len),
    }
}

/// Runs round trips of `len` bytes, optionally refilling the transmit buffer each iteration.
fn round_trips(ctx: &mut Context, id: TestId, len: usize, write: Shape, read: Shape, fill: Option<u8>) -> Result<()> {
    if len == 0 || len > ctx.size {
        return Err(Error::InvalidConfig(format!(
            "test {id} transfers {len} bytes but the buffer holds {} bytes",
            ctx.size
        )));
    }

    let write = write.segments(ctx, len)?;
    let read = read.segments(ctx, len)?;
    let base = ctx.position()?;

    for i in 0..ctx.count {
        log::trace!("test {id} iteration {i}");

        if let Some(value) = fill {
            ctx.tx.fill(value);
        }
        ctx.rx.clear();

        let at = ctx.position_for_write(base, len)?;
        send(ctx, write.as_deref(), len)?;
        ctx.seek_to(at)?;
        receive(ctx, read.as_deref(), len)?;
        ctx.verify(len)?;
        ctx.transferred += len as u64;

        ctx.report(id, false);
    }

    ctx.report(id, true);
    Ok(())
}

/// Write, read back and verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    /// Bytes per transfer.
    pub length: Length,
    /// Write side.
    pub write: Shape,
    /// Read side.
    pub read: Shape,
}

impl RoundTrip {
    /// Contiguous round trip.
    pub const fn contiguous(length: Length) -> Self {
        Self { length, write: Shape::Contiguous, read: Shape::Contiguous }
    }

    /// Vectored round trip with the same layout on both sides.
    pub const fn vectored(sectors: u32, layout: &'static [u32]) -> Self {
        Self { length: Length::Sectors(sectors), write: Shape::Vectored(layout), read: Shape::Vectored(layout) }
    }
}

impl TestCase for RoundTrip {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        let len = self.length.bytes(ctx);
        round_trips(ctx, id, len, self.write, self.read, None)
    }
}

/// Round trips of the whole buffer filled with the configured palette byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patterns;

impl TestCase for Patterns {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        let value = ctx.pattern_byte();
        let len = ctx.size;
        log::debug!("using pattern 0x{value:02x}");
        round_trips(ctx, id, len, Shape::Contiguous, Shape::Contiguous, Some(value))
    }
}

/// Offset where a buffer-sized transfer overruns the end by all but one sector.
fn overrun_offset(ctx: &Context) -> Result<u64> {
    (ctx.partition_size + ctx.sector_size as u64).checked_sub(ctx.size as u64).ok_or_else(|| {
        Error::InvalidConfig(format!("buffer of {} bytes exceeds target capacity {}", ctx.size, ctx.partition_size))
    })
}

/// Read over the last sector, which the target must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPastLast;

impl TestCase for ReadPastLast {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        let offset = overrun_offset(ctx)?;

        for _ in 0..ctx.count {
            ctx.rx.clear();
            ctx.position_for_probe(offset)?;

            match ctx.read(ctx.size) {
                Ok(()) => return Err(Error::UnexpectedSuccess { op: "read", offset }),
                Err(Error::UnexpectedEof { received, .. })
                    if received > 0 && ctx.boundary == BoundaryPolicy::Strict =>
                {
                    log::debug!("read at {offset} returned {received} bytes before end of data");
                    return Err(Error::UnexpectedSuccess { op: "read", offset });
                }
                Err(err) if err.is_rejection() => log::debug!("read at {offset} rejected: {err}"),
                Err(err) => return Err(err),
            }

            ctx.report(id, false);
        }

        ctx.report(id, true);
        Ok(())
    }
}

/// Seek beyond the end of the target, which the target must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LseekPastLast;

impl TestCase for LseekPastLast {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        let offset = ctx.partition_size + ctx.sector_size as u64;

        for _ in 0..ctx.count {
            match ctx.seek_to(offset) {
                Ok(_) => return Err(Error::UnexpectedSuccess { op: "seek", offset }),
                Err(err @ Error::Seek { .. }) => log::debug!("{err}"),
                Err(err) => return Err(err),
            }

            ctx.report(id, false);
        }

        ctx.report(id, true);
        Ok(())
    }
}

/// Write over the last sector, which the target must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePastLast;

impl TestCase for WritePastLast {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        let offset = overrun_offset(ctx)?;

        for _ in 0..ctx.count {
            ctx.rx.clear();
            ctx.position_for_probe(offset)?;

            match ctx.write(ctx.size) {
                Ok(()) => return Err(Error::UnexpectedSuccess { op: "write", offset }),
                Err(err) if err.is_rejection() => log::debug!("write at {offset} rejected: {err}"),
                Err(err) => return Err(err),
            }

            ctx.report(id, false);
        }

        ctx.report(id, true);
        Ok(())
    }
}

/// Registered test case.
#[derive(Debug)]
pub struct Entry {
    id: TestId,
    case: Box<dyn TestCase>,
}

impl Entry {
    /// Test identifier.
    pub fn id(&self) -> TestId {
        self.id
    }

    /// Test implementation.
    pub fn case(&self) -> &dyn TestCase {
        &*self.case
    }
}

/// Ordered registry of test cases.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<Entry>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog of all built-in tests.
    pub fn standard() -> Self {
        Self::new()
            .with(TestId::Simple, RoundTrip::contiguous(Length::Buffer))
            .with(TestId::Sectors1, RoundTrip::contiguous(Length::Sectors(1)))
            .with(TestId::Sectors8, RoundTrip::contiguous(Length::Sectors(8)))
            .with(TestId::Sectors32, RoundTrip::contiguous(Length::Sectors(32)))
            .with(TestId::Sectors64, RoundTrip::contiguous(Length::Sectors(64)))
            .with(TestId::Sg2, RoundTrip::vectored(2, layout::SG_2))
            .with(TestId::Sg8, RoundTrip::vectored(8, layout::SG_8))
            .with(TestId::Sg32, RoundTrip::vectored(32, layout::SG_32))
            .with(TestId::Sg64, RoundTrip::vectored(64, layout::SG_64))
            .with(TestId::Sg128, RoundTrip::vectored(128, layout::SG_128))
            .with(TestId::ReadPastLast, ReadPastLast)
            .with(TestId::LseekPastLast, LseekPastLast)
            .with(TestId::WritePastLast, WritePastLast)
            .with(
                TestId::SgRandomRead,
                RoundTrip {
                    length: Length::Sectors(128),
                    write: Shape::Contiguous,
                    read: Shape::Vectored(layout::UNEVEN),
                },
            )
            .with(
                TestId::SgRandomWrite,
                RoundTrip {
                    length: Length::Sectors(128),
                    write: Shape::Vectored(layout::UNEVEN),
                    read: Shape::Contiguous,
                },
            )
            .with(TestId::SgRandomBoth, RoundTrip::vectored(128, layout::UNEVEN))
            .with(TestId::Patterns, Patterns)
    }

    /// Registers `case` as `id`, replacing a previous registration.
    pub fn register(&mut self, id: TestId, case: impl TestCase + 'static) {
        let entry = Entry { id, case: Box::new(case) };
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Registers `case` as `id`.
    pub fn with(mut self, id: TestId, case: impl TestCase + 'static) -> Self {
        self.register(id, case);
        self
    }

    /// Looks up a test by number.
    pub fn get(&self, number: u32) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id.number() == number)
    }

    /// Registered tests in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Number of registered tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no test is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs test `number` and prints its outcome.
    ///
    /// The result of the test is returned unchanged.
    pub fn run(&self, ctx: &mut Context, number: u32) -> Result<()> {
        let res = match self.get(number) {
            Some(entry) => {
                log::debug!("running test {number} ({}): {}", entry.id, entry.id.description());
                entry.case.run(ctx, entry.id)
            }
            None => {
                ctx.emit(&format!("test {number} is not supported"), true);
                Err(Error::UnsupportedTest(number))
            }
        };

        match &res {
            Ok(()) => ctx.emit("success", true),
            Err(err) => {
                log::debug!("test {number} failed: {err}");
                ctx.emit("failed", true);
            }
        }

        res
    }
}

/// Runs test `number` of the [standard catalog](Catalog::standard).
pub fn run_test(ctx: &mut Context, number: u32) -> Result<()> {
    Catalog::standard().run(ctx, number)
}
