//! I/O primitives.
//!
//! Every primitive blocks until the whole request completed or failed.
//! Throughput is only recorded for transfers that completed in full, a failed
//! primitive leaves it untouched. Verified bytes are counted by the test loop.

use std::{
    io::{self, ErrorKind, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write},
    mem,
    time::Instant,
};

use crate::{Context, Error, Result};

/// Fixed segment layouts in sectors.
pub mod layout {
    /// 2 sectors in halves.
    pub const SG_2: &[u32] = &[1, 1];
    /// 8 sectors in decreasing powers of two.
    pub const SG_8: &[u32] = &[4, 2, 1, 1];
    /// 32 sectors in decreasing powers of two.
    pub const SG_32: &[u32] = &[16, 8, 4, 2, 1, 1];
    /// 64 sectors in decreasing powers of two.
    pub const SG_64: &[u32] = &[32, 16, 8, 4, 2, 1, 1];
    /// 128 sectors in decreasing powers of two.
    pub const SG_128: &[u32] = &[64, 32, 16, 8, 4, 2, 1, 1];
    /// 128 sectors in uneven fragments.
    pub const UNEVEN: &[u32] = &[8, 1, 3, 32, 20, 14, 16, 34];
}

/// Region of a transfer buffer taking part in a vectored transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Start within the buffer.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl Segment {
    /// Creates a new segment.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// End of the segment within the buffer.
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Lays out consecutive segments of the given sector counts from the buffer start.
pub fn sector_segments(layout: &[u32], sector_size: u32) -> Vec<Segment> {
    let mut offset = 0;
    layout
        .iter()
        .map(|&sectors| {
            let len = sectors as usize * sector_size as usize;
            let segment = Segment::new(offset, len);
            offset += len;
            segment
        })
        .collect()
}

/// Checks that segments are ordered, disjoint, non-empty and within `buf_len`.
///
/// Returns the total length.
pub fn check_segments(segments: &[Segment], buf_len: usize) -> Result<usize> {
    if segments.is_empty() {
        return Err(Error::InvalidConfig("segment list is empty".into()));
    }

    let mut end = 0;
    let mut total = 0;
    for segment in segments {
        if segment.len == 0 || segment.offset < end || segment.end() > buf_len {
            return Err(Error::InvalidConfig(format!(
                "segment {segment:?} overlaps, is empty or exceeds buffer of {buf_len} bytes"
            )));
        }
        end = segment.end();
        total += segment.len;
    }

    Ok(total)
}

fn io_slices<'a>(buf: &'a [u8], segments: &[Segment]) -> Vec<IoSlice<'a>> {
    segments.iter().map(|s| IoSlice::new(&buf[s.offset..s.end()])).collect()
}

/// Segments must have passed [`check_segments`].
fn io_slices_mut<'a>(mut buf: &'a mut [u8], segments: &[Segment]) -> Vec<IoSliceMut<'a>> {
    let mut slices = Vec::with_capacity(segments.len());
    let mut pos = 0;
    for segment in segments {
        let (_, rest) = mem::take(&mut buf).split_at_mut(segment.offset - pos);
        let (head, rest) = rest.split_at_mut(segment.len);
        slices.push(IoSliceMut::new(head));
        buf = rest;
        pos = segment.end();
    }
    slices
}

fn short_write(written: usize, total: usize) -> Error {
    Error::Io {
        op: "vectored write",
        source: io::Error::new(ErrorKind::WriteZero, format!("wrote only {written} of {total} bytes")),
    }
}

impl Context {
    fn check_len(&self, len: usize) -> Result<()> {
        if len == 0 || len > self.size {
            return Err(Error::InvalidConfig(format!(
                "transfer of {len} bytes does not fit buffer of {} bytes",
                self.size
            )));
        }
        Ok(())
    }

    /// Moves the cursor to `offset`.
    pub fn seek_to(&mut self, offset: u64) -> Result<u64> {
        log::trace!("seek to {offset}");
        let pos = self.target.seek(SeekFrom::Start(offset)).map_err(|source| Error::Seek { offset, source })?;
        self.offset = pos;
        Ok(pos)
    }

    /// Queries the cursor position from the target.
    pub fn position(&mut self) -> Result<u64> {
        let pos = self
            .target
            .stream_position()
            .map_err(|source| Error::Seek { offset: self.offset, source })?;
        self.offset = pos;
        Ok(pos)
    }

    /// Moves the write cursor back to the start of the target.
    fn wrap(&mut self) -> Result<()> {
        log::debug!("{} bytes written since last wrap, continuing at start", self.partition_size);
        self.partition_remaining = self.partition_size;
        self.seek_to(0)?;
        Ok(())
    }

    /// Positions the cursor at `base` for writing `len` bytes.
    ///
    /// Wraps to the start first if the rest of the partition or the target
    /// cannot hold the transfer, so a transfer never straddles the wrap point
    /// or the end of the target.
    /// Returns the offset the transfer will start at.
    pub(crate) fn position_for_write(&mut self, base: u64, len: usize) -> Result<u64> {
        if self.partition_remaining < len as u64 || base.saturating_add(len as u64) > self.partition_size {
            self.wrap()?;
            return Ok(0);
        }
        self.seek_to(base)
    }

    /// Positions the cursor at `offset` for an overrun probe.
    ///
    /// Resets the wrap budget so that the probe cannot wrap.
    pub(crate) fn position_for_probe(&mut self, offset: u64) -> Result<u64> {
        self.partition_remaining = self.partition_size;
        self.seek_to(offset)
    }

    /// Writes the first `len` bytes of the transmit buffer at the cursor.
    ///
    /// The transfer is split at the wrap point: when the partition is filled,
    /// the cursor moves to the start and the remainder is written there.
    pub fn write(&mut self, len: usize) -> Result<()> {
        self.check_len(len)?;
        log::trace!("write {len} bytes at {}", self.offset);

        let start = Instant::now();
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(usize::try_from(self.partition_remaining).unwrap_or(usize::MAX));
            let n = match self.target.write(&self.tx[done..done + chunk]) {
                Ok(0) => return Err(Error::Io { op: "write", source: ErrorKind::WriteZero.into() }),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::Io { op: "write", source }),
            };

            done += n;
            self.offset += n as u64;
            self.partition_remaining -= n as u64;
            if self.partition_remaining == 0 {
                self.wrap()?;
            }
        }

        self.write_tput.record(len, start.elapsed());
        Ok(())
    }

    /// Reads `len` bytes at the cursor into the start of the receive buffer.
    ///
    /// Short reads are retried until all bytes arrived. A read returning no
    /// data fails with [`Error::UnexpectedEof`].
    pub fn read(&mut self, len: usize) -> Result<()> {
        self.check_len(len)?;
        log::trace!("read {len} bytes at {}", self.offset);

        let start = Instant::now();
        let mut done = 0;
        while done < len {
            match self.target.read(&mut self.rx[done..len]) {
                Ok(0) => return Err(Error::UnexpectedEof { expected: len, received: done }),
                Ok(n) => {
                    done += n;
                    self.offset += n as u64;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::Io { op: "read", source }),
            }
        }

        self.read_tput.record(len, start.elapsed());
        Ok(())
    }

    /// Writes the given segments of the transmit buffer in a single vectored operation.
    pub fn write_segments(&mut self, segments: &[Segment]) -> Result<()> {
        let total = check_segments(segments, self.size)?;
        log::trace!("vectored write of {total} bytes in {} segments at {}", segments.len(), self.offset);

        let slices = io_slices(&self.tx, segments);
        let start = Instant::now();
        let written = loop {
            match self.target.write_vectored(&slices) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                res => break res.map_err(Error::io("vectored write"))?,
            }
        };
        let elapsed = start.elapsed();

        self.offset += written as u64;
        self.partition_remaining = self.partition_remaining.saturating_sub(written as u64);
        if written < total {
            return Err(short_write(written, total));
        }

        self.write_tput.record(total, elapsed);
        if self.partition_remaining == 0 {
            self.wrap()?;
        }
        Ok(())
    }

    /// Reads into the given segments of the receive buffer in a single vectored operation.
    pub fn read_segments(&mut self, segments: &[Segment]) -> Result<()> {
        let total = check_segments(segments, self.size)?;
        log::trace!("vectored read of {total} bytes in {} segments at {}", segments.len(), self.offset);

        let mut slices = io_slices_mut(&mut self.rx, segments);
        let start = Instant::now();
        let received = loop {
            match self.target.read_vectored(&mut slices) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                res => break res.map_err(Error::io("vectored read"))?,
            }
        };
        let elapsed = start.elapsed();

        self.offset += received as u64;
        if received < total {
            return Err(Error::UnexpectedEof { expected: total, received });
        }

        self.read_tput.record(total, elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{check_segments, io_slices_mut, layout, sector_segments, Segment};

    #[test]
    fn layouts_cover_their_sector_counts() {
        let sum = |l: &[u32]| l.iter().sum::<u32>();
        assert_eq!(sum(layout::SG_2), 2);
        assert_eq!(sum(layout::SG_8), 8);
        assert_eq!(sum(layout::SG_32), 32);
        assert_eq!(sum(layout::SG_64), 64);
        assert_eq!(sum(layout::SG_128), 128);
        assert_eq!(sum(layout::UNEVEN), 128);
        assert_eq!(layout::UNEVEN.len(), 8);
    }

    #[test]
    fn uneven_segments() {
        let segments = sector_segments(layout::UNEVEN, 512);
        assert_eq!(segments[0], Segment::new(0, 4096));
        assert_eq!(segments[1], Segment::new(4096, 512));
        assert_eq!(segments[7], Segment::new(94 * 512, 34 * 512));
        assert_eq!(check_segments(&segments, 65536).unwrap(), 65536);
        assert!(check_segments(&segments, 65535).is_err());
    }

    #[test]
    fn invalid_segments() {
        assert!(check_segments(&[], 16).is_err());
        assert!(check_segments(&[Segment::new(0, 8), Segment::new(4, 8)], 16).is_err());
        assert!(check_segments(&[Segment::new(0, 0)], 16).is_err());
        assert_eq!(check_segments(&[Segment::new(2, 4), Segment::new(8, 8)], 16).unwrap(), 12);
    }

    #[test]
    fn mutable_slices_follow_gaps() {
        let mut buf = [0u8; 16];
        let segments = [Segment::new(2, 4), Segment::new(8, 8)];
        let mut slices = io_slices_mut(&mut buf, &segments);
        assert_eq!(slices.len(), 2);
        slices[0].fill(1);
        slices[1].fill(2);
        drop(slices);
        assert_eq!(buf, [0, 0, 1, 1, 1, 1, 0, 0, 2, 2, 2, 2, 2, 2, 2, 2]);
    }
}
