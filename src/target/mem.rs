//! In-memory target.

use std::{
    fmt,
    io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use super::Target;

/// Access performed on a [`MemTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Cursor moved to offset.
    Seek(u64),
    /// Bytes read starting at offset.
    Read {
        /// Start offset.
        offset: u64,
        /// Bytes transferred.
        len: usize,
    },
    /// Bytes written starting at offset.
    Write {
        /// Start offset.
        offset: u64,
        /// Bytes transferred.
        len: usize,
    },
}

#[derive(Default)]
struct State {
    data: Vec<u8>,
    sector_size: u32,
    pos: u64,
    accesses: Vec<Access>,
    max_read: Option<usize>,
    corrupt: Option<u64>,
    write_error: Option<i32>,
}

impl State {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let start = self.pos.min(self.capacity()) as usize;
        let mut len = buf.len().min(self.data.len() - start);
        if let Some(max) = self.max_read {
            len = len.min(max);
        }

        buf[..len].copy_from_slice(&self.data[start..start + len]);
        if let Some(offset) = self.corrupt {
            if (start as u64..(start + len) as u64).contains(&offset) {
                buf[(offset as usize) - start] ^= 0xff;
            }
        }

        self.pos += len as u64;
        len
    }

    fn write_from(&mut self, buf: &[u8]) -> usize {
        let start = self.pos.min(self.capacity()) as usize;
        let len = buf.len().min(self.data.len() - start);
        self.data[start..start + len].copy_from_slice(&buf[..len]);
        self.pos += len as u64;
        len
    }

    fn check_write(&self) -> io::Result<()> {
        if let Some(errno) = self.write_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if self.pos >= self.capacity() {
            return Err(io::Error::from_raw_os_error(libc::ENOSPC));
        }
        Ok(())
    }
}

/// Fixed-size byte store behaving like a Linux block device node.
///
/// Seeking beyond the end fails with `EINVAL`, writes at the end fail with
/// `ENOSPC`, transfers crossing the end are cut short and reads at the end
/// return no data.
///
/// Clones share the same storage and cursor, so a test can keep a handle for
/// inspection while the engine owns another one.
#[derive(Clone)]
pub struct MemTarget(Arc<Mutex<State>>);

impl fmt::Debug for MemTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MemTarget")
            .field("capacity", &state.capacity())
            .field("sector_size", &state.sector_size)
            .field("pos", &state.pos)
            .finish()
    }
}

impl MemTarget {
    /// Creates a zeroed target of `capacity` bytes with the given sector size.
    pub fn new(capacity: usize, sector_size: u32) -> Self {
        Self(Arc::new(Mutex::new(State { data: vec![0; capacity], sector_size, ..Default::default() })))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the stored bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.state().pos
    }

    /// Accesses performed so far.
    pub fn accesses(&self) -> Vec<Access> {
        self.state().accesses.clone()
    }

    /// Writes performed so far.
    pub fn writes(&self) -> Vec<(u64, usize)> {
        self.accesses()
            .into_iter()
            .filter_map(|access| match access {
                Access::Write { offset, len } => Some((offset, len)),
                _ => None,
            })
            .collect()
    }

    /// Reads performed so far.
    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.accesses()
            .into_iter()
            .filter_map(|access| match access {
                Access::Read { offset, len } => Some((offset, len)),
                _ => None,
            })
            .collect()
    }

    /// Limits every read call to at most `max` bytes.
    pub fn limit_reads(&self, max: usize) {
        self.state().max_read = Some(max);
    }

    /// Inverts the byte at `offset` whenever it is read back.
    ///
    /// Stored data is unaffected.
    pub fn corrupt_reads_at(&self, offset: u64) {
        self.state().corrupt = Some(offset);
    }

    /// Fails every following write with the OS error `errno`.
    pub fn fail_writes(&self, errno: i32) {
        self.state().write_error = Some(errno);
    }
}

impl Read for MemTarget {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        let offset = state.pos;
        let len = state.read_into(buf);
        state.accesses.push(Access::Read { offset, len });
        Ok(len)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let mut state = self.state();
        let offset = state.pos;
        let mut total = 0;
        for buf in bufs.iter_mut() {
            let len = state.read_into(buf);
            total += len;
            if len < buf.len() {
                break;
            }
        }
        state.accesses.push(Access::Read { offset, len: total });
        Ok(total)
    }
}

impl Write for MemTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.check_write()?;
        let offset = state.pos;
        let len = state.write_from(buf);
        state.accesses.push(Access::Write { offset, len });
        Ok(len)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut state = self.state();
        state.check_write()?;
        let offset = state.pos;
        let mut total = 0;
        for buf in bufs {
            let len = state.write_from(buf);
            total += len;
            if len < buf.len() {
                break;
            }
        }
        state.accesses.push(Access::Write { offset, len: total });
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemTarget {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => state.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => state.capacity().checked_add_signed(delta),
        };

        match target {
            Some(offset) if offset <= state.capacity() => {
                state.pos = offset;
                state.accesses.push(Access::Seek(offset));
                Ok(offset)
            }
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

impl Target for MemTarget {
    fn capacity(&self) -> io::Result<u64> {
        Ok(self.state().capacity())
    }

    fn block_size(&self) -> io::Result<u32> {
        Ok(self.state().sector_size)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
