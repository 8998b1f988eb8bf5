//! Block device nodes and image files.

use bitflags::bitflags;
use proc_mounts::MountIter;
use std::{
    fmt,
    fs::File,
    io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write},
    os::unix::prelude::{FileTypeExt, OpenOptionsExt, OsStrExt},
    path::{Path, PathBuf},
};

use super::{Target, DEFAULT_SECTOR_SIZE};
use crate::{Error, Result};

bitflags! {
    /// Flags used when opening a target.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Bypass the page cache (`O_DIRECT`).
        const DIRECT = 1;
        /// Complete each write only once the data reached the medium (`O_DSYNC`).
        const DSYNC = 2;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::DIRECT
    }
}

impl OpenFlags {
    fn custom_flags(self) -> i32 {
        let mut flags = 0;
        if self.contains(Self::DIRECT) {
            flags |= libc::O_DIRECT;
        }
        if self.contains(Self::DSYNC) {
            flags |= libc::O_DSYNC;
        }
        flags
    }
}

/// Block device or regular file opened for read/write testing.
///
/// Capacity is determined once when opening. The logical sector size is
/// queried with `BLKSSZGET` for block devices, regular files report
/// [`DEFAULT_SECTOR_SIZE`].
pub struct BlockDevice {
    file: File,
    path: PathBuf,
    flags: OpenFlags,
    capacity: u64,
    sector_size: u32,
    block_device: bool,
}

impl fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BlockDevice")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("capacity", &self.capacity)
            .field("sector_size", &self.sector_size)
            .finish()
    }
}

impl BlockDevice {
    /// Opens the target at `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let path = path.as_ref();
        let open_err = |source| Error::Open { path: path.to_path_buf(), source };

        log::debug!("opening {} with {flags:?}", path.display());
        let mut file = File::options()
            .read(true)
            .write(true)
            .custom_flags(flags.custom_flags())
            .open(path)
            .map_err(open_err)?;

        let block_device = file.metadata().map_err(open_err)?.file_type().is_block_device();
        let sector_size = if block_device {
            rustix::fs::ioctl_blksszget(&file)
                .map_err(|err| Error::Geometry(format!("cannot query sector size: {err}")))?
        } else {
            DEFAULT_SECTOR_SIZE
        };

        let capacity = file.seek(SeekFrom::End(0)).map_err(Error::io("query capacity"))?;
        file.rewind().map_err(|source| Error::Seek { offset: 0, source })?;

        log::debug!("{} has {capacity} bytes in sectors of {sector_size} bytes", path.display());
        Ok(Self { file, path: path.to_path_buf(), flags, capacity, sector_size, block_device })
    }

    /// Path of the target.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flags the target was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Whether the target is a block device node.
    pub fn is_block_device(&self) -> bool {
        self.block_device
    }
}

impl Read for BlockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.file.read_vectored(bufs)
    }
}

impl Write for BlockDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.file.write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for BlockDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Target for BlockDevice {
    fn capacity(&self) -> io::Result<u64> {
        Ok(self.capacity)
    }

    fn block_size(&self) -> io::Result<u32> {
        Ok(self.sector_size)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Whether `name` is the node name of a partition of the disk named `disk`.
///
/// Partitions append their number to the disk name, separated by `p` if the
/// disk name ends in a digit (`sda1`, `nvme0n1p1`, `mmcblk0p2`).
fn is_partition_of(name: &[u8], disk: &[u8]) -> bool {
    let Some(rest) = name.strip_prefix(disk) else { return false };
    let number = match disk.last() {
        Some(last) if last.is_ascii_digit() => match rest.strip_prefix(b"p") {
            Some(number) => number,
            None => return false,
        },
        _ => rest,
    };
    !number.is_empty() && number.iter().all(u8::is_ascii_digit)
}

/// Returns where the device at `path`, or one of its partitions, is mounted.
pub fn mount_point(path: impl AsRef<Path>) -> io::Result<Option<PathBuf>> {
    let path = path.as_ref().canonicalize()?;

    for mount in MountIter::new()? {
        let Ok(mount) = mount else { continue };
        let Ok(source) = mount.source.canonicalize() else { continue };

        let partition = source.parent() == path.parent()
            && match (source.file_name(), path.file_name()) {
                (Some(source), Some(dev)) => is_partition_of(source.as_bytes(), dev.as_bytes()),
                _ => false,
            };

        if source == path || partition {
            return Ok(Some(mount.dest));
        }
    }

    Ok(None)
}

/// Fails with [`Error::Busy`] if the device at `path` is mounted.
pub fn ensure_unmounted(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match mount_point(path).map_err(Error::io("scan mounts"))? {
        Some(mount_point) => Err(Error::Busy { path: path.to_path_buf(), mount_point }),
        None => Ok(()),
    }
}
