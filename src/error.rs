//! Errors raised while preparing or running a test.

use std::{fmt, io, path::PathBuf};

/// Test engine error.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The target could not be opened.
    Open {
        /// Path of the target.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Positioning the cursor failed.
    Seek {
        /// Requested offset.
        offset: u64,
        /// Underlying error.
        source: io::Error,
    },
    /// A read, write or sync operation failed.
    Io {
        /// Name of the failed operation.
        op: &'static str,
        /// Underlying error.
        source: io::Error,
    },
    /// The target returned no more data before the request was satisfied.
    UnexpectedEof {
        /// Bytes requested.
        expected: usize,
        /// Bytes obtained before the end of data.
        received: usize,
    },
    /// Received data differs from transmitted data.
    Verification {
        /// Offset of the first differing byte.
        offset: usize,
        /// Transmitted byte.
        expected: u8,
        /// Received byte.
        actual: u8,
    },
    /// An operation that must be rejected by the target succeeded.
    UnexpectedSuccess {
        /// Name of the operation.
        op: &'static str,
        /// Offset at which the operation was issued.
        offset: u64,
    },
    /// The requested test is not in the catalog.
    UnsupportedTest(u32),
    /// Invalid configuration.
    InvalidConfig(String),
    /// The target reported unusable geometry.
    Geometry(String),
    /// The target is in use by the system.
    Busy {
        /// Path of the target.
        path: PathBuf,
        /// Where it is mounted.
        mount_point: PathBuf,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { op, source }
    }

    /// Underlying OS error, if any.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Self::Open { source, .. } | Self::Seek { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this is a transport level rejection by the target.
    ///
    /// Boundary tests expect exactly these.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Seek { .. } | Self::Io { .. } | Self::UnexpectedEof { .. })
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.os_error().and_then(|err| err.raw_os_error()) {
            return code;
        }

        match self {
            Self::UnsupportedTest(_) => libc::ENOTSUP,
            Self::UnexpectedEof { .. } => libc::EIO,
            Self::Busy { .. } => libc::EBUSY,
            _ => libc::EINVAL,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Open { path, source } => write!(f, "cannot open {}: {source}", path.display()),
            Self::Seek { offset, source } => write!(f, "cannot seek to offset {offset}: {source}"),
            Self::Io { op, source } => write!(f, "{op} failed: {source}"),
            Self::UnexpectedEof { expected, received } => {
                write!(f, "unexpected end of data after {received} of {expected} bytes")
            }
            Self::Verification { offset, expected, actual } => write!(
                f,
                "verification failed at offset {offset}: sent 0x{expected:02x}, received 0x{actual:02x}"
            ),
            Self::UnexpectedSuccess { op, offset } => {
                write!(f, "{op} at offset {offset} succeeded but must be rejected")
            }
            Self::UnsupportedTest(id) => write!(f, "test {id} is not supported"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Geometry(msg) => write!(f, "invalid target geometry: {msg}"),
            Self::Busy { path, mount_point } => {
                write!(f, "{} is mounted at {}", path.display(), mount_point.display())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Seek { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Open { source, .. } | Error::Seek { source, .. } | Error::Io { source, .. } => source,
            other => {
                let kind = match &other {
                    Error::UnexpectedEof { .. } => io::ErrorKind::UnexpectedEof,
                    Error::UnsupportedTest(_) => io::ErrorKind::Unsupported,
                    Error::Busy { .. } => io::ErrorKind::Other,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

/// Test engine result.
pub type Result<T> = std::result::Result<T, Error>;
