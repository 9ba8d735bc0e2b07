use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};

use crate::error::{FsError, FsResult};

/// File handle handed out for every open of the virtual file. It can never collide
/// with a real descriptor, which always fits in a non-negative `i32`.
pub const VIRTUAL_FH: u64 = u64::MAX;

/// An open session, as carried by the file handle of read/write/flush/release.
///
/// Every open of the virtual file yields the same [`Descriptor::Virtual`], so
/// concurrent sessions on it are indistinguishable. Requests are served one at a time,
/// which makes that harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Virtual,
    Real(RawFd),
}

impl Descriptor {
    /// Decodes a file handle received from the kernel.
    pub fn from_fh(fh: u64) -> FsResult<Self> {
        if fh == VIRTUAL_FH {
            return Ok(Descriptor::Virtual);
        }
        RawFd::try_from(fh)
            .map(Descriptor::Real)
            .map_err(|_| FsError::BadHandle(fh))
    }

    /// Encodes the descriptor as a file handle for the kernel.
    pub fn as_fh(self) -> u64 {
        match self {
            Descriptor::Virtual => VIRTUAL_FH,
            Descriptor::Real(fd) => fd as u64,
        }
    }

    /// Takes ownership of a freshly opened real file.
    pub(crate) fn from_file(file: File) -> Self {
        Descriptor::Real(file.into_raw_fd())
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, Descriptor::Virtual)
    }
}

/// Borrows an open real descriptor as a `File` without taking ownership of it.
/// The session that opened the descriptor keeps it until release.
pub(crate) fn borrow_file(fd: RawFd) -> ManuallyDrop<File> {
    // SAFETY: the file is never dropped, so the descriptor is not closed here. An fd
    // that is not open makes the following syscalls fail with EBADF.
    ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
}

/// Closes a real descriptor, ending its session.
pub(crate) fn close(fd: RawFd) -> FsResult<()> {
    nix::unistd::close(fd)?;
    Ok(())
}
