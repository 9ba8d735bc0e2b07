use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Failure of a filesystem operation.
///
/// Errors coming from the host keep their original errno so that callers observe
/// exactly what a raw filesystem would report.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(io::Error),

    #[error("permission denied: {0}")]
    PermissionDenied(io::Error),

    #[error(transparent)]
    Io(io::Error),

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("bad file handle {0}")]
    BadHandle(u64),
}

impl FsError {
    /// The errno reported back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(e) => e.raw_os_error().unwrap_or(libc::ENOENT),
            FsError::PermissionDenied(e) => e.raw_os_error().unwrap_or(libc::EACCES),
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            // The virtual file is r--r--r--, so mutating it is an access violation.
            FsError::InvalidOperation(_) => libc::EACCES,
            FsError::BadHandle(_) => libc::EBADF,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ENOENT) => FsError::NotFound(e),
            Some(libc::EACCES) | Some(libc::EPERM) => FsError::PermissionDenied(e),
            Some(_) => FsError::Io(e),
            None => match e.kind() {
                io::ErrorKind::NotFound => FsError::NotFound(e),
                io::ErrorKind::PermissionDenied => FsError::PermissionDenied(e),
                _ => FsError::Io(e),
            },
        }
    }
}

impl From<nix::Error> for FsError {
    fn from(e: nix::Error) -> Self {
        io::Error::from(e).into()
    }
}

impl From<FsError> for rfuse3::Errno {
    fn from(e: FsError) -> Self {
        e.errno().into()
    }
}

/// Problems with the mount configuration, detected before anything is mounted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source directory {path:?} is not usable: {source}")]
    Source { path: PathBuf, source: io::Error },

    #[error("source {0:?} is not a directory")]
    SourceNotDir(PathBuf),

    #[error("mount point {path:?} is not usable: {source}")]
    MountPoint { path: PathBuf, source: io::Error },

    #[error("mount point {0:?} is not a directory")]
    MountPointNotDir(PathBuf),

    #[error("virtual file name {0:?} must be a single path component")]
    VirtualName(String),
}
