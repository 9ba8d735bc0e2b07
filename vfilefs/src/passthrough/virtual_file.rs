//! The single synthetic file injected into the root of the mount.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use bytes::Bytes;

use super::attr::{Attributes, FileTime};
use crate::error::ConfigError;

pub const DEFAULT_NAME: &str = "nothing.txt";
pub const DEFAULT_CONTENT: &str = "ほげほげほげ\n";

/// Regular file, r--r--r--.
pub const VIRTUAL_MODE: u32 = libc::S_IFREG | 0o444;
pub const VIRTUAL_UID: u32 = 1000;
pub const VIRTUAL_GID: u32 = 1004;

/// Immutable description of the virtual file: its name, its content and the owner it
/// reports. Built once per filesystem instance.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    name: OsString,
    exposed_path: OsString,
    content: Bytes,
    uid: u32,
    gid: u32,
}

impl Default for VirtualFile {
    fn default() -> Self {
        Self::build(
            OsString::from(DEFAULT_NAME),
            Bytes::from_static(DEFAULT_CONTENT.as_bytes()),
        )
    }
}

impl VirtualFile {
    /// Creates a virtual file with a custom name and content.
    ///
    /// The name must be a single, non-empty path component other than `.` or `..`.
    pub fn new(name: impl Into<OsString>, content: impl Into<Bytes>) -> Result<Self, ConfigError> {
        let name = name.into();
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes == b"." || bytes == b".." || bytes.contains(&b'/') {
            return Err(ConfigError::VirtualName(name.to_string_lossy().into_owned()));
        }
        Ok(Self::build(name, content.into()))
    }

    fn build(name: OsString, content: Bytes) -> Self {
        let mut exposed_path = OsString::from("/");
        exposed_path.push(&name);
        Self {
            name,
            exposed_path,
            content,
            uid: VIRTUAL_UID,
            gid: VIRTUAL_GID,
        }
    }

    /// Overrides the owner reported for the virtual file.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// Path of the virtual file in the exposed namespace, `/` + name.
    pub fn exposed_path(&self) -> &OsStr {
        &self.exposed_path
    }

    pub fn is_virtual_path(&self, path: &OsStr) -> bool {
        path == self.exposed_path.as_os_str()
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Returns `content[offset .. offset + size]`, clamped to the content bounds.
    /// Reading at or past the end yields an empty buffer.
    pub fn read(&self, offset: u64, size: u32) -> Bytes {
        let len = self.content.len();
        let start = usize::try_from(offset).map_or(len, |o| o.min(len));
        let end = start.saturating_add(size as usize).min(len);
        self.content.slice(start..end)
    }

    /// Synthetic metadata: epoch timestamps, one link, fixed owner and mode.
    pub fn attributes(&self) -> Attributes {
        let size = self.len();
        Attributes {
            ino: 0,
            mode: VIRTUAL_MODE,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            size,
            blksize: 4096,
            blocks: size.div_ceil(512),
            atime: FileTime::EPOCH,
            mtime: FileTime::EPOCH,
            ctime: FileTime::EPOCH,
        }
    }
}
